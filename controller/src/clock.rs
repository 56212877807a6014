use std::{sync::OnceLock, time::Instant};

use chrono::{NaiveDateTime, Utc};
use chrono_tz::Tz;

/// Milliseconds since the first call in this process.
pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

pub fn parse_timezone(name: &str) -> Option<Tz> {
    name.trim().parse().ok()
}

/// Wall-clock time in `tz`, without the offset.
pub fn local_now(tz: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&tz).naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_goes_back() {
        let first = monotonic_ms();
        let second = monotonic_ms();

        assert!(second >= first);
    }

    #[test]
    fn parses_iana_names() {
        assert_eq!(parse_timezone("Asia/Tokyo"), Some(chrono_tz::Asia::Tokyo));
        assert_eq!(parse_timezone(" UTC "), Some(chrono_tz::UTC));
        assert_eq!(parse_timezone("Mars/Olympus"), None);
    }
}

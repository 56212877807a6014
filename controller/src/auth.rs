use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use room_common::MediaConfig;
use tracing::{error, warn};

use crate::{
    backend::{BackendError, RadikoBackend, Session, StreamBackend},
    control::ControlCommand,
};

/// Runs the backend handshake until it succeeds, `attempts` run out or
/// `stop` is raised.
pub fn authenticate_with_retry(
    backend: &mut dyn StreamBackend,
    attempts: u32,
    delay: Duration,
    stop: &AtomicBool,
) -> Result<Session, BackendError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match backend.authenticate() {
            Ok(session) => return Ok(session),
            Err(err) if attempt >= attempts || stop.load(Ordering::Relaxed) => return Err(err),
            Err(err) => {
                warn!(attempt, attempts, "authentication failed: {err}");
                attempt += 1;
                thread::sleep(delay);
            }
        }
    }
}

pub fn spawn_authenticator(
    config: MediaConfig,
    commands: Sender<ControlCommand>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("auth".to_string())
        .spawn(move || {
            let delay = Duration::from_millis(config.auth_retry_delay_ms);
            let attempts = config.auth_attempts;

            let command = match RadikoBackend::new(config) {
                Ok(mut backend) => match authenticate_with_retry(&mut backend, attempts, delay, &stop) {
                    Ok(session) => ControlCommand::Authenticated(session),
                    Err(err) => {
                        error!(attempts, "giving up on authentication: {err}");
                        ControlCommand::AuthFailed(err.to_string())
                    }
                },
                Err(err) => ControlCommand::AuthFailed(err.to_string()),
            };

            if !stop.load(Ordering::Relaxed) {
                let _ = commands.send(command);
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky {
        failures_left: u32,
        calls: u32,
    }

    impl StreamBackend for Flaky {
        fn authenticate(&mut self) -> Result<Session, BackendError> {
            self.calls += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(BackendError::Status {
                    step: "auth1",
                    status: 503,
                });
            }
            Ok(Session::new("t".into(), "p".into(), vec!["TBS".into()]))
        }

        fn resolve_stream(&mut self, channel: &str) -> Result<String, BackendError> {
            Err(BackendError::NoStream(channel.to_string()))
        }
    }

    #[test]
    fn retries_until_success() {
        let mut backend = Flaky {
            failures_left: 2,
            calls: 0,
        };

        let session =
            authenticate_with_retry(&mut backend, 50, Duration::ZERO, &AtomicBool::new(false)).unwrap();

        assert_eq!(backend.calls, 3);
        assert_eq!(session.channels.len(), 2);
    }

    #[test]
    fn gives_up_after_bounded_attempts() {
        let mut backend = Flaky {
            failures_left: u32::MAX,
            calls: 0,
        };

        let result = authenticate_with_retry(&mut backend, 4, Duration::ZERO, &AtomicBool::new(false));

        assert!(matches!(result, Err(BackendError::Status { status: 503, .. })));
        assert_eq!(backend.calls, 4);
    }

    #[test]
    fn stop_flag_ends_retries() {
        let mut backend = Flaky {
            failures_left: u32::MAX,
            calls: 0,
        };

        assert!(authenticate_with_retry(&mut backend, 50, Duration::ZERO, &AtomicBool::new(true)).is_err());
        assert_eq!(backend.calls, 1);
    }
}

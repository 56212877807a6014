use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::NaiveDateTime;
use chrono_tz::Tz;
use room_common::DailySchedule;
use tracing::info;

use crate::{clock::local_now, control::ControlCommand};

const SCHEDULE_POLL: Duration = Duration::from_secs(1);

/// Posts the events due at `now`. Returns false once the control loop has
/// gone away.
pub fn post_due_events(
    schedule: &mut DailySchedule,
    now: NaiveDateTime,
    commands: &Sender<ControlCommand>,
) -> bool {
    for event in schedule.due_events(now) {
        info!(event = event.as_str(), at = %now.format("%H:%M"), "schedule fired");
        if commands.send(ControlCommand::Scheduled(event)).is_err() {
            return false;
        }
    }
    true
}

pub fn spawn_schedule_trigger(
    mut schedule: DailySchedule,
    tz: Tz,
    commands: Sender<ControlCommand>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("schedule".to_string())
        .spawn(move || {
            if let Some((event, when)) = schedule.next_event(local_now(tz)) {
                info!(event = event.as_str(), at = %when, timezone = %tz, "next scheduled event");
            }

            while !stop.load(Ordering::Relaxed) {
                if !post_due_events(&mut schedule, local_now(tz), &commands) {
                    break;
                }
                thread::sleep(SCHEDULE_POLL);
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use room_common::ScheduledEvent;
    use std::sync::mpsc;

    #[test]
    fn due_events_are_posted_once() {
        let mut schedule = DailySchedule::from_times("06:20", "07:40", "00:30").unwrap();
        let (tx, rx) = mpsc::channel();
        let at = |second| {
            NaiveDate::from_ymd_opt(2026, 3, 2)
                .unwrap()
                .and_hms_opt(7, 40, second)
                .unwrap()
        };

        assert!(post_due_events(&mut schedule, at(0), &tx));
        assert!(post_due_events(&mut schedule, at(1), &tx));

        let posted: Vec<_> = rx.try_iter().collect();
        assert_eq!(posted.len(), 1);
        assert!(matches!(posted[0], ControlCommand::Scheduled(ScheduledEvent::Away)));
    }

    #[test]
    fn closed_queue_stops_trigger() {
        let mut schedule = DailySchedule::from_times("06:20", "07:40", "00:30").unwrap();
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let morning = NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(6, 20, 5)
            .unwrap();

        assert!(!post_due_events(&mut schedule, morning, &tx));
    }
}

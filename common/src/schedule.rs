use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use thiserror::Error;

use crate::types::ScheduledEvent;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid {event} time `{value}`, expected HH:MM")]
    InvalidTime { event: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduleEntry {
    event: ScheduledEvent,
    at: NaiveTime,
    last_fired: Option<NaiveDate>,
}

/// Three daily trigger times. Each entry fires at most once per calendar
/// day, and only while the wall clock is inside its minute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySchedule {
    entries: Vec<ScheduleEntry>,
}

pub fn parse_time_of_day(event: ScheduledEvent, value: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| ScheduleError::InvalidTime {
        event: event.as_str(),
        value: value.to_string(),
    })
}

impl DailySchedule {
    pub fn from_times(morning: &str, away: &str, night: &str) -> Result<Self, ScheduleError> {
        let entries = [
            (ScheduledEvent::Morning, morning),
            (ScheduledEvent::Away, away),
            (ScheduledEvent::Night, night),
        ]
        .into_iter()
        .map(|(event, value)| {
            Ok(ScheduleEntry {
                event,
                at: parse_time_of_day(event, value)?,
                last_fired: None,
            })
        })
        .collect::<Result<Vec<_>, ScheduleError>>()?;

        Ok(Self { entries })
    }

    /// Events whose minute is `now`'s minute and that have not fired today.
    /// Marks them fired.
    pub fn due_events(&mut self, now: NaiveDateTime) -> Vec<ScheduledEvent> {
        let today = now.date();
        let (hour, minute) = (now.hour(), now.minute());

        let mut due = Vec::new();
        for entry in &mut self.entries {
            if entry.at.hour() != hour || entry.at.minute() != minute {
                continue;
            }
            if entry.last_fired == Some(today) {
                continue;
            }
            entry.last_fired = Some(today);
            due.push(entry.event);
        }
        due
    }

    pub fn next_event(&self, now: NaiveDateTime) -> Option<(ScheduledEvent, NaiveDateTime)> {
        self.entries
            .iter()
            .map(|entry| {
                let today = now.date().and_time(entry.at);
                let when = if today > now {
                    today
                } else {
                    today + Duration::days(1)
                };
                (entry.event, when)
            })
            .min_by_key(|(_, when)| *when)
    }
}

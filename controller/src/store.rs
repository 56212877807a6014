use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;
use room_common::{schedule::parse_time_of_day, RoomConfig, ScheduleConfig, ScheduledEvent};

use crate::clock::parse_timezone;

const CONFIG_FILE: &str = "config.json";

/// Location of the persisted `RoomConfig`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ROOM_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.room"));
        Self::new(data_dir)
    }

    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            config_path: data_dir.as_ref().join(CONFIG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// A missing file yields defaults; anything else unreadable is an error.
    pub async fn load(&self) -> anyhow::Result<RoomConfig> {
        match tokio::fs::read(&self.config_path).await {
            Ok(raw) => serde_json::from_slice::<RoomConfig>(&raw)
                .with_context(|| format!("malformed {}", self.config_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RoomConfig::default()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read {}", self.config_path.display()))
            }
        }
    }
}

/// Applies environment overrides and validates the result. Returns one note
/// per rejected value so the caller can log them once logging is up.
pub fn apply_overrides<F>(config: &mut RoomConfig, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut notes = Vec::new();

    if let Some(value) = lookup("ROOM_MORNING_AT") {
        config.schedule.morning = value;
    }
    if let Some(value) = lookup("ROOM_AWAY_AT") {
        config.schedule.away = value;
    }
    if let Some(value) = lookup("ROOM_NIGHT_AT") {
        config.schedule.night = value;
    }
    if let Some(value) = lookup("ROOM_TIMEZONE") {
        config.timezone = value;
    }
    if let Some(value) = lookup("ROOM_LOG_DIR") {
        config.log_dir = value;
    }
    if let Some(value) = lookup("PIGPIO_ADDR") {
        config.gpio.pigpio_host = value;
    }
    if let Some(value) = lookup("PIGPIO_PORT") {
        match value.trim().parse::<u16>() {
            Ok(port) => config.gpio.pigpio_port = port,
            Err(_) => notes.push(format!("ignoring PIGPIO_PORT `{value}`")),
        }
    }

    let defaults = ScheduleConfig::default();
    let slots = [
        (ScheduledEvent::Morning, &mut config.schedule.morning, defaults.morning),
        (ScheduledEvent::Away, &mut config.schedule.away, defaults.away),
        (ScheduledEvent::Night, &mut config.schedule.night, defaults.night),
    ];
    for (event, value, fallback) in slots {
        if let Err(err) = parse_time_of_day(event, value) {
            notes.push(format!("{err}, using {fallback}"));
            *value = fallback;
        }
    }

    if parse_timezone(&config.timezone).is_none() {
        let fallback = RoomConfig::default().timezone;
        notes.push(format!("unknown timezone `{}`, using {fallback}", config.timezone));
        config.timezone = fallback;
    }

    config.sanitize();
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[tokio::test]
    async fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());

        let config = store.load().await.unwrap();

        assert_eq!(config.schedule, ScheduleConfig::default());
        assert_eq!(store.path(), dir.path().join("config.json"));
    }

    #[tokio::test]
    async fn reads_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"control":{"darkness_lux":5.0},"gpio":{"pigpio_port":9999}}"#,
        )
        .unwrap();

        let config = ConfigStore::new(dir.path()).load().await.unwrap();

        assert_eq!(config.control.darkness_lux, 5.0);
        assert_eq!(config.control.brightness_lux, 20.0);
        assert_eq!(config.gpio.pigpio_port, 9999);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{ not json").unwrap();

        let err = ConfigStore::new(dir.path()).load().await.unwrap_err();

        assert!(format!("{err:#}").contains("malformed"));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = RoomConfig::default();

        let notes = apply_overrides(
            &mut config,
            env(&[
                ("ROOM_MORNING_AT", "05:45"),
                ("ROOM_TIMEZONE", "Europe/Berlin"),
                ("PIGPIO_ADDR", "10.0.0.7"),
                ("PIGPIO_PORT", "8889"),
                ("ROOM_LOG_DIR", "/var/log/room"),
            ]),
        );

        assert!(notes.is_empty());
        assert_eq!(config.schedule.morning, "05:45");
        assert_eq!(config.schedule.away, "07:40");
        assert_eq!(config.timezone, "Europe/Berlin");
        assert_eq!(config.gpio.pigpio_host, "10.0.0.7");
        assert_eq!(config.gpio.pigpio_port, 8889);
        assert_eq!(config.log_dir, "/var/log/room");
    }

    #[test]
    fn invalid_values_fall_back_with_a_note() {
        let mut config = RoomConfig::default();

        let notes = apply_overrides(
            &mut config,
            env(&[
                ("ROOM_NIGHT_AT", "half past midnight"),
                ("ROOM_TIMEZONE", "Nowhere/Land"),
                ("PIGPIO_PORT", "eighty"),
            ]),
        );

        assert_eq!(notes.len(), 3);
        assert_eq!(config.schedule.night, "00:30");
        assert_eq!(config.timezone, "Asia/Tokyo");
        assert_eq!(config.gpio.pigpio_port, 8888);
        assert!(config.schedule.build().is_ok());
    }
}

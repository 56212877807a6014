use serde::{Deserialize, Serialize};

use crate::comfort::effective_temperature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperatingMode {
    Active,
    Suspended,
    Night,
}

impl OperatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Night => "NIGHT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    None,
    Short,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledEvent {
    Morning,
    Away,
    Night,
}

impl ScheduledEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Away => "away",
            Self::Night => "night",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplianceCommand {
    Heating,
    Cooling,
    ClimateOff,
    LightToggle,
    LightOff,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentSample {
    pub illuminance: f32,
    pub temperature: f32,
    /// Relative humidity as a fraction in `[0, 1]`.
    pub humidity: f32,
    pub effective_temperature: f32,
}

impl EnvironmentSample {
    /// Builds a sample from raw readings; `humidity_percent` is what the
    /// humidity sensors report (0-100).
    pub fn new(illuminance: f32, temperature: f32, humidity_percent: f32) -> Self {
        let humidity = (humidity_percent / 100.0).clamp(0.0, 1.0);
        Self {
            illuminance,
            temperature,
            humidity,
            effective_temperature: effective_temperature(temperature, humidity),
        }
    }
}

/// Liveness of the media pipeline as seen by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineHealth {
    pub alive: bool,
    pub channel: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomStatus {
    pub mode: &'static str,
    #[serde(rename = "resumeLocked")]
    pub resume_locked: bool,
    #[serde(rename = "manualOverride")]
    pub manual_override: bool,
    #[serde(rename = "cooldownTicks")]
    pub cooldown_ticks: u32,
    pub channel: usize,
    #[serde(rename = "pipelineAlive")]
    pub pipeline_alive: bool,
    pub illuminance: Option<f32>,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    #[serde(rename = "effectiveTemperature")]
    pub effective_temperature: Option<f32>,
}

//! Environment sensor bundle: illuminance plus temperature/humidity, each
//! backed by an ordered list of interchangeable instances.

mod command;
mod simulated;

use room_common::{EnvironmentSample, SensorConfig};
use thiserror::Error;
use tracing::{debug, warn};

pub use command::CommandSensor;
pub use simulated::SimulatedSensor;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` did not answer within {timeout_ms} ms")]
    Timeout { program: String, timeout_ms: u64 },
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("unreadable sensor output `{output}`")]
    Parse { output: String },
    #[error("no {kind} sensor configured")]
    NotConfigured { kind: &'static str },
    #[error("all {kind} sensors failed, last error: {last}")]
    Exhausted {
        kind: &'static str,
        last: Box<SensorError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temperature_c: f32,
    pub humidity_percent: f32,
}

pub trait LightSensor: Send {
    fn name(&self) -> &str;
    fn read_illuminance(&mut self) -> Result<f32, SensorError>;
}

pub trait ClimateSensor: Send {
    fn name(&self) -> &str;
    fn read_climate(&mut self) -> Result<ClimateReading, SensorError>;
}

/// Primary/secondary sensor lists. A read tries each instance in order and
/// fails only when every instance failed.
pub struct SensorBundle {
    light: Vec<Box<dyn LightSensor>>,
    climate: Vec<Box<dyn ClimateSensor>>,
}

impl SensorBundle {
    pub fn new(light: Vec<Box<dyn LightSensor>>, climate: Vec<Box<dyn ClimateSensor>>) -> Self {
        Self { light, climate }
    }

    pub fn from_config(config: &SensorConfig) -> Self {
        let light = config
            .light
            .iter()
            .map(|spec| {
                Box::new(CommandSensor::new(spec.clone(), config.read_timeout_ms))
                    as Box<dyn LightSensor>
            })
            .collect();
        let climate = config
            .climate
            .iter()
            .map(|spec| {
                Box::new(CommandSensor::new(spec.clone(), config.read_timeout_ms))
                    as Box<dyn ClimateSensor>
            })
            .collect();
        Self { light, climate }
    }

    pub fn simulated() -> Self {
        Self {
            light: vec![Box::new(SimulatedSensor::new())],
            climate: vec![Box::new(SimulatedSensor::new())],
        }
    }

    pub fn read_illuminance(&mut self) -> Result<f32, SensorError> {
        let mut last = None;
        for sensor in &mut self.light {
            match sensor.read_illuminance() {
                Ok(lux) => {
                    debug!(sensor = sensor.name(), lux, "illuminance read");
                    return Ok(lux);
                }
                Err(err) => {
                    warn!(sensor = sensor.name(), "illuminance read failed: {err}");
                    last = Some(err);
                }
            }
        }
        Err(exhausted("light", last))
    }

    pub fn read_climate(&mut self) -> Result<ClimateReading, SensorError> {
        let mut last = None;
        for sensor in &mut self.climate {
            match sensor.read_climate() {
                Ok(reading) => {
                    debug!(
                        sensor = sensor.name(),
                        temperature_c = reading.temperature_c,
                        humidity = reading.humidity_percent,
                        "climate read"
                    );
                    return Ok(reading);
                }
                Err(err) => {
                    warn!(sensor = sensor.name(), "climate read failed: {err}");
                    last = Some(err);
                }
            }
        }
        Err(exhausted("climate", last))
    }

    /// One full environment sample for a slow tick.
    pub fn sample(&mut self) -> Result<EnvironmentSample, SensorError> {
        let lux = self.read_illuminance()?;
        let climate = self.read_climate()?;
        Ok(EnvironmentSample::new(
            lux,
            climate.temperature_c,
            climate.humidity_percent,
        ))
    }
}

fn exhausted(kind: &'static str, last: Option<SensorError>) -> SensorError {
    match last {
        Some(last) => SensorError::Exhausted {
            kind,
            last: Box::new(last),
        },
        None => SensorError::NotConfigured { kind },
    }
}

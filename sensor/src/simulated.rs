use crate::{ClimateReading, ClimateSensor, LightSensor, SensorError};

/// Slowly varying readings for development hosts without I2C devices.
#[derive(Debug, Default)]
pub struct SimulatedSensor {
    tick: u64,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LightSensor for SimulatedSensor {
    fn name(&self) -> &str {
        "simulated"
    }

    fn read_illuminance(&mut self) -> Result<f32, SensorError> {
        self.tick = self.tick.saturating_add(1);
        Ok(120.0 + (self.tick % 8) as f32 * 5.0)
    }
}

impl ClimateSensor for SimulatedSensor {
    fn name(&self) -> &str {
        "simulated"
    }

    fn read_climate(&mut self) -> Result<ClimateReading, SensorError> {
        self.tick = self.tick.saturating_add(1);
        Ok(ClimateReading {
            temperature_c: 22.0 + (self.tick % 8) as f32 * 0.2,
            humidity_percent: 42.0 + (self.tick % 6) as f32 * 0.5,
        })
    }
}

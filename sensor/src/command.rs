use std::{
    io::Read,
    process::{Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use room_common::CommandSpec;
use tracing::warn;

use crate::{ClimateReading, ClimateSensor, LightSensor, SensorError};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs an external reader program and parses what it prints.
///
/// Illuminance readers print one number. Climate readers print
/// `temperature [pressure] humidity`; the first field is taken as Celsius and
/// the last as relative humidity in percent.
#[derive(Debug, Clone)]
pub struct CommandSensor {
    spec: CommandSpec,
    label: String,
    timeout: Duration,
}

impl CommandSensor {
    pub fn new(spec: CommandSpec, timeout_ms: u64) -> Self {
        let label = spec.display(&spec.args);
        Self {
            spec,
            label,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn run(&self) -> Result<String, SensorError> {
        let mut child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SensorError::Spawn {
                program: self.label.clone(),
                source,
            })?;

        // Pipes are drained while the child runs so a chatty reader cannot
        // fill them and stall.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SensorError::Timeout {
                        program: self.label.clone(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    let _ = child.kill();
                    return Err(SensorError::Spawn {
                        program: self.label.clone(),
                        source,
                    });
                }
            }
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);
        for line in stderr.lines().filter(|line| !line.trim().is_empty()) {
            warn!(sensor = %self.label, "{line}");
        }

        if !status.success() {
            return Err(SensorError::Failed {
                program: self.label.clone(),
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(stdout)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut text = String::new();
            let _ = pipe.read_to_string(&mut text);
            text
        })
    })
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn parse_numbers(output: &str) -> Result<Vec<f32>, SensorError> {
    let values = output
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|field| !field.is_empty())
        .map(str::parse::<f32>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| SensorError::Parse {
            output: output.trim().to_string(),
        })?;

    if values.is_empty() || values.iter().any(|value| !value.is_finite()) {
        return Err(SensorError::Parse {
            output: output.trim().to_string(),
        });
    }
    Ok(values)
}

pub(crate) fn parse_illuminance(output: &str) -> Result<f32, SensorError> {
    let values = parse_numbers(output)?;
    match values.as_slice() {
        [lux] if *lux >= 0.0 => Ok(*lux),
        _ => Err(SensorError::Parse {
            output: output.trim().to_string(),
        }),
    }
}

pub(crate) fn parse_climate(output: &str) -> Result<ClimateReading, SensorError> {
    let values = parse_numbers(output)?;
    match values.as_slice() {
        [temperature_c, .., humidity_percent] if values.len() <= 3 => Ok(ClimateReading {
            temperature_c: *temperature_c,
            humidity_percent: *humidity_percent,
        }),
        _ => Err(SensorError::Parse {
            output: output.trim().to_string(),
        }),
    }
}

impl LightSensor for CommandSensor {
    fn name(&self) -> &str {
        &self.label
    }

    fn read_illuminance(&mut self) -> Result<f32, SensorError> {
        parse_illuminance(&self.run()?)
    }
}

impl ClimateSensor for CommandSensor {
    fn name(&self) -> &str {
        &self.label
    }

    fn read_climate(&mut self) -> Result<ClimateReading, SensorError> {
        parse_climate(&self.run()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sensor(program: &str, args: &[&str], timeout_ms: u64) -> CommandSensor {
        CommandSensor::new(CommandSpec::new(program, args), timeout_ms)
    }

    #[test]
    fn parses_lux() {
        assert_eq!(parse_illuminance("  42.5\n").unwrap(), 42.5);
        assert!(parse_illuminance("-3").is_err());
        assert!(parse_illuminance("1 2").is_err());
        assert!(parse_illuminance("bright").is_err());
    }

    #[test]
    fn climate_takes_first_and_last_fields() {
        let with_pressure = parse_climate("21.5 1013.2 45.0\n").unwrap();
        let without = parse_climate("21.5,45.0").unwrap();

        assert_eq!(with_pressure, without);
        assert_eq!(with_pressure.temperature_c, 21.5);
        assert_eq!(with_pressure.humidity_percent, 45.0);
        assert!(parse_climate("21.5").is_err());
        assert!(parse_climate("").is_err());
    }

    #[test]
    fn reads_from_child_stdout() {
        let mut light = sensor("echo", &["123.5"], 2_000);
        let mut climate = sensor("echo", &["19.0 1008.0 61.0"], 2_000);

        assert_eq!(light.read_illuminance().unwrap(), 123.5);
        assert_eq!(climate.read_climate().unwrap().humidity_percent, 61.0);
    }

    #[test]
    fn failing_reader_is_an_error() {
        let mut light = sensor("false", &[], 2_000);

        assert!(matches!(
            light.read_illuminance(),
            Err(SensorError::Failed { .. })
        ));
    }

    #[test]
    fn missing_reader_is_a_spawn_error() {
        let mut light = sensor("/nonexistent/tsl2572", &[], 2_000);

        assert!(matches!(
            light.read_illuminance(),
            Err(SensorError::Spawn { .. })
        ));
    }

    #[test]
    fn output_larger_than_a_pipe_buffer_is_read() {
        let script = "head -c 200000 /dev/zero | tr '\\000' ' '; echo 88.0";
        let mut light = sensor("sh", &["-c", script], 1_000);

        assert_eq!(light.read_illuminance().unwrap(), 88.0);
    }

    #[test]
    fn hung_reader_times_out() {
        let mut light = sensor("sleep", &["5"], 100);
        let started = Instant::now();

        assert!(matches!(
            light.read_illuminance(),
            Err(SensorError::Timeout { timeout_ms: 100, .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}

use std::{
    io::{Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use room_common::{GpioConfig, OutputBank, OutputError};
use thiserror::Error;
use tracing::{debug, info};

const CMD_MODES: u32 = 0;
const CMD_PUD: u32 = 2;
const CMD_READ: u32 = 3;
const CMD_WRITE: u32 = 4;

const MODE_INPUT: u32 = 0;
const MODE_OUTPUT: u32 = 1;
const PUD_UP: u32 = 2;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("pigpio daemon at {addr} unreachable: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("pigpio socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("pigpio command {cmd} on gpio {pin} failed with code {code}")]
    Command { cmd: u32, pin: u32, code: i32 },
}

/// Raw levels of the two push buttons; `true` means the contact is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwitchLevels {
    pub channel: bool,
    pub manual: bool,
}

/// Switch inputs plus indicator outputs.
pub trait Panel: OutputBank + Send {
    fn read_switches(&mut self) -> Result<SwitchLevels, HardwareError>;
    fn outputs(&mut self) -> &mut dyn OutputBank;
    /// Drives every indicator low. Last call before exit.
    fn release(&mut self) -> Result<(), HardwareError>;
}

pub(crate) fn encode_request(cmd: u32, p1: u32, p2: u32) -> [u8; 16] {
    let mut frame = [0u8; 16];
    frame[0..4].copy_from_slice(&cmd.to_le_bytes());
    frame[4..8].copy_from_slice(&p1.to_le_bytes());
    frame[8..12].copy_from_slice(&p2.to_le_bytes());
    frame
}

pub(crate) fn decode_response(frame: &[u8; 16]) -> Result<u32, HardwareError> {
    let cmd = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let pin = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
    let res = i32::from_le_bytes([frame[12], frame[13], frame[14], frame[15]]);
    if res < 0 {
        return Err(HardwareError::Command {
            cmd,
            pin,
            code: res,
        });
    }
    Ok(res as u32)
}

/// Client for the pigpio daemon socket interface.
pub struct PigpioClient {
    stream: TcpStream,
}

impl PigpioClient {
    pub fn connect(host: &str, port: u16) -> Result<Self, HardwareError> {
        let addr = format!("{host}:{port}");
        let connect_err = |source| HardwareError::Connect {
            addr: addr.clone(),
            source,
        };

        let resolved = addr
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no address resolved",
                ))
            })?;
        let stream = TcpStream::connect_timeout(&resolved, SOCKET_TIMEOUT).map_err(connect_err)?;
        stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
        stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    fn command(&mut self, cmd: u32, pin: u32, p2: u32) -> Result<u32, HardwareError> {
        self.stream.write_all(&encode_request(cmd, pin, p2))?;
        let mut response = [0u8; 16];
        self.stream.read_exact(&mut response)?;
        decode_response(&response)
    }

    pub fn set_input_pull_up(&mut self, pin: u8) -> Result<(), HardwareError> {
        self.command(CMD_MODES, pin as u32, MODE_INPUT)?;
        self.command(CMD_PUD, pin as u32, PUD_UP)?;
        Ok(())
    }

    pub fn set_output(&mut self, pin: u8) -> Result<(), HardwareError> {
        self.command(CMD_MODES, pin as u32, MODE_OUTPUT)?;
        Ok(())
    }

    pub fn read(&mut self, pin: u8) -> Result<bool, HardwareError> {
        Ok(self.command(CMD_READ, pin as u32, 0)? != 0)
    }

    pub fn write(&mut self, pin: u8, level: bool) -> Result<(), HardwareError> {
        self.command(CMD_WRITE, pin as u32, level as u32)?;
        Ok(())
    }
}

/// Buttons and indicator LEDs wired to the Pi header, driven through pigpio.
pub struct PigpioPanel {
    client: PigpioClient,
    channel_pin: u8,
    manual_pin: u8,
    indicator_pins: Vec<u8>,
}

impl PigpioPanel {
    pub fn open(config: &GpioConfig) -> Result<Self, HardwareError> {
        let mut client = PigpioClient::connect(&config.pigpio_host, config.pigpio_port)?;

        client.set_input_pull_up(config.channel_switch_pin)?;
        client.set_input_pull_up(config.override_switch_pin)?;
        for pin in &config.indicator_pins {
            client.set_output(*pin)?;
            client.write(*pin, false)?;
        }

        info!(
            host = %config.pigpio_host,
            port = config.pigpio_port,
            indicators = ?config.indicator_pins,
            "gpio panel ready"
        );
        Ok(Self {
            client,
            channel_pin: config.channel_switch_pin,
            manual_pin: config.override_switch_pin,
            indicator_pins: config.indicator_pins.clone(),
        })
    }
}

impl OutputBank for PigpioPanel {
    fn width(&self) -> usize {
        self.indicator_pins.len()
    }

    fn write_bit(&mut self, bit: usize, level: bool) -> Result<(), OutputError> {
        let pin = *self.indicator_pins.get(bit).ok_or_else(|| OutputError {
            bit,
            reason: "no pin mapped".to_string(),
        })?;
        self.client.write(pin, level).map_err(|err| OutputError {
            bit,
            reason: err.to_string(),
        })
    }
}

impl Panel for PigpioPanel {
    fn read_switches(&mut self) -> Result<SwitchLevels, HardwareError> {
        // Pull-ups: a pressed button reads low.
        Ok(SwitchLevels {
            channel: !self.client.read(self.channel_pin)?,
            manual: !self.client.read(self.manual_pin)?,
        })
    }

    fn outputs(&mut self) -> &mut dyn OutputBank {
        self
    }

    fn release(&mut self) -> Result<(), HardwareError> {
        for pin in self.indicator_pins.clone() {
            self.client.write(pin, false)?;
        }
        Ok(())
    }
}

/// Stand-in panel for hosts without GPIO: buttons never close, indicator
/// writes go to the log.
#[derive(Debug)]
pub struct SimulatedPanel {
    levels: Vec<bool>,
}

impl SimulatedPanel {
    pub fn new(width: usize) -> Self {
        Self {
            levels: vec![false; width],
        }
    }
}

impl OutputBank for SimulatedPanel {
    fn width(&self) -> usize {
        self.levels.len()
    }

    fn write_bit(&mut self, bit: usize, level: bool) -> Result<(), OutputError> {
        let slot = self.levels.get_mut(bit).ok_or_else(|| OutputError {
            bit,
            reason: "no such indicator".to_string(),
        })?;
        if *slot != level {
            debug!(bit, level, "indicator");
        }
        *slot = level;
        Ok(())
    }
}

impl Panel for SimulatedPanel {
    fn read_switches(&mut self) -> Result<SwitchLevels, HardwareError> {
        Ok(SwitchLevels::default())
    }

    fn outputs(&mut self) -> &mut dyn OutputBank {
        self
    }

    fn release(&mut self) -> Result<(), HardwareError> {
        self.levels.iter_mut().for_each(|level| *level = false);
        Ok(())
    }
}

use serde::{Deserialize, Serialize};

use crate::schedule::{DailySchedule, ScheduleError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub tick_ms: u64,
    pub slow_tick_every: u32,
    pub long_press_ms: u64,
    pub darkness_lux: f32,
    pub brightness_lux: f32,
    pub open_blinds_lux: f32,
    pub heating_below_c: f32,
    pub cooling_above_c: f32,
    pub cooldown_secs: u64,
    pub blink_pattern: u8,
    pub blink_mask: u8,
    pub blink_interval_ms: u64,
    pub blink_repeats: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            slow_tick_every: 100,
            long_press_ms: 1_000,
            darkness_lux: 10.0,
            brightness_lux: 20.0,
            open_blinds_lux: 10.0,
            heating_below_c: 20.0,
            cooling_above_c: 28.0,
            cooldown_secs: 3_600,
            blink_pattern: 0b111,
            blink_mask: 0b111,
            blink_interval_ms: 150,
            blink_repeats: 3,
        }
    }
}

impl ControlConfig {
    pub fn sanitize(&mut self) {
        self.tick_ms = self.tick_ms.clamp(10, 1_000);
        self.slow_tick_every = self.slow_tick_every.max(1);
        self.long_press_ms = self.long_press_ms.clamp(100, 10_000);

        // Leaving darkness must need at least as much light as entering it.
        if self.brightness_lux < self.darkness_lux {
            self.brightness_lux = self.darkness_lux;
        }
        if self.cooling_above_c < self.heating_below_c {
            self.cooling_above_c = self.heating_below_c;
        }

        self.blink_repeats = self.blink_repeats.min(20);
        self.blink_interval_ms = self.blink_interval_ms.min(1_000);
    }

    pub fn slow_tick_ms(&self) -> u64 {
        self.tick_ms.saturating_mul(self.slow_tick_every as u64)
    }

    /// Cooldown expressed in slow sub-ticks.
    pub fn cooldown_ticks(&self) -> u32 {
        let slow_ms = self.slow_tick_ms().max(1);
        let ticks = self.cooldown_secs.saturating_mul(1_000) / slow_ms;
        ticks.try_into().unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub morning: String,
    pub away: String,
    pub night: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            morning: "06:20".to_string(),
            away: "07:40".to_string(),
            night: "00:30".to_string(),
        }
    }
}

impl ScheduleConfig {
    pub fn build(&self) -> Result<DailySchedule, ScheduleError> {
        DailySchedule::from_times(&self.morning, &self.away, &self.night)
    }
}

/// An external program plus its argument template. Arguments may contain
/// `{key}` placeholders filled in by [`CommandSpec::render`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    pub fn render(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{key}}}"), value)
                })
            })
            .collect()
    }

    pub fn display(&self, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub player_url: String,
    pub auth1_url: String,
    pub auth2_url: String,
    pub station_list_url: String,
    pub stream_lookup_url: String,
    pub request_timeout_ms: u64,
    pub auth_attempts: u32,
    pub auth_retry_delay_ms: u64,
    pub key_extractor: CommandSpec,
    pub fetcher: CommandSpec,
    pub decoder: CommandSpec,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            player_url: "http://radiko.jp/apps/js/flash/myplayer-release.swf".to_string(),
            auth1_url: "https://radiko.jp/v2/api/auth1_fms".to_string(),
            auth2_url: "https://radiko.jp/v2/api/auth2_fms".to_string(),
            station_list_url: "http://radiko.jp/v2/api/program/today?area_id={area}".to_string(),
            stream_lookup_url: "http://radiko.jp/v2/station/stream/{channel}.xml".to_string(),
            request_timeout_ms: 15_000,
            auth_attempts: 50,
            auth_retry_delay_ms: 10_000,
            key_extractor: CommandSpec::new(
                "swfextract",
                &["-b", "12", "/dev/stdin", "-o", "/dev/stdout"],
            ),
            fetcher: CommandSpec::new(
                "rtmpdump",
                &[
                    "-v", "-q", "-r", "{rtmp}", "--app", "{app}", "--playpath", "{playpath}",
                    "-W", "{player_url}", "-C", "S:", "-C", "S:", "-C", "S:", "-C",
                    "S:{token}", "--live",
                ],
            ),
            decoder: CommandSpec::new(
                "mplayer",
                &[
                    "-nolirc", "-quiet", "-ao", "alsa", "-channels", "2", "-af", "pan=1:1", "-",
                ],
            ),
        }
    }
}

impl MediaConfig {
    pub fn sanitize(&mut self) {
        self.auth_attempts = self.auth_attempts.clamp(1, 1_000);
        self.auth_retry_delay_ms = self.auth_retry_delay_ms.min(600_000);
        self.request_timeout_ms = self.request_timeout_ms.clamp(1_000, 120_000);
    }

    /// Lets the fetcher and decoder talk; used when debugging.
    pub fn drop_quiet_flags(&mut self) {
        self.fetcher.args.retain(|arg| arg != "-q");
        self.decoder.args.retain(|arg| arg != "-quiet");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplianceConfig {
    pub sender: CommandSpec,
    pub heating: String,
    pub cooling: String,
    pub climate_off: String,
    pub light_toggle: String,
    pub light_off: String,
}

impl Default for ApplianceConfig {
    fn default() -> Self {
        Self {
            sender: CommandSpec::new(
                "python3",
                &["irrp.py", "-p", "-g13", "-f", "codes", "{name}"],
            ),
            heating: "aircon-heat".to_string(),
            cooling: "aircon-cool".to_string(),
            climate_off: "aircon-off".to_string(),
            light_toggle: "light-toggle".to_string(),
            light_off: "light-off".to_string(),
        }
    }
}

impl ApplianceConfig {
    pub fn command_name(&self, command: crate::ApplianceCommand) -> &str {
        use crate::ApplianceCommand;
        match command {
            ApplianceCommand::Heating => &self.heating,
            ApplianceCommand::Cooling => &self.cooling,
            ApplianceCommand::ClimateOff => &self.climate_off,
            ApplianceCommand::LightToggle => &self.light_toggle,
            ApplianceCommand::LightOff => &self.light_off,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GpioConfig {
    pub pigpio_host: String,
    pub pigpio_port: u16,
    pub channel_switch_pin: u8,
    pub override_switch_pin: u8,
    /// Indicator pins, least significant bit first.
    pub indicator_pins: Vec<u8>,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            pigpio_host: "127.0.0.1".to_string(),
            pigpio_port: 8888,
            channel_switch_pin: 6,
            override_switch_pin: 5,
            indicator_pins: vec![27, 22, 18, 17],
        }
    }
}

impl GpioConfig {
    pub fn sanitize(&mut self) {
        self.indicator_pins.retain(|pin| *pin <= 53);
        self.indicator_pins.truncate(8);
        if self.channel_switch_pin > 53 {
            self.channel_switch_pin = 6;
        }
        if self.override_switch_pin > 53 {
            self.override_switch_pin = 5;
        }
        if self.pigpio_port == 0 {
            self.pigpio_port = 8888;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SensorConfig {
    /// Illuminance readers in fallback order. Each prints one number (lux).
    pub light: Vec<CommandSpec>,
    /// Climate readers in fallback order. Each prints `temperature humidity`
    /// (Celsius, percent), optionally with pressure in between.
    pub climate: Vec<CommandSpec>,
    pub read_timeout_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            light: vec![CommandSpec::new("python3", &["tsl2572.py", "0x39"])],
            climate: vec![
                CommandSpec::new("python3", &["bme280.py", "0x76"]),
                CommandSpec::new("python3", &["bme280.py", "0x77"]),
            ],
            read_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub control: ControlConfig,
    pub schedule: ScheduleConfig,
    pub media: MediaConfig,
    pub appliance: ApplianceConfig,
    pub gpio: GpioConfig,
    pub sensors: SensorConfig,
    pub timezone: String,
    pub log_dir: String,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            schedule: ScheduleConfig::default(),
            media: MediaConfig::default(),
            appliance: ApplianceConfig::default(),
            gpio: GpioConfig::default(),
            sensors: SensorConfig::default(),
            timezone: "Asia/Tokyo".to_string(),
            log_dir: "./logs".to_string(),
        }
    }
}

impl RoomConfig {
    pub fn sanitize(&mut self) {
        self.control.sanitize();
        self.media.sanitize();
        self.gpio.sanitize();
    }
}

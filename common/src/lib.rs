pub mod comfort;
pub mod config;
pub mod engine;
pub mod indicator;
pub mod schedule;
pub mod switch;
pub mod types;

pub use config::{
    ApplianceConfig, CommandSpec, ControlConfig, GpioConfig, MediaConfig, RoomConfig,
    ScheduleConfig, SensorConfig,
};
pub use engine::{ControlAction, RoomEngine, FIRST_CHANNEL, SILENT_CHANNEL};
pub use indicator::{Indicator, OutputBank, OutputError};
pub use schedule::{DailySchedule, ScheduleError};
pub use switch::DebouncedSwitch;
pub use types::{
    ApplianceCommand, EnvironmentSample, Gesture, OperatingMode, PipelineHealth, RoomStatus,
    ScheduledEvent,
};

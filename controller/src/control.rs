use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use room_common::{
    ControlAction, ControlConfig, DebouncedSwitch, EnvironmentSample, Indicator, OperatingMode,
    RoomEngine, ScheduledEvent,
};
use room_sensor::SensorBundle;
use tracing::{error, info, warn};

use crate::{
    appliance::ApplianceActuator,
    backend::Session,
    clock::monotonic_ms,
    hardware::Panel,
    media::MediaSupervisor,
};

/// Messages from the other threads. Only the control loop mutates room
/// state; everything else talks to it through this queue.
#[derive(Debug)]
pub enum ControlCommand {
    Scheduled(ScheduledEvent),
    Authenticated(Session),
    AuthFailed(String),
    Shutdown,
}

pub struct ControlLoop {
    engine: RoomEngine,
    media: MediaSupervisor,
    panel: Box<dyn Panel>,
    indicator: Indicator,
    appliance: ApplianceActuator,
    sensors: SensorBundle,
    channel_switch: DebouncedSwitch,
    manual_switch: DebouncedSwitch,
    commands: Receiver<ControlCommand>,
    tick: Duration,
    logged_mode: OperatingMode,
}

impl ControlLoop {
    pub fn new(
        config: ControlConfig,
        media: MediaSupervisor,
        panel: Box<dyn Panel>,
        appliance: ApplianceActuator,
        sensors: SensorBundle,
        commands: Receiver<ControlCommand>,
    ) -> Self {
        let engine = RoomEngine::new(config);
        let long_press_ms = engine.config.long_press_ms;
        let tick = Duration::from_millis(engine.config.tick_ms);
        let logged_mode = engine.mode();
        Self {
            engine,
            media,
            panel,
            indicator: Indicator::new(),
            appliance,
            sensors,
            channel_switch: DebouncedSwitch::new(long_press_ms),
            manual_switch: DebouncedSwitch::new(long_press_ms),
            commands,
            tick,
            logged_mode,
        }
    }

    /// Runs until a shutdown command arrives or a fatal error occurs. The
    /// ordered shutdown runs in both cases.
    pub fn run(mut self) -> anyhow::Result<()> {
        info!(tick_ms = self.tick.as_millis() as u64, "control loop started");

        let result = loop {
            let started = Instant::now();
            match self.step() {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(err) => {
                    self.dump_status(&err);
                    break Err(err);
                }
            }
            if let Some(rest) = self.tick.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        };

        self.shutdown();
        result
    }

    /// One fast tick. Returns false when the loop should stop.
    pub(crate) fn step(&mut self) -> anyhow::Result<bool> {
        loop {
            match self.commands.try_recv() {
                Ok(ControlCommand::Shutdown) | Err(TryRecvError::Disconnected) => return Ok(false),
                Ok(command) => self.handle_command(command)?,
                Err(TryRecvError::Empty) => break,
            }
        }

        let levels = self
            .panel
            .read_switches()
            .context("failed to read switches")?;
        let now_ms = monotonic_ms();
        let channel = self.channel_switch.poll(levels.channel, now_ms);
        let manual = self.manual_switch.poll(levels.manual, now_ms);
        let actions = self.engine.on_gestures(channel, manual);
        self.execute(actions)?;

        if self.engine.tick() {
            self.slow_tick()?;
        }

        let bits = self.engine.indicator_bits(self.media.current_channel());
        self.indicator
            .set_state(self.panel.outputs(), bits)
            .context("failed to update indicator")?;

        Ok(true)
    }

    fn handle_command(&mut self, command: ControlCommand) -> anyhow::Result<()> {
        match command {
            ControlCommand::Scheduled(event) => {
                info!(event = event.as_str(), "applying scheduled event");
                let actions = self.engine.apply_event(event);
                self.execute(actions)
            }
            ControlCommand::Authenticated(session) => {
                self.media.install_session(session);
                let actions = self.engine.on_authenticated();
                self.execute(actions)
            }
            ControlCommand::AuthFailed(reason) => Err(anyhow!("authentication exhausted: {reason}")),
            ControlCommand::Shutdown => Ok(()),
        }
    }

    fn slow_tick(&mut self) -> anyhow::Result<()> {
        let health = self.media.health();
        let sample = match self.sensors.sample() {
            Ok(sample) => Some(sample),
            Err(err) => {
                warn!("environment sample failed, keeping previous: {err}");
                None
            }
        };
        if let Some(EnvironmentSample {
            illuminance,
            temperature,
            humidity,
            effective_temperature,
        }) = sample
        {
            tracing::debug!(
                illuminance,
                temperature,
                humidity,
                effective_temperature,
                mode = self.engine.mode().as_str(),
                "environment"
            );
        }

        let actions = self.engine.slow_tick(health, sample);
        self.execute(actions)
    }

    fn execute(&mut self, actions: Vec<ControlAction>) -> anyhow::Result<()> {
        let mode = self.engine.mode();
        if mode != self.logged_mode {
            info!(from = self.logged_mode.as_str(), to = mode.as_str(), "mode changed");
            self.logged_mode = mode;
        }

        for action in actions {
            match action {
                ControlAction::NextChannel => {
                    if let Err(err) = self.media.next_channel() {
                        warn!("next channel failed: {err}");
                    }
                }
                ControlAction::ChangeChannel(index) => {
                    if let Err(err) = self.media.change_channel(index) {
                        warn!(index, "channel change failed: {err}");
                    }
                }
                ControlAction::StopMedia => self.media.stop(),
                ControlAction::RecoverMedia => {
                    warn!(
                        channel = self.media.current_channel(),
                        "media pipeline died, restarting"
                    );
                    if let Err(err) = self.media.next_channel() {
                        warn!("media restart failed: {err}");
                    }
                }
                ControlAction::Appliance(command) => self.appliance.send(command),
                ControlAction::Blink {
                    pattern,
                    mask,
                    interval_ms,
                    repeats,
                } => {
                    self.indicator
                        .blink(
                            self.panel.outputs(),
                            pattern,
                            mask,
                            Duration::from_millis(interval_ms),
                            repeats,
                        )
                        .context("failed to blink indicator")?;
                }
            }
        }

        Ok(())
    }

    fn dump_status(&mut self, err: &anyhow::Error) {
        let status = self.engine.status(self.media.health());
        let status = serde_json::to_string(&status).unwrap_or_else(|e| format!("<{e}>"));
        let appliance = serde_json::to_string(&self.appliance.diagnostics())
            .unwrap_or_else(|e| format!("<{e}>"));
        error!(status = %status, appliance = %appliance, "control loop failed: {err:#}");
    }

    /// Media first, then the panel.
    fn shutdown(&mut self) {
        self.media.stop();
        if let Err(err) = self.panel.release() {
            warn!("failed to release gpio panel: {err}");
        }
        info!("control loop stopped");
    }
}

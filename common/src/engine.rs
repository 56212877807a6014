use crate::{
    config::ControlConfig,
    types::{
        ApplianceCommand, EnvironmentSample, Gesture, OperatingMode, PipelineHealth, RoomStatus,
        ScheduledEvent,
    },
};

/// Channel index that means "no audio".
pub const SILENT_CHANNEL: usize = 0;
/// First real channel, used whenever playback resumes.
pub const FIRST_CHANNEL: usize = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlAction {
    NextChannel,
    ChangeChannel(usize),
    StopMedia,
    /// Pipeline died while it should be playing.
    RecoverMedia,
    Appliance(ApplianceCommand),
    Blink {
        pattern: u32,
        mask: u32,
        interval_ms: u64,
        repeats: u32,
    },
}

/// The room's operating-mode state machine.
///
/// Owns mode, cooldown, override flag and the last environment sample. It
/// performs no I/O: every entry point returns the actions the caller must
/// carry out, in order.
#[derive(Debug, Clone)]
pub struct RoomEngine {
    pub config: ControlConfig,

    mode: OperatingMode,
    resume_locked: bool,
    manual_override: bool,

    cooldown_ticks: u32,
    fast_ticks: u32,

    sample: Option<EnvironmentSample>,
}

impl RoomEngine {
    pub fn new(mut config: ControlConfig) -> Self {
        config.sanitize();
        // First call to `tick` starts a slow cycle so the room is sampled
        // right after startup.
        let fast_ticks = config.slow_tick_every.saturating_sub(1);
        Self {
            config,
            mode: OperatingMode::Active,
            resume_locked: false,
            manual_override: false,
            cooldown_ticks: 0,
            fast_ticks,
            sample: None,
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    #[cfg(test)]
    fn is_resume_locked(&self) -> bool {
        self.resume_locked
    }

    pub fn manual_override(&self) -> bool {
        self.manual_override
    }

    pub fn cooldown_ticks(&self) -> u32 {
        self.cooldown_ticks
    }

    #[cfg(test)]
    fn last_sample(&self) -> Option<EnvironmentSample> {
        self.sample
    }

    /// Counts one fast tick. Returns true when a slow sub-tick is due.
    pub fn tick(&mut self) -> bool {
        self.fast_ticks = self.fast_ticks.saturating_add(1);
        if self.fast_ticks >= self.config.slow_tick_every {
            self.fast_ticks = 0;
            true
        } else {
            false
        }
    }

    pub fn on_gestures(&mut self, channel: Gesture, manual: Gesture) -> Vec<ControlAction> {
        let mut actions = Vec::new();

        match channel {
            Gesture::Short => actions.push(ControlAction::NextChannel),
            Gesture::Long => {
                actions.push(ControlAction::Blink {
                    pattern: self.config.blink_pattern as u32,
                    mask: self.config.blink_mask as u32,
                    interval_ms: self.config.blink_interval_ms,
                    repeats: self.config.blink_repeats,
                });
                actions.push(ControlAction::ChangeChannel(SILENT_CHANNEL));
            }
            Gesture::None => {}
        }

        if manual == Gesture::Short {
            self.manual_override = !self.manual_override;
        }

        actions
    }

    pub fn on_authenticated(&mut self) -> Vec<ControlAction> {
        if self.mode == OperatingMode::Active {
            vec![ControlAction::ChangeChannel(FIRST_CHANNEL)]
        } else {
            Vec::new()
        }
    }

    /// Slow sub-tick. `sample` is `None` when every sensor failed this
    /// cycle; the previous sample is kept and no reaction is taken.
    pub fn slow_tick(
        &mut self,
        health: PipelineHealth,
        sample: Option<EnvironmentSample>,
    ) -> Vec<ControlAction> {
        let mut actions = Vec::new();

        // Night keeps sampling for the morning event but freezes every
        // reaction, cooldown included.
        if self.mode == OperatingMode::Night {
            if sample.is_some() {
                self.sample = sample;
            }
            return actions;
        }

        if self.mode == OperatingMode::Active && !health.alive && health.channel != SILENT_CHANNEL
        {
            actions.push(ControlAction::RecoverMedia);
        }

        if let Some(sample) = sample {
            self.sample = Some(sample);
            self.react(sample, &mut actions);
        }

        self.cooldown_ticks = self.cooldown_ticks.saturating_sub(1);
        actions
    }

    pub fn apply_event(&mut self, event: ScheduledEvent) -> Vec<ControlAction> {
        let mut actions = Vec::new();

        match event {
            ScheduledEvent::Morning => {
                if let Some(sample) = self.sample {
                    if sample.illuminance < self.config.open_blinds_lux {
                        actions.push(ControlAction::Appliance(ApplianceCommand::LightToggle));
                    }
                    self.climate_on(sample, &mut actions);
                }
                actions.push(ControlAction::ChangeChannel(FIRST_CHANNEL));
                self.mode = OperatingMode::Active;
                self.resume_locked = false;
            }
            ScheduledEvent::Night => {
                self.shut_down_room(&mut actions);
                self.mode = OperatingMode::Night;
                self.resume_locked = true;
            }
            ScheduledEvent::Away => {
                self.shut_down_room(&mut actions);
                if self.mode != OperatingMode::Night {
                    self.mode = OperatingMode::Suspended;
                }
                self.resume_locked = true;
            }
        }

        actions
    }

    /// Indicator bits: channel in bits 0-2, manual override in bit 3.
    pub fn indicator_bits(&self, channel: usize) -> u32 {
        (channel as u32 & 0b111) | ((self.manual_override as u32) << 3)
    }

    pub fn status(&self, health: PipelineHealth) -> RoomStatus {
        RoomStatus {
            mode: self.mode.as_str(),
            resume_locked: self.resume_locked,
            manual_override: self.manual_override,
            cooldown_ticks: self.cooldown_ticks,
            channel: health.channel,
            pipeline_alive: health.alive,
            illuminance: self.sample.map(|s| s.illuminance),
            temperature: self.sample.map(|s| s.temperature),
            humidity: self.sample.map(|s| s.humidity),
            effective_temperature: self.sample.map(|s| s.effective_temperature),
        }
    }

    fn react(&mut self, sample: EnvironmentSample, actions: &mut Vec<ControlAction>) {
        match self.mode {
            OperatingMode::Active => {
                if sample.illuminance < self.config.darkness_lux {
                    self.shut_down_room(actions);
                    self.mode = OperatingMode::Suspended;
                } else if self.cooldown_ticks == 0 {
                    if sample.effective_temperature < self.config.heating_below_c {
                        self.fire_climate(ApplianceCommand::Heating, actions);
                    } else if sample.effective_temperature > self.config.cooling_above_c {
                        self.fire_climate(ApplianceCommand::Cooling, actions);
                    }
                }
            }
            OperatingMode::Suspended => {
                if !self.resume_locked && sample.illuminance > self.config.brightness_lux {
                    self.climate_on(sample, actions);
                    actions.push(ControlAction::ChangeChannel(FIRST_CHANNEL));
                    self.mode = OperatingMode::Active;
                }
            }
            OperatingMode::Night => {}
        }
    }

    fn climate_on(&mut self, sample: EnvironmentSample, actions: &mut Vec<ControlAction>) {
        if sample.effective_temperature < self.config.heating_below_c {
            self.fire_climate(ApplianceCommand::Heating, actions);
        } else if sample.effective_temperature > self.config.cooling_above_c {
            self.fire_climate(ApplianceCommand::Cooling, actions);
        }
    }

    fn fire_climate(&mut self, command: ApplianceCommand, actions: &mut Vec<ControlAction>) {
        actions.push(ControlAction::Appliance(command));
        self.cooldown_ticks = self.config.cooldown_ticks();
    }

    fn shut_down_room(&mut self, actions: &mut Vec<ControlAction>) {
        actions.push(ControlAction::StopMedia);
        actions.push(ControlAction::Appliance(ApplianceCommand::ClimateOff));
        actions.push(ControlAction::Appliance(ApplianceCommand::LightOff));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const PLAYING: PipelineHealth = PipelineHealth {
        alive: true,
        channel: 3,
    };
    const SILENT: PipelineHealth = PipelineHealth {
        alive: false,
        channel: 0,
    };

    fn engine() -> RoomEngine {
        RoomEngine::new(ControlConfig::default())
    }

    /// 24 C at 50 % is comfortable: effective temperature about 22.5.
    fn comfortable(lux: f32) -> EnvironmentSample {
        EnvironmentSample::new(lux, 24.0, 50.0)
    }

    fn cold(lux: f32) -> EnvironmentSample {
        EnvironmentSample::new(lux, 10.0, 50.0)
    }

    fn hot(lux: f32) -> EnvironmentSample {
        EnvironmentSample::new(lux, 33.0, 70.0)
    }

    fn room_off() -> Vec<ControlAction> {
        vec![
            ControlAction::StopMedia,
            ControlAction::Appliance(ApplianceCommand::ClimateOff),
            ControlAction::Appliance(ApplianceCommand::LightOff),
        ]
    }

    #[test]
    fn first_tick_starts_a_slow_cycle() {
        let mut engine = engine();

        assert!(engine.tick());
        for _ in 0..99 {
            assert!(!engine.tick());
        }
        assert!(engine.tick());
    }

    #[test]
    fn darkness_suspends_active_room() {
        let mut engine = engine();
        let mut outputs = Vec::new();

        for lux in [25.0, 25.0, 8.0, 8.0] {
            outputs.push(engine.slow_tick(PLAYING, Some(comfortable(lux))));
            if outputs.len() == 3 {
                assert_eq!(engine.mode(), OperatingMode::Suspended);
            }
        }

        assert!(outputs[0].is_empty());
        assert!(outputs[1].is_empty());
        assert_eq!(outputs[2], room_off());
        assert!(outputs[3].is_empty());
        assert_eq!(engine.mode(), OperatingMode::Suspended);
    }

    #[test]
    fn brightness_resumes_with_hysteresis() {
        let mut engine = engine();
        engine.slow_tick(PLAYING, Some(comfortable(5.0)));
        assert_eq!(engine.mode(), OperatingMode::Suspended);

        // Between the thresholds nothing changes.
        assert!(engine.slow_tick(SILENT, Some(comfortable(15.0))).is_empty());
        assert!(engine.slow_tick(SILENT, Some(comfortable(20.0))).is_empty());
        assert_eq!(engine.mode(), OperatingMode::Suspended);

        let actions = engine.slow_tick(SILENT, Some(comfortable(21.0)));
        assert_eq!(actions, vec![ControlAction::ChangeChannel(FIRST_CHANNEL)]);
        assert_eq!(engine.mode(), OperatingMode::Active);
    }

    #[test]
    fn resume_turns_climate_on_for_cold_room() {
        let mut engine = engine();
        engine.slow_tick(PLAYING, Some(cold(5.0)));

        let actions = engine.slow_tick(SILENT, Some(cold(30.0)));

        assert_eq!(
            actions,
            vec![
                ControlAction::Appliance(ApplianceCommand::Heating),
                ControlAction::ChangeChannel(FIRST_CHANNEL),
            ]
        );
        assert_eq!(engine.cooldown_ticks(), 719);
    }

    #[test]
    fn cold_room_fires_heating_once_per_cooldown() {
        let mut engine = engine();

        let first = engine.slow_tick(PLAYING, Some(cold(50.0)));
        let second = engine.slow_tick(PLAYING, Some(cold(50.0)));

        assert_eq!(first, vec![ControlAction::Appliance(ApplianceCommand::Heating)]);
        assert!(second.is_empty());
        assert_eq!(engine.cooldown_ticks(), 718);
    }

    #[test]
    fn hot_room_fires_cooling() {
        let mut engine = engine();

        let actions = engine.slow_tick(PLAYING, Some(hot(50.0)));

        assert_eq!(actions, vec![ControlAction::Appliance(ApplianceCommand::Cooling)]);
    }

    #[test]
    fn heating_fires_again_after_cooldown_elapses() {
        let config = ControlConfig {
            cooldown_secs: 15,
            ..ControlConfig::default()
        };
        let mut engine = RoomEngine::new(config);
        assert_eq!(engine.config.cooldown_ticks(), 3);

        let fired: Vec<bool> = (0..7)
            .map(|_| !engine.slow_tick(PLAYING, Some(cold(50.0))).is_empty())
            .collect();

        assert_eq!(fired, vec![true, false, false, true, false, false, true]);
    }

    #[test]
    fn dead_pipeline_is_recovered_only_while_active() {
        let mut engine = engine();
        let dead = PipelineHealth {
            alive: false,
            channel: 2,
        };

        assert_eq!(engine.slow_tick(dead, None), vec![ControlAction::RecoverMedia]);
        assert!(engine.slow_tick(SILENT, None).is_empty());

        engine.apply_event(ScheduledEvent::Away);
        assert!(engine.slow_tick(dead, None).is_empty());
    }

    #[test]
    fn failed_sample_keeps_previous_and_takes_no_action() {
        let mut engine = engine();
        engine.slow_tick(PLAYING, Some(comfortable(42.0)));

        assert!(engine.slow_tick(PLAYING, None).is_empty());
        assert_eq!(engine.last_sample().map(|s| s.illuminance), Some(42.0));
    }

    #[test]
    fn night_stops_everything_and_freezes_automation() {
        let mut engine = engine();
        engine.slow_tick(PLAYING, Some(cold(50.0)));
        let cooldown = engine.cooldown_ticks();

        assert_eq!(engine.apply_event(ScheduledEvent::Night), room_off());
        assert_eq!(engine.mode(), OperatingMode::Night);

        assert!(engine.slow_tick(SILENT, Some(cold(500.0))).is_empty());
        assert_eq!(engine.mode(), OperatingMode::Night);
        assert_eq!(engine.cooldown_ticks(), cooldown);
    }

    #[test]
    fn away_suspends_without_auto_resume() {
        let mut engine = engine();

        assert_eq!(engine.apply_event(ScheduledEvent::Away), room_off());
        assert_eq!(engine.mode(), OperatingMode::Suspended);
        assert!(engine.is_resume_locked());

        assert!(engine.slow_tick(SILENT, Some(comfortable(300.0))).is_empty());
        assert_eq!(engine.mode(), OperatingMode::Suspended);
    }

    #[test]
    fn morning_in_dark_room_toggles_light_and_resumes() {
        let mut engine = engine();
        engine.slow_tick(PLAYING, Some(cold(300.0)));
        engine.apply_event(ScheduledEvent::Night);
        for _ in 0..10 {
            assert!(engine.slow_tick(SILENT, Some(cold(2.0))).is_empty());
        }
        assert_eq!(engine.last_sample().map(|s| s.illuminance), Some(2.0));

        let actions = engine.apply_event(ScheduledEvent::Morning);

        assert_eq!(
            actions,
            vec![
                ControlAction::Appliance(ApplianceCommand::LightToggle),
                ControlAction::Appliance(ApplianceCommand::Heating),
                ControlAction::ChangeChannel(FIRST_CHANNEL),
            ]
        );
        assert_eq!(engine.mode(), OperatingMode::Active);
        assert!(!engine.is_resume_locked());
    }

    #[test]
    fn morning_without_sample_only_resumes_media() {
        let mut engine = engine();
        engine.apply_event(ScheduledEvent::Night);

        assert_eq!(
            engine.apply_event(ScheduledEvent::Morning),
            vec![ControlAction::ChangeChannel(FIRST_CHANNEL)]
        );
    }

    #[test]
    fn long_press_blinks_then_silences() {
        let mut engine = engine();

        let actions = engine.on_gestures(Gesture::Long, Gesture::None);

        assert_eq!(
            actions,
            vec![
                ControlAction::Blink {
                    pattern: 0b111,
                    mask: 0b111,
                    interval_ms: 150,
                    repeats: 3,
                },
                ControlAction::ChangeChannel(SILENT_CHANNEL),
            ]
        );
        assert_eq!(
            engine.on_gestures(Gesture::Short, Gesture::None),
            vec![ControlAction::NextChannel]
        );
    }

    #[test]
    fn override_switch_toggles_indicator_bit() {
        let mut engine = engine();
        assert_eq!(engine.indicator_bits(5), 0b0101);

        assert!(engine.on_gestures(Gesture::None, Gesture::Short).is_empty());
        assert_eq!(engine.indicator_bits(5), 0b1101);
        assert_eq!(engine.indicator_bits(9), 0b1001);

        engine.on_gestures(Gesture::None, Gesture::Short);
        assert!(!engine.manual_override());
    }

    #[test]
    fn authentication_starts_playback_only_when_active() {
        let mut engine = engine();
        assert_eq!(
            engine.on_authenticated(),
            vec![ControlAction::ChangeChannel(FIRST_CHANNEL)]
        );

        engine.apply_event(ScheduledEvent::Night);
        assert!(engine.on_authenticated().is_empty());
    }

    #[test]
    fn status_reports_snapshot() {
        let mut engine = engine();
        engine.slow_tick(PLAYING, Some(comfortable(25.0)));

        let status = engine.status(PLAYING);
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["mode"], "ACTIVE");
        assert_eq!(json["channel"], 3);
        assert_eq!(json["pipelineAlive"], true);
        assert_eq!(json["illuminance"], 25.0);
    }

    proptest! {
        #[test]
        fn samples_alone_never_leave_night(
            readings in proptest::collection::vec((0.0f32..2_000.0, -10.0f32..45.0, 0.0f32..100.0), 1..50)
        ) {
            let mut engine = engine();
            engine.apply_event(ScheduledEvent::Night);

            for (lux, temp, humidity) in readings {
                let actions = engine.slow_tick(SILENT, Some(EnvironmentSample::new(lux, temp, humidity)));
                prop_assert!(actions.is_empty());
                prop_assert_eq!(engine.mode(), OperatingMode::Night);
            }
        }

        #[test]
        fn cooldown_never_underflows_and_gates_climate(
            readings in proptest::collection::vec((15.0f32..2_000.0, -10.0f32..45.0, 0.0f32..100.0), 1..100)
        ) {
            let config = ControlConfig { cooldown_secs: 25, ..ControlConfig::default() };
            let mut engine = RoomEngine::new(config);
            let window = engine.config.cooldown_ticks() as usize;
            let mut last_fired: Option<usize> = None;

            for (tick, (lux, temp, humidity)) in readings.into_iter().enumerate() {
                let actions = engine.slow_tick(PLAYING, Some(EnvironmentSample::new(lux, temp, humidity)));
                let climate = actions.iter().any(|action| matches!(
                    action,
                    ControlAction::Appliance(ApplianceCommand::Heating | ApplianceCommand::Cooling)
                ));
                if climate {
                    if let Some(previous) = last_fired {
                        prop_assert!(tick - previous >= window);
                    }
                    last_fired = Some(tick);
                }
                prop_assert!(engine.cooldown_ticks() as usize <= window);
            }
        }
    }
}

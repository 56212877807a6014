use std::{
    path::Path,
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
};

use anyhow::Context;
use room_common::RoomConfig;
use room_sensor::SensorBundle;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::{
    appliance::ApplianceActuator,
    auth::spawn_authenticator,
    backend::RadikoBackend,
    clock::parse_timezone,
    control::{ControlCommand, ControlLoop},
    hardware::{Panel, PigpioPanel, SimulatedPanel},
    logging,
    media::MediaSupervisor,
    store::{apply_overrides, ConfigStore},
    trigger::spawn_schedule_trigger,
};

pub async fn run() -> anyhow::Result<ExitCode> {
    let debug_mode = std::env::var_os("DEBUG").is_some();

    let store = ConfigStore::from_env();
    let (mut config, load_error) = match store.load().await {
        Ok(config) => (config, None),
        Err(err) => (RoomConfig::default(), Some(err)),
    };
    let notes = apply_overrides(&mut config, |key| std::env::var(key).ok());

    let log_file = logging::init(Path::new(&config.log_dir), debug_mode);
    if let Some(err) = load_error {
        warn!("failed to load config from {}: {err:#}", store.path().display());
    }
    for note in notes {
        warn!("{note}");
    }
    info!(
        log_file = ?log_file,
        debug = debug_mode,
        timezone = %config.timezone,
        "room controller starting"
    );

    let tz = parse_timezone(&config.timezone).unwrap_or(chrono_tz::Asia::Tokyo);
    let schedule = config.schedule.build().context("invalid schedule")?;

    let (commands, commands_rx) = mpsc::channel();
    let stop = Arc::new(AtomicBool::new(false));

    spawn_schedule_trigger(schedule, tz, commands.clone(), stop.clone())
        .context("failed to start schedule thread")?;
    spawn_authenticator(config.media.clone(), commands.clone(), stop.clone())
        .context("failed to start auth thread")?;

    let (done_tx, mut done_rx) = oneshot::channel();
    thread::Builder::new()
        .name("control-loop".to_string())
        .spawn(move || {
            let result = build_control_loop(config, debug_mode, commands_rx).and_then(ControlLoop::run);
            let _ = done_tx.send(result);
        })
        .context("failed to start control loop")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    let signal = tokio::select! {
        outcome = &mut done_rx => {
            stop.store(true, Ordering::Relaxed);
            return Ok(ExitCode::from(outcome_code(outcome)));
        }
        _ = &mut ctrl_c => StopSignal::Interrupt,
        _ = sigterm.recv() => StopSignal::Terminate,
    };

    warn!(signal = signal.as_str(), "shutting down");
    stop.store(true, Ordering::Relaxed);
    let _ = commands.send(ControlCommand::Shutdown);
    if let Ok(Err(err)) = done_rx.await {
        error!("control loop failed during shutdown: {err:#}");
    }
    Ok(ExitCode::from(signal.exit_code()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopSignal {
    Interrupt,
    Terminate,
}

impl StopSignal {
    fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }

    /// SIGTERM is an orderly stop; Ctrl-C counts as an abort.
    fn exit_code(self) -> u8 {
        match self {
            Self::Interrupt => 1,
            Self::Terminate => 0,
        }
    }
}

fn outcome_code(outcome: Result<anyhow::Result<()>, oneshot::error::RecvError>) -> u8 {
    match outcome {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            error!("fatal: {err:#}");
            1
        }
        Err(_) => {
            error!("control loop exited without a result");
            1
        }
    }
}

/// Everything owned by the control loop is created on its own thread: the
/// blocking HTTP client must not live inside the async runtime.
fn build_control_loop(
    mut config: RoomConfig,
    debug: bool,
    commands: mpsc::Receiver<ControlCommand>,
) -> anyhow::Result<ControlLoop> {
    if debug {
        config.media.drop_quiet_flags();
    }
    let backend = RadikoBackend::new(config.media.clone()).context("failed to build backend")?;
    let media = MediaSupervisor::new(Box::new(backend), &config.media);

    let (panel, appliance, sensors): (Box<dyn Panel>, _, _) = if debug {
        info!("DEBUG set: simulated gpio, sensors and appliance sender");
        (
            Box::new(SimulatedPanel::new(config.gpio.indicator_pins.len())),
            ApplianceActuator::disabled(config.appliance.clone()),
            SensorBundle::simulated(),
        )
    } else {
        (
            Box::new(PigpioPanel::open(&config.gpio).context("failed to open gpio panel")?),
            ApplianceActuator::new(config.appliance.clone()),
            SensorBundle::from_config(&config.sensors),
        )
    };

    Ok(ControlLoop::new(
        config.control,
        media,
        panel,
        appliance,
        sensors,
        commands,
    ))
}

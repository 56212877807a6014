use std::{
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use room_common::{ApplianceCommand, ApplianceConfig, CommandSpec};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::monotonic_ms;

/// IR blasters drop back-to-back frames.
const MIN_SEND_INTERVAL_MS: u64 = 300;

enum ApplianceBackend {
    Command(CommandSpec),
    Disabled,
}

/// Sends appliance commands through an external IR sender program.
pub struct ApplianceActuator {
    backend: ApplianceBackend,
    names: ApplianceConfig,
    last_send_ms: Option<u64>,
    sent_commands: u64,
    failed_commands: u64,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplianceDiagnostics {
    pub enabled: bool,
    #[serde(rename = "minSendIntervalMs")]
    pub min_send_interval_ms: u64,
    #[serde(rename = "lastSendMs")]
    pub last_send_ms: Option<u64>,
    #[serde(rename = "sentCommands")]
    pub sent_commands: u64,
    #[serde(rename = "failedCommands")]
    pub failed_commands: u64,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}

impl ApplianceActuator {
    pub fn new(config: ApplianceConfig) -> Self {
        Self::with_backend(ApplianceBackend::Command(config.sender.clone()), config)
    }

    pub fn disabled(config: ApplianceConfig) -> Self {
        Self::with_backend(ApplianceBackend::Disabled, config)
    }

    fn with_backend(backend: ApplianceBackend, names: ApplianceConfig) -> Self {
        Self {
            backend,
            names,
            last_send_ms: None,
            sent_commands: 0,
            failed_commands: 0,
            last_error: None,
        }
    }

    /// Fire-and-forget: failures are logged and counted, never returned.
    pub fn send(&mut self, command: ApplianceCommand) {
        let name = self.names.command_name(command).to_string();

        let result = match &self.backend {
            ApplianceBackend::Disabled => {
                info!(command = %name, "appliance sender disabled, dropping command");
                return;
            }
            ApplianceBackend::Command(spec) => {
                let spec = spec.clone();
                self.rate_limit();
                let result = run_sender(&spec, &name);
                self.last_send_ms = Some(monotonic_ms());
                result
            }
        };

        match result {
            Ok(()) => {
                info!(command = %name, "appliance command sent");
                self.sent_commands = self.sent_commands.saturating_add(1);
                self.last_error = None;
            }
            Err(err) => {
                warn!(command = %name, "appliance command failed: {err:#}");
                self.failed_commands = self.failed_commands.saturating_add(1);
                self.last_error = Some(format!("{err:#}"));
            }
        }
    }

    pub fn diagnostics(&self) -> ApplianceDiagnostics {
        ApplianceDiagnostics {
            enabled: matches!(self.backend, ApplianceBackend::Command(_)),
            min_send_interval_ms: MIN_SEND_INTERVAL_MS,
            last_send_ms: self.last_send_ms,
            sent_commands: self.sent_commands,
            failed_commands: self.failed_commands,
            last_error: self.last_error.clone(),
        }
    }

    fn rate_limit(&mut self) {
        let now = monotonic_ms();
        if let Some(last) = self.last_send_ms {
            let elapsed = now.saturating_sub(last);
            if elapsed < MIN_SEND_INTERVAL_MS {
                thread::sleep(Duration::from_millis(MIN_SEND_INTERVAL_MS - elapsed));
            }
        }
    }
}

fn run_sender(spec: &CommandSpec, name: &str) -> anyhow::Result<()> {
    let args = spec.render(&[("name", name)]);
    let display = spec.display(&args);
    let command_line = &display;
    debug!(command = %command_line, "running appliance sender");

    let output = Command::new(&spec.program)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to start `{display}`"))?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if !line.trim().is_empty() {
            debug!(source = %spec.program, "{line}");
        }
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        if !line.trim().is_empty() {
            warn!(source = %spec.program, "{line}");
        }
    }

    if !output.status.success() {
        return Err(anyhow!("`{display}` exited with {}", output.status));
    }
    Ok(())
}

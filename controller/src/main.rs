use std::process::ExitCode;

mod appliance;
mod auth;
mod backend;
mod clock;
mod control;
mod hardware;
mod host;
mod logging;
mod media;
mod pipeline;
mod process;
mod store;
mod trigger;

#[tokio::main]
async fn main() -> ExitCode {
    match host::run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("room-controller: {err:#}");
            ExitCode::FAILURE
        }
    }
}

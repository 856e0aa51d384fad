//! `basestation` – rover base-station gateway.
//!
//! 1. Installs structured logging (and OTLP export when configured).
//! 2. Loads `~/.basestation/config.toml`, writing the defaults on first run.
//! 3. Starts the gateway and blocks until its first loop stops.
//!
//! Ctrl-C shuts the control bus down and exits with status 0.  Any other loop
//! exit is reported and ends the process with a non-zero status.

mod config;

use std::process::ExitCode;

use basestation_runtime::{Gateway, init_tracing, is_clean_shutdown};
use tracing::{error, info, warn};

fn main() -> ExitCode {
    // Before the runtime exists: the OTLP exporter builds a blocking client.
    let _telemetry = init_tracing("basestation");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(load_config()))
}

async fn run(cfg: config::Config) -> ExitCode {
    info!(
        ws_addr = %cfg.ws_addr,
        antenna_peer = %cfg.antenna_peer,
        antenna_listen = %cfg.antenna_listen,
        "starting base station"
    );

    let gateway = match Gateway::new(cfg.gateway_config()) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "gateway setup failed");
            eprintln!("basestation: {e}");
            return ExitCode::FAILURE;
        }
    };

    match gateway.run().await {
        Ok(exit) if is_clean_shutdown(&exit) => {
            info!(%exit, "base station stopped");
            ExitCode::SUCCESS
        }
        Ok(exit) => {
            eprintln!("basestation: {exit}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "gateway failed to start");
            eprintln!("basestation: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> config::Config {
    let path = config::config_path();
    match config::load() {
        Ok(Some(cfg)) => {
            info!(path = %path.display(), "config loaded");
            cfg
        }
        Ok(None) => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => info!(path = %path.display(), "wrote default config"),
                Err(e) => warn!(error = %e, "could not write default config"),
            }
            defaults_with_env()
        }
        Err(e) => {
            warn!(error = %e, "config unusable; using defaults");
            defaults_with_env()
        }
    }
}

/// Defaults plus environment overrides, or bare defaults if an override is
/// out of range.
fn defaults_with_env() -> config::Config {
    let mut cfg = config::Config::default();
    config::apply_env_overrides(&mut cfg);
    match cfg.validate() {
        Ok(()) => cfg,
        Err(e) => {
            warn!(error = %e, "ignoring environment overrides");
            config::Config::default()
        }
    }
}

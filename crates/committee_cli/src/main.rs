//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `committee_core` linkage.
//! - Open the configured backend once and report which one answered.
//!
//! Usage: `committee_cli [config.json]`. Without a path the in-memory
//! backend and default buckets are used.

use committee_core::{open_store, CoreConfig};
use log::info;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("committee_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let config = match std::env::args().nth(1) {
        Some(path) => CoreConfig::load(&path).map_err(|err| err.to_string())?,
        None => CoreConfig::default(),
    };
    let logging_enabled = config.init_logging().map_err(|err| err.to_string())?;
    let store = open_store(&config.store).map_err(|err| err.to_string())?;
    info!(
        "event=cli_probe module=cli status=ok backend={}",
        store.backend_name()
    );

    println!("committee_core ping={}", committee_core::ping());
    println!("committee_core version={}", committee_core::core_version());
    println!("committee_core backend={}", store.backend_name());
    println!("committee_core logging={}", if logging_enabled { "on" } else { "off" });
    Ok(())
}

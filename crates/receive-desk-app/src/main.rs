#![warn(missing_docs)]
//! # receive-desk binary
//!
//! Command-line entry point for receive-desk.

use std::process::ExitCode;

use receive_desk_app::{App, AppConfig, Command, PASSWORD_ENV, init_tracing, redact_sensitive};
use tracing::{debug, error};

/// CLI entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("--version" | "version")) {
        println!("receive-desk {}", receive_desk_app::app_version());
        return ExitCode::SUCCESS;
    }

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(load_error) => {
            eprintln!("{load_error}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing();
    debug!(version = receive_desk_app::app_version(), ?config, "starting");

    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(usage_error) => {
            eprintln!("{usage_error}");
            return ExitCode::from(2);
        }
    };

    let result = match App::from_config(&config) {
        Ok(app) => app.execute(command, std::env::var(PASSWORD_ENV).ok()).await,
        Err(build_error) => Err(build_error),
    };

    match result {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(app_error) => {
            error!(error = %redact_sensitive(&app_error.to_string()), "command failed");
            eprintln!("{}", redact_sensitive(&app_error.user_message()));
            ExitCode::FAILURE
        }
    }
}

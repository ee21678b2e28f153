#![forbid(unsafe_code)]

mod cli;
mod compose;
mod config;
mod constants;
mod detect;
mod host;
mod supervisor;
mod types;
mod validate;

use clap::Parser;
use tracing::{error, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;

use cli::Cli;
use constants::env;

fn main() {
    // Parse log level from environment variable; user-facing output goes to stdout
    let log_level = match std::env::var(env::LOG_LEVEL)
        .unwrap_or_else(|_| "warn".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "info" => TraceLevel::INFO,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {e}");
    }

    let args = Cli::parse();

    let code = match cli::run(&args) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            cli::EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

//! # Application Entry Point
//!
//! Parses the CLI, initialises logging, runs the calling pipeline, and
//! maps errors onto exit codes (0 success, 1 runtime error, 2 usage
//! error).

use tracing_subscriber::EnvFilter;

use tern::config::Config;
use tern::pipelines;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::parse_and_validate() {
        Ok(config) => config,
        Err(error) => {
            report(&error);
            std::process::exit(error.exit_code());
        }
    };

    if let Err(error) = pipelines::run(&config) {
        report(&error);
        std::process::exit(error.exit_code());
    }
}

fn report(error: &tern::TernError) {
    eprintln!("error: {error}");
    if let Some(help) = error.help() {
        eprintln!("{help}");
    }
}

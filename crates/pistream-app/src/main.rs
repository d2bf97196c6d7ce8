//! pistream: headless game-streaming client for small Linux boards.
//!
//! ```text
//! pistream [options] host
//!   -pair / -unpair / -quit    control-plane actions
//!   -list                      browse the LAN for hosts
//!   (none)                     stream: preflight → input → sinks → connection
//! ```
//!
//! Logging goes to stderr. `-v` / `-vv` raise the level; `RUST_LOG` wins
//! when set. Use `GST_DEBUG=3` for GStreamer's own output.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod console;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = match cli::parse(&args) {
        Ok(opts) => opts,
        Err(e) => {
            print!("{e}");
            if matches!(e, cli::CliError::Syntax(_)) {
                println!();
            }
            return ExitCode::from(e.exit_code());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(opts.verbosity.filter())),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("pistream v{}", env!("CARGO_PKG_VERSION"));

    let listener = Arc::new(console::ConsoleListener::stdio());
    match app::run(opts, listener).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("Fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

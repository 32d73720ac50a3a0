//! origin-cache - fetch resources from external origins through a TTL disk cache
//!
//! Each invocation builds a fresh service scope, runs one offline task in it
//! and tears the scope down. Logs go to stderr so fetched bodies can be piped
//! from stdout.

use std::io::{self, Write};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use origin_cache::bootstrap::{self, CACHE, CODEC, FETCHER};
use origin_cache::cli::{Cli, Command};
use origin_cache::registry::ServiceRegistry;

/// What a task produced for stdout
enum Output {
    Bytes(Vec<u8>),
    Line(String),
}

/// Runs a subcommand inside an open scope
fn run_command(scope: &ServiceRegistry, command: &Command) -> origin_cache::Result<Output> {
    match command {
        Command::Fetch { url, meta } => {
            let resource = scope.resolve(&FETCHER)?.fetch(url)?;
            if *meta {
                Ok(Output::Line(scope.resolve(&CODEC)?.encode(&resource)?))
            } else {
                Ok(Output::Bytes(resource.body))
            }
        }
        Command::Sweep => {
            let removed = scope.resolve(&CACHE)?.sweep()?;
            Ok(Output::Line(format!("Removed {removed} expired entries")))
        }
        Command::Clear => {
            let removed = scope.resolve(&CACHE)?.clear()?;
            Ok(Output::Line(format!("Removed {removed} entries")))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let settings = cli.settings()?;
    let command = cli.command.clone();

    // Fetches and cache I/O block, so keep them off the runtime threads
    let output = tokio::task::spawn_blocking(move || {
        bootstrap::exec(&settings, |scope| run_command(scope, &command))
    })
    .await??;

    let mut stdout = io::stdout().lock();
    match output {
        Output::Bytes(bytes) => stdout.write_all(&bytes)?,
        Output::Line(line) => writeln!(stdout, "{line}")?,
    }
    stdout.flush()?;

    Ok(())
}

//! apm-core CLI entry point.
//!
//! ## Subcommands
//!
//! - `apm-core-cli` or `apm-core-cli serve` - Run the agent core: probes plus a
//!   dispatcher that writes delivered records to stdout as JSON lines
//! - `apm-core-cli config` - Print the effective configuration as JSON
//! - `apm-core-cli version` - Print the crate version

use std::process::ExitCode;
use std::sync::Arc;

use apm_core::config;
use apm_core::telemetry::{self, LogConfig};
use apm_core::{Agent, DeliveryQueue};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    match command {
        "serve" | "" => match serve().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Agent error: {}", e);
                ExitCode::FAILURE
            }
        },
        "config" => {
            let effective = config::load().effective_config();
            match serde_json::to_string_pretty(&effective) {
                Ok(json) => {
                    println!("{}", json);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Failed to render config: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("apm-core {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            ExitCode::from(2)
        }
    }
}

fn print_usage() {
    eprintln!("Usage: apm-core-cli [serve|config|version|help]");
}

async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_logging(&LogConfig::from_env())?;
    telemetry::init_metrics();

    let config = config::load();
    let agent = Agent::new(config.clone());

    let runner = agent.probe_runner();
    if config.probes.enabled {
        runner.start(config.probes.interval);
    }

    let dispatcher = tokio::spawn(dispatch(Arc::clone(agent.delivery())));
    tracing::info!("Agent core running, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    runner.stop().await;
    agent.delivery().close();
    dispatcher.await?;

    let snapshot = agent.metrics().snapshot();
    tracing::info!(
        completed = snapshot.counter("transactions_completed"),
        dropped = snapshot.counter("transactions_dropped"),
        "Agent core stopped"
    );
    Ok(())
}

/// Stand-in dispatcher: one JSON line per delivered record.
async fn dispatch(queue: Arc<DeliveryQueue>) {
    while let Some(record) = queue.recv().await {
        match serde_json::to_string(&record) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(transaction_id = %record.id, error = %e, "Record not serializable"),
        }
    }
}

//! Main binary entry point for the X-Road subsystem controller
//!
//! `serve` runs the Lambda runtime loop; `handle` processes a single lifecycle
//! event read from a JSON file.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use xroad_subsystem_controller::{
    config::ObservabilityConfig, ControllerConfig, SubsystemControllerService,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "subsystem-controller")]
#[command(about = "Reconciles X-Road client subsystems from CloudFormation custom resource events")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve invocations from the Lambda Runtime API (default)
    Serve,
    /// Handle one lifecycle event stored in a JSON file
    Handle {
        /// Path of the event JSON
        #[arg(short, long)]
        event: PathBuf,

        /// Log stream named in the response reason
        #[arg(long, env = "AWS_LAMBDA_LOG_STREAM_NAME", default_value = "local")]
        log_stream: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = ControllerConfig::from_env().context("Failed to load configuration")?;

    init_tracing(&config.observability)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    info!(
        "Starting X-Road subsystem controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let service = SubsystemControllerService::new(config)
        .context("Failed to initialize subsystem controller")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            if let Err(e) = service.serve().await {
                error!("Runtime loop stopped: {}", e);
                return Err(e.into());
            }
        }
        Command::Handle { event, log_stream } => {
            let response = service
                .handle_event_file(&event, &log_stream)
                .await
                .with_context(|| format!("Failed to handle event {}", event.display()))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(observability: &ObservabilityConfig) -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&observability.log_level))
        .or_else(|_| EnvFilter::try_new("info"))?;

    match observability.log_format.as_str() {
        "json" => {
            // Lambda ships stdout to CloudWatch as-is
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .without_time(),
                )
                .try_init()?;
        }
        "pretty" | "text" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_file(true)
                        .with_line_number(true)
                        .with_target(false),
                )
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .try_init()?;
        }
    }

    Ok(())
}

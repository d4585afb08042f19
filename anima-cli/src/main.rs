//! Anima CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use anima_config::FileSettings;
use anima_runtime::{Application, Soul};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "anima")]
#[command(about = "Anima service runtime", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the application described by the configuration
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "anima.yaml")]
        config: PathBuf,

        /// Log level (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "info")]
        log_level: String,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "anima.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, log_level } => {
            init_tracing(&log_level)?;

            tracing::info!(config = %config.display(), "starting anima");

            let app = Application::builder("anima")
                .settings(FileSettings::new(config))
                .build()?;

            let soul = Soul::new(vec![app]);
            soul.serve().await?;

            tracing::info!("anima stopped");
            Ok(())
        }

        Commands::Validate { config } => {
            match anima_config::load_config(&config) {
                Ok(loaded) => {
                    println!("{} is valid", config.display());
                    println!("  protocol: {}", loaded.service.protocol);
                    println!("  address:  {}", loaded.service.address);
                    println!("  caches:   {}", loaded.cache.len());
                    println!("  queues:   {}", loaded.queue.len());
                    Ok(())
                }
                Err(e) => {
                    eprintln!("{} is invalid: {e}", config.display());
                    std::process::exit(1);
                }
            }
        }
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

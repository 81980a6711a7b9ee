//! # Weld Parameter Control
//!
//! Operator tool for the weld parameter segment.
//!
//! # Usage
//!
//! ```bash
//! # Publish the configured catalog and values until Ctrl-C
//! weld_paramctl --config config/params.toml serve
//!
//! # Follow changes made by the running writer
//! weld_paramctl --config config/params.toml watch -v
//!
//! # Print every used parameter as JSON
//! weld_paramctl --config config/params.toml dump --format json
//! ```

#![deny(warnings)]

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::DumpFormat;
use config::ParamctlConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;
use weld_common::config::ConfigLoader;
use weld_common::consts::DEFAULT_CONFIG_PATH;

/// Weld parameter segment tool
#[derive(Parser, Debug)]
#[command(name = "weld_paramctl")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Serve, watch and dump the weld parameter segment")]
#[command(long_about = None)]
struct Args {
    /// Path to the parameter configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the segment as writer and publish the configured values
    Serve,

    /// Attach as reader and log every committed change
    Watch {
        /// Wait bound per cycle in milliseconds (defaults to the segment config)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Attach as reader and print every used parameter
    Dump {
        /// Output format
        #[arg(long, value_enum, default_value_t = DumpFormat::Text)]
        format: DumpFormat,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("weld_paramctl failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = ParamctlConfig::load(&args.config);
    let level = match &loaded {
        Ok(config) => config.shared.log_level.into(),
        Err(_) => Level::INFO,
    };
    setup_tracing(&args, level);

    let config = loaded?;
    config.validate()?;
    info!(
        service = %config.shared.service_name,
        segment = %config.segment.segment_name,
        "weld_paramctl v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            running.store(false, Ordering::SeqCst);
        })?;
    }

    match args.command {
        Command::Serve => commands::serve(&config, running),
        Command::Watch { timeout_ms } => {
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.segment.wait_timeout());
            commands::watch(&config, running, timeout)
        }
        Command::Dump { format } => commands::dump(&config, format),
    }
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args, configured: Level) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        configured
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

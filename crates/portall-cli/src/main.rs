//! Portall schema bootstrap and migration tool.
//!
//! Run with no subcommand before starting Portall: creates a fresh database,
//! leaves a compatible one alone, or safely upgrades an outdated one.

mod commands;
mod config;
mod error;
mod model;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Args;

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portall_migrate=info,portall_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let command = args.command();
    let config = args.into_config();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        command = ?command,
        migrations_dir = %config.migrations_dir.display(),
        "starting portall-migrate"
    );

    let model = model::portall_model();
    if let Err(e) = commands::execute(&command, &config, &model) {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

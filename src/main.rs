mod api;
mod archive;
mod build;
mod conf;
mod object_store;
mod repo;
mod storage;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Shipwright turns source repositories into published container images.
///
/// It accepts deployment requests over HTTP, fetches and archives the
/// repository, stages the archive in object storage, hands it to a remote
/// container build service, and tracks the whole lifecycle in a pollable
/// status ledger.
#[derive(Debug, Parser)]
#[command(name = "shipwright")]
#[command(about = "A deploy pipeline service for container builds")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(general: &conf::General) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(general.log_level.clone()));

    if general.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = conf::load(&cli.config).context("could not load configuration")?;

    init_logging(&config.general);

    api::Api::start(config).await
}

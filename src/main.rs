use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pterodrive::config::Config;
use pterodrive::relay::{Relay, RunOutcome};

/// Configuration comes from the environment (and an optional `.env` or
/// `pterodrive.json`); the binary takes no arguments.
#[derive(Parser)]
#[command(name = "pterodrive")]
#[command(about = "Copy Pterodactyl backups to Google Drive and report to Discord")]
#[command(version)]
struct Cli {}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let _cli = Cli::parse();
    let cfg = Config::load()?;
    let relay = Relay::new(&cfg)?;

    match relay.run_and_report().await? {
        RunOutcome::NoBackups => tracing::info!("Nothing to relay"),
        RunOutcome::Completed { uploaded, skipped } => {
            for b in &uploaded {
                tracing::info!("  {} -> {}", b.filename, b.link);
            }
            if skipped > 0 {
                tracing::warn!("{} future-dated backup(s) skipped", skipped);
            }
        }
    }

    Ok(())
}

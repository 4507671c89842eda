use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use freqdash_settings::{load_settings_from_path, settings_path, validate, DashSettings};
use freqdash_sync::DashboardSync;
use freqdash_telemetry::{init_telemetry, TelemetryConfig};

/// Live dashboard back end for a trading engine.
#[derive(Debug, Parser)]
#[command(name = "freqdash", version)]
struct Cli {
    /// Settings file (defaults to ~/.freqdash/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Push endpoint of the engine.
    #[arg(long)]
    ws_url: Option<String>,

    /// Base URL of the engine's read endpoints.
    #[arg(long)]
    api_url: Option<String>,

    /// Port of the dashboard server.
    #[arg(long)]
    port: Option<u16>,

    /// Poll the engine once, print the snapshot as JSON and exit.
    #[arg(long)]
    once: bool,
}

impl Cli {
    /// Override settings with the flags given, then re-check them.
    fn apply(&self, settings: &mut DashSettings) -> freqdash_settings::Result<()> {
        if let Some(url) = &self.ws_url {
            settings.connection.url = url.clone();
        }
        if let Some(url) = &self.api_url {
            settings.api.base_url = url.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        validate(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(settings_path);
    let mut settings =
        load_settings_from_path(&path).with_context(|| format!("loading settings from {}", path.display()))?;
    cli.apply(&mut settings).context("invalid command-line override")?;

    init_telemetry(&TelemetryConfig::from_level(&settings.logging.level, settings.logging.json))?;
    tracing::info!(config = %path.display(), "starting freqdash");

    let sync = Arc::new(DashboardSync::from_settings(&settings).context("building sync layer")?);

    if cli.once {
        let report = sync.aggregator().poll().await;
        let snapshot = sync.aggregator().snapshot();
        tracing::info!(updated = report.updated.len(), failed = report.failed.len(), "single poll finished");
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let handle = freqdash_server::start((&settings.server).into(), Arc::clone(&sync))
        .await
        .context("starting dashboard server")?;
    sync.start();
    tracing::info!(port = handle.port, ws_url = %settings.connection.url, "freqdash ready");

    tokio::signal::ctrl_c().await.context("listening for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown();
    sync.shutdown();
    Ok(())
}

//! AlertRelay - Alertmanager webhook relay
//!
//! Entry point: loads configuration, installs logging and metrics, then serves
//! the webhook routes until Ctrl-C.

use alertrelay::{app::App, cli::Cli, config::Config, logging};
use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Layer defaults, file, environment and CLI args; nothing is served on failure.
    let config = Config::load(&cli).unwrap_or_else(|err| {
        eprintln!("Failed to load configuration: {err}");
        std::process::exit(1);
    });

    logging::init(&config.logging);

    info!("AlertRelay starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Server Port: {}", config.server.port);
    info!("Server Timeout: {}s", config.server.timeout.as_secs());
    info!("Log Level: {}", config.logging.level);
    info!("Log Format: {}", config.logging.format);
    info!("Template Timezone: {}", config.template.timezone);
    for (kind, provider) in config.webhooks.enabled() {
        info!(
            "Webhook {}: template={}, timeout={}s, retries={}, signed={}",
            kind,
            provider.template.display(),
            provider.timeout.as_secs(),
            provider.retry_count,
            provider.signing_secret().is_some()
        );
    }
    info!("Metrics Endpoint: {}", config.metrics.enabled);
    info!("-------------------------------------------------------");

    let mut builder = App::builder(config.clone());
    if config.metrics.enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install Prometheus recorder")?;
        builder = builder.prometheus_handle(handle);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = builder.build(shutdown_rx).await?;

    let server = tokio::spawn(app.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Shutting down gracefully...");
    shutdown_tx.send(true).ok();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Server error: {:#}", e),
        Err(e) => error!("Server task panicked: {:?}", e),
    }

    info!("AlertRelay stopped. Exiting.");
    Ok(())
}

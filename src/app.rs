//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    dispatch::{Channel, Dispatcher},
    notification::notifier_for,
    server::{self, AppState},
    templates::TemplateCache,
};
use anyhow::{Context, Result};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, instrument};

/// Sleep after the first failed delivery attempt; later attempts scale linearly.
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// A bound, ready-to-serve application.
pub struct App {
    listener: TcpListener,
    router: Router,
    shutdown_rx: watch::Receiver<bool>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves requests until the shutdown signal fires, then drains in-flight requests.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx;
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
                info!("Shutdown signal received, draining in-flight requests...");
            })
            .await
            .context("HTTP server failed")?;

        info!("Server stopped.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Separates constructing the components from running them, and lets tests
/// swap in a client, a shorter backoff, or a metrics handle.
pub struct AppBuilder {
    config: Config,
    http_client_override: Option<reqwest::Client>,
    backoff_unit: Duration,
    prometheus_handle: Option<PrometheusHandle>,
}

impl AppBuilder {
    /// Creates a new `AppBuilder` with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            http_client_override: None,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
            prometheus_handle: None,
        }
    }

    /// Overrides the outbound HTTP client for testing.
    pub fn http_client_override(mut self, client: reqwest::Client) -> Self {
        self.http_client_override = Some(client);
        self
    }

    /// Overrides the retry backoff unit.
    pub fn backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Serves `/metrics` from the given recorder handle.
    pub fn prometheus_handle(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus_handle = Some(handle);
        self
    }

    /// Assembles the HTTP router without binding a socket.
    #[instrument(skip_all)]
    pub fn router(self) -> Result<Router> {
        let config = self.config;
        let timezone = config.template.tz()?;
        let client = self.http_client_override.unwrap_or_default();

        let channels: Vec<Channel> = config
            .webhooks
            .enabled()
            .map(|(kind, provider)| {
                info!(route = %format!("POST /{kind}"), template = %provider.template.display(), "Registered webhook route");
                Channel {
                    kind,
                    config: provider.clone(),
                    notifier: notifier_for(kind, client.clone(), self.backoff_unit),
                }
            })
            .collect();
        info!(route = "GET /health", "Registered health route");
        if self.prometheus_handle.is_some() {
            info!(route = "GET /metrics", "Registered metrics route");
        }

        let state = Arc::new(AppState {
            config,
            dispatcher: Dispatcher::new(Arc::new(TemplateCache::new(timezone))),
            prometheus: self.prometheus_handle,
        });
        Ok(server::router(state, channels))
    }

    /// Builds the router and binds the listener on all interfaces.
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.server.port));
        let router = self.router()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(addr = %listener.local_addr()?, "Server listening");

        Ok(App {
            listener,
            router,
            shutdown_rx,
        })
    }
}

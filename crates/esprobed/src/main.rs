//! esprobed — the esprobe daemon.
//!
//! Single binary that assembles the probe:
//! - Configuration (TOML file + CLI overrides)
//! - Metric store shared by every component
//! - Node discovery (static list or Consul)
//! - Probe cycle with series garbage collection
//! - Prometheus exposition endpoint
//!
//! # Usage
//!
//! ```text
//! esprobed --config /etc/esprobe/esprobe.toml --port 2112 --interval 30s
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use esprobe_core::{ConfigResult, ProbeConfig};
use esprobe_health::{ConsulDiscovery, DiscoverySource, ProbeCycle, ProbeSettings, StaticDiscovery};
use esprobe_metrics::{MetricStore, MetricWindows};

const DEFAULT_LOG_FILTER: &str = "info,esprobed=debug,esprobe=debug";

#[derive(Parser, Debug)]
#[command(name = "esprobed", about = "Elasticsearch and Kibana health probe")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port of the metrics endpoint (overrides `metrics_port`).
    #[arg(long)]
    port: Option<u16>,

    /// Probe interval such as `30s` or `2m` (overrides `interval`).
    #[arg(long)]
    interval: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Load the config file, if any, and apply CLI overrides.
    fn load_config(&self) -> anyhow::Result<ProbeConfig> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ProbeConfig::default(),
        };
        if let Some(port) = self.port {
            config.metrics_port = port;
        }
        if let Some(interval) = &self.interval {
            config.interval = interval.clone();
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn discovery_source(config: &ProbeConfig) -> ConfigResult<DiscoverySource> {
    let source = match &config.consul {
        Some(consul) => {
            info!(address = %consul.address, service = %consul.elasticsearch_service, "using consul discovery");
            DiscoverySource::Consul(ConsulDiscovery::new(consul)?)
        }
        None => {
            if config.static_nodes.is_empty() {
                warn!("no consul section and no static nodes configured, nothing will be probed");
            }
            info!(nodes = config.static_nodes.len(), "using static discovery");
            DiscoverySource::Static(StaticDiscovery::from_config(&config.static_nodes))
        }
    };
    Ok(source)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = cli.load_config()?;
    run(config).await
}

async fn run(config: ProbeConfig) -> anyhow::Result<()> {
    info!("esprobe daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let windows = MetricWindows::from_config(&config.summaries)?;
    let store = Arc::new(MetricStore::new(windows));

    let settings = ProbeSettings::from_config(&config)?;
    info!(interval = ?settings.interval, index = %settings.index, "probe cycle initialized");
    let cycle = ProbeCycle::new(discovery_source(&config)?, store.clone(), settings);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let probe_handle = tokio::spawn(async move {
        cycle.run(shutdown_rx).await;
    });

    // ── Start metrics server ───────────────────────────────────

    let router = esprobe_api::build_router(store);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics listener on {addr}"))?;
    info!(%addr, "metrics server listening");

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = probe_handle.await;

    info!("esprobe daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["esprobed"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.log_json);

        let config = cli.load_config().unwrap();
        assert_eq!(config.metrics_port, 2112);
        assert_eq!(config.interval().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("esprobe.toml");
        std::fs::write(&path, "metrics_port = 9000\ninterval = \"10s\"\n").unwrap();

        let cli = Cli::try_parse_from([
            "esprobed",
            "--config",
            path.to_str().unwrap(),
            "--interval",
            "5s",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.log_json);

        let config = cli.load_config().unwrap();
        assert_eq!(config.metrics_port, 9000);
        assert_eq!(config.interval().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn invalid_override_is_rejected() {
        let cli = Cli::try_parse_from(["esprobed", "--interval", "0s"]).unwrap();
        assert!(cli.load_config().is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::try_parse_from(["esprobed", "--config", "/nonexistent/esprobe.toml"]).unwrap();
        assert!(cli.load_config().is_err());
    }

    #[test]
    fn consul_section_selects_consul_discovery() {
        let config = ProbeConfig::from_toml(
            "[consul]\naddress = \"127.0.0.1:8500\"\nelasticsearch_service = \"es\"\n",
        )
        .unwrap();
        assert!(matches!(discovery_source(&config).unwrap(), DiscoverySource::Consul(_)));
        assert!(matches!(
            discovery_source(&ProbeConfig::default()).unwrap(),
            DiscoverySource::Static(_)
        ));
    }
}

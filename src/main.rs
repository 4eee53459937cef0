//! Single-hop HTTP forwarding proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────────┐
//!                      │                     FORWARD PROXY                        │
//!   Caller request     │  ┌─────────┐   ┌───────────┐   ┌──────────┐   ┌────────┐ │
//!   ───────────────────┼─▶│listener │──▶│ pre-call  │──▶│ header   │──▶│upstream│─┼──▶ Origin
//!                      │  │plain/TLS│   │ filters   │   │ policy   │   │ client │ │
//!                      │  └─────────┘   └───────────┘   └──────────┘   └───┬────┘ │
//!   Caller response    │  ┌─────────┐   ┌───────────┐   ┌──────────┐       │      │
//!   ◀──────────────────┼──│ stream  │◀──│ header    │◀──│ response │◀──────┘      │
//!                      │  │  body   │   │ policy    │   │          │              │
//!                      │  └────┬────┘   └───────────┘   └──────────┘              │
//!                      │       ▼                                                  │
//!                      │  post-call filters (access log, metrics)                 │
//!                      └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use forward_proxy::config::{self, ListenerConfig, ProxyConfig, TlsConfig};
use forward_proxy::lifecycle::shutdown::trigger_on_ctrl_c;
use forward_proxy::observability::{logging, metrics};
use forward_proxy::{HttpServer, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "forward-proxy")]
#[command(about = "Single-hop HTTP forwarding proxy", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Primary listen address; replaces the configured listeners.
    #[arg(long)]
    addr1: Option<String>,

    /// Additional plain-HTTP listen address.
    #[arg(long)]
    addr2: Option<String>,

    /// Certificate (PEM) for the primary listener.
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<String>,

    /// Private key (PEM) for the primary listener.
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<String>,

    /// Proxy identity reported in Via headers and logs.
    #[arg(long)]
    name: Option<String>,
}

impl Cli {
    fn tls(&self) -> Option<TlsConfig> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            _ => None,
        }
    }

    /// Flags take precedence over the file.
    fn apply_overrides(&self, config: &mut ProxyConfig) {
        if let Some(name) = &self.name {
            config.identity.name = name.clone();
        }

        if let Some(addr1) = &self.addr1 {
            config.listeners = vec![ListenerConfig {
                bind_address: addr1.clone(),
                tls: self.tls(),
            }];
        } else if let Some(tls) = self.tls() {
            if let Some(primary) = config.listeners.first_mut() {
                primary.tls = Some(tls);
            }
        }

        if let Some(addr2) = &self.addr2 {
            config.listeners.push(ListenerConfig {
                bind_address: addr2.clone(),
                tls: None,
            });
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply_overrides(&mut config);
    config::validate_config(&config).map_err(config::ConfigError::Validation)?;

    logging::init_logging(&config.observability);

    // Both the upstream connector and the TLS listeners use ring.
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing::info!(
        identity = %config.identity.name,
        listeners = config.listeners.len(),
        upstream_timeout_secs = config.timeouts.upstream_secs,
        "forward-proxy v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    tokio::spawn(trigger_on_ctrl_c(shutdown.clone()));

    let server = HttpServer::new(config)?;
    server.run(&shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

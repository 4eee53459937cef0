//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the forwarding proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Self-reported proxy identity.
    pub identity: IdentityConfig,

    /// Listeners to serve. Every entry is bound and served concurrently.
    pub listeners: Vec<ListenerConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Built-in filter configuration.
    pub filters: FilterConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            listeners: vec![ListenerConfig::default()],
            timeouts: TimeoutConfig::default(),
            filters: FilterConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Proxy identity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Name reported in `Via` headers and diagnostics.
    pub name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: "forward-proxy".to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration. When set, the listener only accepts TLS.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Deadline for the upstream call to produce response headers, in seconds.
    pub upstream_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// How long listeners wait for in-flight exchanges on shutdown, in seconds.
    pub drain_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            upstream_secs: 30,
            request_secs: 60,
            drain_secs: 10,
        }
    }
}

/// Built-in filter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Header names that cause inbound requests to be rejected.
    pub forbidden_headers: Vec<String>,

    /// Target hosts the proxy is allowed to forward to. Empty allows all.
    pub allowed_hosts: Vec<String>,

    /// Reject requests whose deadline elapsed before forwarding.
    pub cancellation_check: bool,

    /// Emit one log event per completed exchange.
    pub access_log: bool,

    /// Record per-exchange metrics.
    pub metrics: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            forbidden_headers: Vec::new(),
            allowed_hosts: Vec::new(),
            cancellation_check: true,
            access_log: true,
            metrics: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

//! Filters shipped with the proxy and the chain assembled from config.

use async_trait::async_trait;
use axum::http::HeaderName;
use tokio::time::Instant;

use crate::config::FilterConfig;
use crate::filters::{
    Exchange, Filter, FilterChain, FilterError, PostCallFilter, PreCallFilter, RequestContext,
};
use crate::observability::metrics;

/// Rejects requests carrying any of the configured headers.
#[derive(Debug, Clone)]
pub struct HeaderGuard {
    forbidden: Vec<HeaderName>,
}

impl HeaderGuard {
    /// Names that are not valid header names are skipped with a warning.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let forbidden = names
            .into_iter()
            .filter_map(|name| match HeaderName::from_bytes(name.as_ref().as_bytes()) {
                Ok(header) => Some(header),
                Err(_) => {
                    tracing::warn!(header = name.as_ref(), "Ignoring invalid forbidden header name");
                    None
                }
            })
            .collect();
        Self { forbidden }
    }
}

impl Filter for HeaderGuard {
    fn name(&self) -> &str {
        "header-guard"
    }
}

#[async_trait]
impl PreCallFilter for HeaderGuard {
    fn forbidden_headers(&self) -> &[HeaderName] {
        &self.forbidden
    }

    async fn before(&self, _ctx: &RequestContext<'_>) -> Result<(), FilterError> {
        Ok(())
    }
}

/// Only lets requests through to the listed target hosts.
///
/// An entry starting with `.` matches any subdomain (`.example.com`).
#[derive(Debug, Clone)]
pub struct HostAllowList {
    hosts: Vec<String>,
}

impl HostAllowList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn allows(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hosts.iter().any(|allowed| match allowed.strip_prefix('.') {
            Some(suffix) => host == suffix || host.ends_with(allowed.as_str()),
            None => host == *allowed,
        })
    }
}

impl Filter for HostAllowList {
    fn name(&self) -> &str {
        "host-allow-list"
    }
}

#[async_trait]
impl PreCallFilter for HostAllowList {
    async fn before(&self, ctx: &RequestContext<'_>) -> Result<(), FilterError> {
        match ctx.uri.host() {
            Some(host) if self.allows(host) => Ok(()),
            Some(host) => Err(FilterError::new(format!("target host '{}' is not allowed", host))),
            None => Err(FilterError::new("target has no host")),
        }
    }
}

/// Fails requests whose deadline passed while earlier filters ran, so the
/// upstream is never contacted for them.
///
/// Register it after any filter that may await.
#[derive(Debug, Clone, Default)]
pub struct CancellationCheck;

impl Filter for CancellationCheck {
    fn name(&self) -> &str {
        "cancellation-check"
    }
}

#[async_trait]
impl PreCallFilter for CancellationCheck {
    async fn before(&self, ctx: &RequestContext<'_>) -> Result<(), FilterError> {
        if Instant::now() >= ctx.deadline {
            return Err(FilterError::new("request deadline exceeded"));
        }
        Ok(())
    }
}

/// One structured log event per completed exchange.
#[derive(Debug, Clone, Default)]
pub struct AccessLog;

impl Filter for AccessLog {
    fn name(&self) -> &str {
        "access-log"
    }
}

#[async_trait]
impl PostCallFilter for AccessLog {
    async fn after(&self, exchange: &Exchange) -> Result<(), FilterError> {
        tracing::info!(
            request_id = %exchange.request_id,
            method = %exchange.method,
            uri = %exchange.uri,
            peer = %exchange.peer,
            status = exchange.status.as_u16(),
            bytes = exchange.bytes_sent,
            completed = exchange.completed,
            duration_ms = exchange.received_at.elapsed().as_millis() as u64,
            "Exchange completed"
        );
        Ok(())
    }
}

/// Records request count and latency.
#[derive(Debug, Clone, Default)]
pub struct RequestMetrics;

impl Filter for RequestMetrics {
    fn name(&self) -> &str {
        "request-metrics"
    }
}

#[async_trait]
impl PostCallFilter for RequestMetrics {
    async fn after(&self, exchange: &Exchange) -> Result<(), FilterError> {
        metrics::record_request(
            exchange.method.as_str(),
            exchange.status.as_u16(),
            "forwarded",
            exchange.received_at,
        );
        metrics::record_bytes_sent(exchange.bytes_sent);
        Ok(())
    }
}

/// Assemble the built-in chain described by the configuration.
pub fn chain_from_config(config: &FilterConfig) -> FilterChain {
    let mut builder = FilterChain::builder();

    if !config.forbidden_headers.is_empty() {
        builder = builder.pre_call(HeaderGuard::new(&config.forbidden_headers));
    }
    if !config.allowed_hosts.is_empty() {
        builder = builder.pre_call(HostAllowList::new(&config.allowed_hosts));
    }
    if config.cancellation_check {
        builder = builder.pre_call(CancellationCheck);
    }
    if config.access_log {
        builder = builder.post_call(AccessLog);
    }
    if config.metrics {
        builder = builder.post_call(RequestMetrics);
    }

    builder.build()
}

//! Filter subsystem: the proxy's extension point.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → chain.rs run_pre_call (forbidden headers, then before-action, per filter)
//!         → Rejection short-circuits; no upstream call is made
//!     → forwarding engine
//!     → response streamed to caller
//!     → chain.rs run_post_call (every after-action, failures only reported)
//! ```
//!
//! # Design Decisions
//! - Pre-call and post-call are disjoint capabilities (separate traits)
//! - Filters are built once at startup and shared read-only; no locking
//! - Post-call failures never reach the caller

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, Uri};
use tokio::time::Instant;

pub mod builtin;
pub mod chain;

pub use builtin::{AccessLog, CancellationCheck, HeaderGuard, HostAllowList, RequestMetrics};
pub use chain::{FilterChain, FilterChainBuilder, PostCallFailure, Rejection};

/// Error returned by a filter action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FilterError {
    message: String,
}

impl FilterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A named unit of logic.
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;
}

/// Inbound request as seen by pre-call filters.
#[derive(Debug)]
pub struct RequestContext<'a> {
    pub request_id: &'a str,
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub peer: SocketAddr,
    pub received_at: Instant,
    /// Shared by the pre-call filters and the upstream call; once it passes,
    /// the upstream response is no longer awaited.
    pub deadline: Instant,
}

/// A completed exchange as seen by post-call filters.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub request_id: String,
    pub method: Method,
    pub uri: Uri,
    pub peer: SocketAddr,
    pub status: StatusCode,
    pub received_at: Instant,
    /// Response body bytes handed to the caller.
    pub bytes_sent: u64,
    /// Whether the body reached end of stream before being released.
    pub completed: bool,
}

/// Runs before the upstream call and may reject the request.
#[async_trait]
pub trait PreCallFilter: Filter {
    /// Headers that cause rejection when present on the inbound request.
    fn forbidden_headers(&self) -> &[HeaderName] {
        &[]
    }

    async fn before(&self, ctx: &RequestContext<'_>) -> Result<(), FilterError>;
}

/// Runs after the response has been handed to the caller.
#[async_trait]
pub trait PostCallFilter: Filter {
    async fn after(&self, exchange: &Exchange) -> Result<(), FilterError>;
}

//! Ordered filter chain.

use std::sync::Arc;

use axum::http::HeaderName;

use crate::filters::{Exchange, FilterError, PostCallFilter, PreCallFilter, RequestContext};
use crate::observability::metrics;

/// Why a pre-call filter stopped a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A forbidden header was present on the inbound request.
    Forbidden { filter: String, header: HeaderName },
    /// The filter's before-action failed.
    Failed { filter: String, error: FilterError },
}

impl Rejection {
    pub fn filter(&self) -> &str {
        match self {
            Rejection::Forbidden { filter, .. } | Rejection::Failed { filter, .. } => filter,
        }
    }
}

/// A post-call filter failure, reported to the operator only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCallFailure {
    pub filter: String,
    pub error: FilterError,
}

/// Pre-call and post-call filters in registration order.
///
/// Assembled once at startup and never mutated afterwards.
#[derive(Clone, Default)]
pub struct FilterChain {
    pre_call: Vec<Arc<dyn PreCallFilter>>,
    post_call: Vec<Arc<dyn PostCallFilter>>,
}

impl FilterChain {
    pub fn builder() -> FilterChainBuilder {
        FilterChainBuilder::default()
    }

    /// A chain with no filters.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn pre_call_names(&self) -> Vec<&str> {
        self.pre_call.iter().map(|f| f.name()).collect()
    }

    pub fn post_call_names(&self) -> Vec<&str> {
        self.post_call.iter().map(|f| f.name()).collect()
    }

    pub fn has_post_call(&self) -> bool {
        !self.post_call.is_empty()
    }

    /// Run pre-call filters in order. The first rejection stops the chain.
    pub async fn run_pre_call(&self, ctx: &RequestContext<'_>) -> Result<(), Rejection> {
        for filter in &self.pre_call {
            if let Some(header) = filter
                .forbidden_headers()
                .iter()
                .find(|name| ctx.headers.contains_key(*name))
            {
                return Err(Rejection::Forbidden {
                    filter: filter.name().to_string(),
                    header: header.clone(),
                });
            }

            if let Err(error) = filter.before(ctx).await {
                return Err(Rejection::Failed {
                    filter: filter.name().to_string(),
                    error,
                });
            }
        }
        Ok(())
    }

    /// Run every post-call filter in order, reporting and collecting failures.
    pub async fn run_post_call(&self, exchange: &Exchange) -> Vec<PostCallFailure> {
        let mut failures = Vec::new();
        for filter in &self.post_call {
            if let Err(error) = filter.after(exchange).await {
                tracing::warn!(
                    request_id = %exchange.request_id,
                    filter = filter.name(),
                    error = %error,
                    "Post-call filter failed"
                );
                metrics::record_filter_failure(filter.name(), "post_call");
                failures.push(PostCallFailure {
                    filter: filter.name().to_string(),
                    error,
                });
            }
        }
        failures
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("pre_call", &self.pre_call_names())
            .field("post_call", &self.post_call_names())
            .finish()
    }
}

/// Registers filters in the order they should run.
#[derive(Default)]
pub struct FilterChainBuilder {
    pre_call: Vec<Arc<dyn PreCallFilter>>,
    post_call: Vec<Arc<dyn PostCallFilter>>,
}

impl FilterChainBuilder {
    pub fn pre_call<F: PreCallFilter + 'static>(mut self, filter: F) -> Self {
        self.pre_call.push(Arc::new(filter));
        self
    }

    pub fn post_call<F: PostCallFilter + 'static>(mut self, filter: F) -> Self {
        self.post_call.push(Arc::new(filter));
        self
    }

    pub fn pre_call_arc(mut self, filter: Arc<dyn PreCallFilter>) -> Self {
        self.pre_call.push(filter);
        self
    }

    pub fn post_call_arc(mut self, filter: Arc<dyn PostCallFilter>) -> Self {
        self.post_call.push(filter);
        self
    }

    pub fn build(self) -> FilterChain {
        FilterChain {
            pre_call: self.pre_call,
            post_call: self.post_call,
        }
    }
}

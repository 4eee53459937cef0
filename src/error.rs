//! Failures that end a forwarded exchange before the response is written.

use std::time::Duration;

use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::filters::{FilterError, Rejection};
use crate::http::upstream::UpstreamError;

/// Everything that can stop a request between `Received` and `Writing`.
///
/// Failures after the response is written are post-call filter failures and
/// never become a `ProxyError`.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request rejected by filter '{filter}'")]
    Forbidden { filter: String, header: HeaderName },

    #[error("filter '{filter}' failed: {source}")]
    PreFilterFailure {
        filter: String,
        #[source]
        source: FilterError,
    },

    #[error("upstream request failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ProxyError::PreFilterFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "bad_request",
            ProxyError::Forbidden { .. } => "forbidden",
            ProxyError::PreFilterFailure { .. } => "pre_filter_failure",
            ProxyError::Upstream(_) => "upstream_failure",
            ProxyError::UpstreamTimeout(_) => "upstream_timeout",
        }
    }
}

impl From<Rejection> for ProxyError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Forbidden { filter, header } => ProxyError::Forbidden { filter, header },
            Rejection::Failed { filter, error } => ProxyError::PreFilterFailure {
                filter,
                source: error,
            },
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

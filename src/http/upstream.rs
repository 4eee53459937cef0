//! Outbound transport.
//!
//! # Responsibilities
//! - Perform the network round-trip for an already-rewritten request
//! - Report failure and success as mutually exclusive outcomes
//!
//! # Design Decisions
//! - `Upstream` is a trait so the engine can be exercised without a network
//! - HTTPS origins are reached through rustls with the platform's roots
//! - Dropping the returned future cancels the call

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, Version};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::TimeoutConfig;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outbound call failure.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The connection could not be established (refused, DNS, TLS).
    #[error("connection to upstream failed: {0}")]
    Connect(#[source] BoxError),

    /// The connection was established but the exchange failed.
    #[error("upstream exchange failed: {0}")]
    Transport(#[source] BoxError),
}

impl UpstreamError {
    pub fn connect(error: impl Into<BoxError>) -> Self {
        UpstreamError::Connect(error.into())
    }

    pub fn transport(error: impl Into<BoxError>) -> Self {
        UpstreamError::Transport(error.into())
    }
}

impl From<hyper_util::client::legacy::Error> for UpstreamError {
    fn from(error: hyper_util::client::legacy::Error) -> Self {
        if error.is_connect() {
            UpstreamError::connect(error)
        } else {
            UpstreamError::transport(error)
        }
    }
}

/// Performs the actual network round-trip.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError>;
}

/// Hyper client reaching `http` and `https` origins.
#[derive(Clone)]
pub struct HyperUpstream {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HyperUpstream {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self, std::io::Error> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));

        let builder = match hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_native_roots(rustls::crypto::ring::default_provider())
        {
            Ok(builder) => builder,
            Err(e) => {
                tracing::warn!(error = %e, "No native root certificates, https origins will fail verification");
                hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(empty_roots_config()?)
            }
        };

        let https = builder
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new()).build(https);
        Ok(Self { client })
    }
}

fn empty_roots_config() -> Result<rustls::ClientConfig, std::io::Error> {
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(std::io::Error::other)?
    .with_root_certificates(rustls::RootCertStore::empty())
    .with_no_client_auth();
    Ok(config)
}

#[async_trait]
impl Upstream for HyperUpstream {
    async fn forward(&self, mut request: Request<Body>) -> Result<Response<Body>, UpstreamError> {
        // Origins are spoken to over HTTP/1.1 whatever the inbound protocol was.
        *request.version_mut() = Version::HTTP_11;
        let response = self.client.request(request).await?;
        Ok(response.map(Body::new))
    }
}

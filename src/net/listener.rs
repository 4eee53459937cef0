//! Listener setup.
//!
//! # Responsibilities
//! - Parse and bind configured addresses
//! - Report bind, TLS, and serve failures with the address involved

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::TcpListener;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The configured address is not a socket address.
    #[error("Invalid bind address '{0}'")]
    Address(String),
    /// Failed to bind to address.
    #[error("Failed to bind {0}: {1}")]
    Bind(SocketAddr, #[source] std::io::Error),
    /// Certificate or key file missing.
    #[error("TLS file not found: {0}")]
    TlsFileMissing(PathBuf),
    /// Certificate or key could not be loaded.
    #[error("Failed to load TLS configuration: {0}")]
    Tls(#[source] std::io::Error),
    /// The server stopped with an error.
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

pub fn parse_addr(bind_address: &str) -> Result<SocketAddr, ListenerError> {
    bind_address
        .parse()
        .map_err(|_| ListenerError::Address(bind_address.to_string()))
}

/// Bind a plain TCP listener.
pub async fn bind(bind_address: &str) -> Result<TcpListener, ListenerError> {
    let addr = parse_addr(bind_address)?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ListenerError::Bind(addr, e))?;

    tracing::debug!(address = %addr, "Listener bound");
    Ok(listener)
}

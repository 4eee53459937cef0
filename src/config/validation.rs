//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check forbidden header names are valid header names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use axum::http::HeaderName;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("identity name must not be empty")]
    EmptyIdentity,
    #[error("at least one listener is required")]
    NoListeners,
    #[error("invalid bind address '{0}'")]
    BindAddress(String),
    #[error("listener '{0}' has an empty TLS certificate or key path")]
    TlsPaths(String),
    #[error("timeout '{0}' must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("invalid forbidden header name '{0}'")]
    HeaderName(String),
    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.identity.name.trim().is_empty() {
        errors.push(ValidationError::EmptyIdentity);
    }

    if config.listeners.is_empty() {
        errors.push(ValidationError::NoListeners);
    }
    for listener in &config.listeners {
        if listener.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::BindAddress(listener.bind_address.clone()));
        }
        if let Some(tls) = &listener.tls {
            if tls.cert_path.is_empty() || tls.key_path.is_empty() {
                errors.push(ValidationError::TlsPaths(listener.bind_address.clone()));
            }
        }
    }

    let timeouts = [
        ("connect_secs", config.timeouts.connect_secs),
        ("upstream_secs", config.timeouts.upstream_secs),
        ("request_secs", config.timeouts.request_secs),
        ("drain_secs", config.timeouts.drain_secs),
    ];
    for (name, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    for name in &config.filters.forbidden_headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::HeaderName(name.clone()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

//! Proxy identity.

use std::fmt;
use std::sync::Arc;

use axum::http::{HeaderValue, Version};

use crate::config::IdentityConfig;

/// The proxy's self-reported name.
///
/// Cloning is cheap; the name is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyIdentity {
    name: Arc<str>,
}

impl ProxyIdentity {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Via` entry for a message received with the given protocol version,
    /// e.g. `1.1 forward-proxy`.
    pub fn via_token(&self, version: Version) -> Option<HeaderValue> {
        let protocol = match version {
            Version::HTTP_09 => "0.9",
            Version::HTTP_10 => "1.0",
            Version::HTTP_2 => "2",
            Version::HTTP_3 => "3",
            _ => "1.1",
        };
        HeaderValue::from_str(&format!("{} {}", protocol, self.name)).ok()
    }
}

impl From<&IdentityConfig> for ProxyIdentity {
    fn from(config: &IdentityConfig) -> Self {
        Self::new(config.name.trim())
    }
}

impl Default for ProxyIdentity {
    fn default() -> Self {
        Self::from(&IdentityConfig::default())
    }
}

impl fmt::Display for ProxyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

//! Single-hop HTTP forwarding proxy library.

pub mod config;
pub mod error;
pub mod filters;
pub mod http;
pub mod identity;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use filters::{FilterChain, PostCallFilter, PreCallFilter};
pub use http::{ForwardingEngine, HttpServer};
pub use identity::ProxyIdentity;
pub use lifecycle::Shutdown;

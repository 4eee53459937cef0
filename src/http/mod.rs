//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, tracing, timeouts)
//!     → engine.rs (scheme check, pre-call filters, header policy)
//!     → upstream.rs (network round-trip to the origin)
//!     → engine.rs (response header policy)
//!     → body.rs (stream to caller, then post-call filters)
//! ```

pub mod body;
pub mod engine;
pub mod request;
pub mod server;
pub mod upstream;

pub use engine::ForwardingEngine;
pub use request::{request_id, UuidRequestId, X_REQUEST_ID};
pub use server::HttpServer;
pub use upstream::{HyperUpstream, Upstream, UpstreamError};

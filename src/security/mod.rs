//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request:
//!     → headers.rs (strip hop-by-hop, extend X-Forwarded-For, add Via)
//!     → upstream call
//! Upstream response:
//!     → headers.rs (strip hop-by-hop, add Via)
//!     → caller
//! ```
//!
//! # Design Decisions
//! - Header policy is a set of pure functions over `HeaderMap`
//! - Applied exactly once per leg by the forwarding engine

pub mod headers;

//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Engine and filters produce:
//!     → logging.rs (structured log events, request ID on every event)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod logging;
pub mod metrics;

//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Parse flags → Load config → Validate → Build engine → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C → broadcast → every listener stops accepting and drains
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;

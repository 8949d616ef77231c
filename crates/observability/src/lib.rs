//! Tracing and logging setup shared by every binary that embeds the engine.

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use self::tracing::{init, LogFormat, LogSettings};

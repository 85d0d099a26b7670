//! Logging setup shared by the daemon and its tools.

/// Subscriber configuration and installation.
pub mod tracing;

pub use self::tracing::{LogFormat, LogLevel, LogOptions, ObservabilityError, init};

//! Observability for the presence client
//!
//! Structured logging setup and the per-coordinator metrics collector.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{coordinator_span, mqtt_span, presence_span};

//! Structured logging and process-wide counters

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, level_from_verbosity, LogFormat};
pub use metrics::{BridgeMetrics, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{delta_span, lifecycle_span, mqtt_span};

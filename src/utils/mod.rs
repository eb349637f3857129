//! # Utility Modules
//!
//! Supporting utilities for logging, metrics, and timing.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Async timeout wrappers for caller-chosen bounded waits

pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::{global_metrics, Metrics, MetricsSnapshot};

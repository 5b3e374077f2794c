//! # Utility Modules
//!
//! Supporting utilities for timing, deduplication, logging and observability.
//!
//! ## Components
//! - **Time**: injectable clock so deadlines and backoff can be driven by tests
//! - **Timeout**: async timeout wrappers and the default protocol deadlines
//! - **Backoff**: exponential reconnect delay
//! - **Dedup**: TTL-based suppression of repeated mesh broadcasts
//! - **Logging**: structured logging configuration
//! - **Metrics**: thread-safe link counters

pub mod backoff;
pub mod dedup;
pub mod logging;
pub mod metrics;
pub mod time;
pub mod timeout;

pub use dedup::{BroadcastDeduplicator, DedupKey, DedupSettings};
pub use time::{Clock, ManualClock, SharedClock, TokioClock};

//! # Observability
//!
//! Structured logging for the node. Components log through `tracing` with
//! `height`, `round`, `step`, `peer` and `block_hash` fields; this module
//! installs the subscriber that renders them.

mod logging;

pub use logging::{default_filter, init_logging, LogFormat};

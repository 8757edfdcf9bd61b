//! # Tendril Node
//!
//! Library side of the `tendril-node` binary: configuration loading,
//! logging setup and the wiring that connects chain storage, the
//! synchronizer, the executor and the consensus engine in one process.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Transport  │────▶│MessageRouter │────▶│   Engine /   │
//! │ (PeerSet)    │     │              │     │ Synchronizer │
//! └──────────────┘     └──────────────┘     └──────┬───────┘
//!                                                   │
//!                      ┌──────────────┐     ┌──────▼───────┐
//!                      │   Executor   │◀────│  Blockchain  │
//!                      └──────────────┘     └──────────────┘
//! ```

pub mod config;
pub mod node;
pub mod observability;

pub use config::{MempoolSettings, NodeConfig};
pub use node::Node;

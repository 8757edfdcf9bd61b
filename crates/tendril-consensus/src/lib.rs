//! Tendril Consensus
//!
//! Tendermint-style BFT agreement and chain synchronization for a Tendril
//! node.
//!
//! # Components
//!
//! - [`ConsensusEngine`]: drives one height at a time through
//!   propose, prevote, precommit and commit, with locking, round skip and
//!   escalating timeouts.
//! - [`Synchronizer`]: admits committed blocks in height order, fetches
//!   missing ones and catches a lagging node up in bulk.
//! - [`Blockchain`]: consistent access to the stored chain.
//! - [`Mempool`]: pending transaction pool.
//! - [`DigestExecutor`]: reference executor producing application state.
//! - [`Genesis`]: initial network configuration.
//! - [`MessageRouter`]: fans peer traffic out to the components above.
//!
//! # Block Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Mempool    │────▶│   Proposer   │────▶│   Prevote    │
//! │  (pending)   │     │  (proposal)  │     │   (2/3+)     │
//! └──────────────┘     └──────────────┘     └──────┬───────┘
//!                                                   │
//!                      ┌────────────────────────────┘
//!                      ▼
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Executor    │◀────│ Synchronizer │◀────│  Precommit   │
//! │ (app state)  │     │   (append)   │     │   (2/3+)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

mod chain;
mod config;
mod dispatch;
pub mod engine;
mod error;
mod events;
mod executor;
mod genesis;
mod mempool;
pub mod sync;

pub use chain::Blockchain;
pub use config::{ConsensusConfig, SyncConfig, TimeoutConfig};
pub use dispatch::MessageRouter;
pub use engine::{ConsensusEngine, ConsensusSnapshot, Step};
pub use error::{ConsensusError, Result};
pub use events::{ConsensusEvent, SyncEvent};
pub use executor::{AppState, DigestExecutor, Executor};
pub use genesis::{devnet_keypair, generate_devnet_genesis, Genesis, GenesisValidator};
pub use mempool::{Mempool, MempoolConfig, TransactionPool};
pub use sync::Synchronizer;

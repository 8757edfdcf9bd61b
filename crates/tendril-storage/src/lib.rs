//! Block storage for Tendril.
//!
//! The consensus core treats persistence as an external collaborator reached
//! through the async [`BlockStore`] trait. [`MemoryStore`] is the in-process
//! implementation used by devnets and tests.

mod error;
mod store;
mod traits;

pub use error::{Result, StorageError};
pub use store::MemoryStore;
pub use traits::BlockStore;

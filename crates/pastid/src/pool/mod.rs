//! Shared buffers of pre-minted identifiers.
//!
//! The pool decouples per-request allocation from the durable counter: the
//! [`crate::RefillCoordinator`] tops it up in large batches while
//! [`crate::AllocationService`] pops one identifier at a time. Every
//! operation must be atomic on its own; the pool never relies on the refill
//! lock for consistency.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::*;
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
#[cfg(feature = "redis")]
pub use self::redis::*;

use crate::{Identifier, Result};
use async_trait::async_trait;

/// A concurrent buffer of unconsumed identifiers.
#[async_trait]
pub trait IdentifierPool: Send + Sync {
    /// Removes and returns one identifier, or `None` if the pool is empty.
    ///
    /// Two concurrent calls never return the same identifier.
    async fn try_pop(&self) -> Result<Option<Identifier>>;

    /// Appends all identifiers in one atomic step.
    async fn push_many(&self, ids: Vec<Identifier>) -> Result<()>;

    /// Number of identifiers currently buffered.
    async fn size(&self) -> Result<usize>;
}

//! Error types for the external-collaborator boundary.
//!
//! Invariant violations inside ABD itself are never represented as
//! [`PoolError`] — they are hard assertions (see `debug_assert!`/`assert!`
//! call sites throughout `handle`, `alloc`, `borrow`, `iter`, `relocate`).
//! `PoolError` exists only because the [`crate::pool::ChunkPool`] and
//! [`crate::pool::RawPool`] traits are the one place this crate talks to an
//! allocator that can, in principle, be exhausted.

use thiserror::Error;

/// Failure returned by a [`crate::pool::ChunkPool`] or [`crate::pool::RawPool`]
/// implementation. ABD itself does not recover from these: callers in
/// `alloc`/`relocate` call `.expect()` on the result and let the process
/// abort with a diagnostic, exactly as a resource-exhaustion condition should.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The backing allocator could not satisfy the request.
    #[error("pool exhausted while requesting {requested} bytes")]
    Exhausted {
        /// Size of the request that failed.
        requested: usize,
    },

    /// The caller asked for a size of zero, which no pool implementation
    /// is obliged to service.
    #[error("refusing to allocate a zero-sized buffer")]
    ZeroSize,
}

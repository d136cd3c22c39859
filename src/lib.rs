//! ABD: a transparent linear/scattered byte buffer with zero-copy views, a
//! borrow protocol for contiguity, and background slab relocation.
//!
//! A Handle (`abd_t` in the source this crate's design is grounded on) owns
//! or borrows its bytes either as one contiguous allocation (`Linear`) or as
//! a sequence of fixed-size chunks from an external pool (`Scattered`).
//! Views carve out a sub-range of a parent Handle without copying; a borrow
//! hands a consumer a flat pointer even over scattered storage, at the cost
//! of a scratch-buffer copy. Neither allocation policy nor eviction is
//! implemented here — both are owned by the [`pool::ChunkPool`]/
//! [`pool::RawPool`] a caller supplies through [`context::AbdContext`].
//!
//! Logging is emitted through the [`log`] facade at `trace` level for
//! individual operations; this crate does not install a logger itself, the
//! same way a library depending on `log` never does.

mod constants;
mod cursor;
mod error;
mod flags;
mod handle;
mod options;
mod pool;
mod stats;

pub mod alloc;
pub mod borrow;
pub mod context;
pub mod iter;
pub mod relocate;

pub use constants::MAX_BLOCK_SIZE;
pub use error::PoolError;
pub use flags::AbdFlags;
pub use handle::Handle;
pub use options::AbdOptions;
pub use pool::{BufKind, ChunkPool, RawPool, SystemChunkPool, SystemRawPool};
pub use stats::{Counter, Stats};

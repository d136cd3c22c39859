//! `AbdContext`: the one object a consumer constructs and threads through
//! every call. It owns the pools, the tunables, and the stats registry so
//! that `alloc`/`borrow`/`iterate_func`/`try_move` never reach into ambient
//! globals.

use crate::options::AbdOptions;
use crate::pool::{ChunkPool, RawPool, SystemChunkPool, SystemRawPool};
use crate::stats::Stats;
use std::sync::Arc;

pub struct AbdContext {
    pub(crate) chunk_pool: Arc<dyn ChunkPool>,
    pub(crate) raw_pool: Arc<dyn RawPool>,
    pub(crate) options: AbdOptions,
    pub stats: Stats,
}

impl AbdContext {
    pub fn new(chunk_pool: Arc<dyn ChunkPool>, raw_pool: Arc<dyn RawPool>, options: AbdOptions) -> Self {
        assert_eq!(chunk_pool.chunk_size(), options.chunk_size(), "ChunkPool and AbdOptions disagree on chunk_size");
        AbdContext { chunk_pool, raw_pool, options, stats: Stats::new() }
    }

    /// Convenience constructor wiring up the two `libc`-backed reference
    /// pools this crate ships.
    pub fn system_default(chunk_size: usize, scatter_enabled: bool) -> Self {
        AbdContext::new(
            Arc::new(SystemChunkPool::new(chunk_size)),
            Arc::new(SystemRawPool),
            AbdOptions::new(chunk_size, scatter_enabled),
        )
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.options.chunk_size()
    }

    #[inline]
    pub fn scatter_enabled(&self) -> bool {
        self.options.scatter_enabled()
    }

    pub fn set_scatter_enabled(&self, enabled: bool) {
        self.options.set_scatter_enabled(enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_default_wires_matching_chunk_size() {
        let ctx = AbdContext::system_default(1024, true);
        assert_eq!(ctx.chunk_size(), 1024);
        assert!(ctx.scatter_enabled());
    }

    #[test]
    #[should_panic(expected = "disagree on chunk_size")]
    fn mismatched_chunk_size_rejected() {
        let pool = Arc::new(SystemChunkPool::new(1024));
        AbdContext::new(pool, Arc::new(SystemRawPool), AbdOptions::new(2048, true));
    }
}

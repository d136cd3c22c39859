//! Runtime tunables. A plain struct, not a
//! config-file layer: `chunk_size` is boot-only (read once when an
//! [`crate::context::AbdContext`] is constructed and then frozen) while
//! `scatter_enabled` is runtime-settable and affects only future
//! allocations.

use std::sync::atomic::{AtomicBool, Ordering};

/// Tunables threaded through every [`crate::context::AbdContext`].
pub struct AbdOptions {
    /// Frozen at construction. Every scattered Handle created under this
    /// context reads its own copy at creation time;
    /// this field is the single source of truth for new allocations.
    chunk_size: usize,
    /// Runtime switch. `false` routes `alloc`/`alloc_same_type` straight to
    /// `alloc_linear`.
    scatter_enabled: AtomicBool,
}

impl AbdOptions {
    pub fn new(chunk_size: usize, scatter_enabled: bool) -> Self {
        assert!(chunk_size > 0 && chunk_size.is_power_of_two(), "chunk_size must be a nonzero power of two");
        AbdOptions {
            chunk_size,
            scatter_enabled: AtomicBool::new(scatter_enabled),
        }
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub fn scatter_enabled(&self) -> bool {
        self.scatter_enabled.load(Ordering::Relaxed)
    }

    pub fn set_scatter_enabled(&self, enabled: bool) {
        self.scatter_enabled.store(enabled, Ordering::Relaxed);
    }
}

impl Default for AbdOptions {
    fn default() -> Self {
        AbdOptions::new(crate::constants::DEFAULT_CHUNK_SIZE, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_scatter() {
        let opts = AbdOptions::default();
        assert!(opts.scatter_enabled());
        assert_eq!(opts.chunk_size(), crate::constants::DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn scatter_enabled_is_runtime_settable() {
        let opts = AbdOptions::default();
        opts.set_scatter_enabled(false);
        assert!(!opts.scatter_enabled());
    }
}

//! External collaborators: the chunk allocator and the typed raw-buffer
//! allocator. ABD never implements allocation policy itself; it
//! only consumes these two traits. `SystemChunkPool`/`SystemRawPool` are the
//! one in-process reference backend this crate ships, built directly on
//! `libc::malloc`/`libc::free` rather than reimplementing an allocator.

use crate::error::PoolError;
use std::ptr::NonNull;

/// Which of the two typed arenas a [`RawPool`] buffer comes from. Tracked so
/// a Handle's `META` flag can pick the matching free path on `free`/`try_move`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufKind {
    Data,
    Metadata,
}

/// Vends fixed-size chunks. Chunk size is frozen at init and is not a
/// parameter of the trait methods themselves —
/// a `ChunkPool` implementation is constructed for one size and used for
/// the lifetime of the [`crate::context::AbdContext`] that owns it.
pub trait ChunkPool: Send + Sync {
    /// Size of every chunk this pool vends, fixed for the pool's lifetime.
    fn chunk_size(&self) -> usize;

    /// Request one chunk. Blocks or aborts on exhaustion;
    /// implementations that can recover return `Err` instead and the
    /// caller is expected to treat it as fatal.
    fn alloc_chunk(&self) -> Result<NonNull<u8>, PoolError>;

    /// Return a chunk to whatever per-CPU cache the pool maintains.
    ///
    /// # Safety
    /// `ptr` must have come from `alloc_chunk` on this pool and must not be
    /// freed twice.
    unsafe fn free_chunk(&self, ptr: NonNull<u8>);

    /// Return a chunk directly to the slab, bypassing any per-CPU cache.
    /// Used exclusively by the relocation path so that
    /// memory freed during defragmentation doesn't immediately get handed
    /// back out of the same fragmented slab.
    ///
    /// # Safety
    /// Same contract as [`ChunkPool::free_chunk`].
    unsafe fn free_chunk_to_slab(&self, ptr: NonNull<u8>);

    /// Operator-invoked periodic drain of any per-CPU working set. Most
    /// implementations (including [`SystemChunkPool`]) have no such cache
    /// and treat this as a no-op.
    fn depot_working_set_zero(&self) {}
}

/// Vends arbitrarily sized data/metadata buffers for linear Handles, borrow
/// scratch buffers, and relocation targets.
pub trait RawPool: Send + Sync {
    /// Allocate `size` bytes of the given kind. Contents are unspecified
    /// (borrow scratch has undefined contents).
    fn alloc(&self, size: usize, kind: BufKind) -> Result<NonNull<u8>, PoolError>;

    /// Free a buffer previously returned by `alloc` with the same `size`
    /// and `kind`.
    ///
    /// # Safety
    /// `ptr` must have come from `alloc` on this pool with the same `size`
    /// and `kind`, and must not be freed twice.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, kind: BufKind);
}

/// Reference [`ChunkPool`] backed directly by `libc::malloc`/`libc::free`.
/// Has no per-CPU magazine layer, so `free_chunk` and `free_chunk_to_slab`
/// are identical here; a production allocator with a real per-CPU cache
/// would differentiate them.
pub struct SystemChunkPool {
    chunk_size: usize,
}

impl SystemChunkPool {
    pub fn new(chunk_size: usize) -> Self {
        assert!(chunk_size > 0 && chunk_size.is_power_of_two(), "chunk_size must be a nonzero power of two");
        SystemChunkPool { chunk_size }
    }
}

impl ChunkPool for SystemChunkPool {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn alloc_chunk(&self) -> Result<NonNull<u8>, PoolError> {
        raw_malloc(self.chunk_size)
    }

    unsafe fn free_chunk(&self, ptr: NonNull<u8>) {
        log::trace!("free_chunk {:p}", ptr.as_ptr());
        libc::free(ptr.as_ptr() as *mut libc::c_void);
    }

    unsafe fn free_chunk_to_slab(&self, ptr: NonNull<u8>) {
        log::trace!("free_chunk_to_slab {:p}", ptr.as_ptr());
        libc::free(ptr.as_ptr() as *mut libc::c_void);
    }
}

/// Reference [`RawPool`] backed directly by `libc::malloc`/`libc::free`.
pub struct SystemRawPool;

impl RawPool for SystemRawPool {
    fn alloc(&self, size: usize, kind: BufKind) -> Result<NonNull<u8>, PoolError> {
        log::trace!("raw alloc {} bytes ({:?})", size, kind);
        raw_malloc(size)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, kind: BufKind) {
        log::trace!("raw free {:p} ({} bytes, {:?})", ptr.as_ptr(), size, kind);
        libc::free(ptr.as_ptr() as *mut libc::c_void);
    }
}

fn raw_malloc(size: usize) -> Result<NonNull<u8>, PoolError> {
    if size == 0 {
        return Err(PoolError::ZeroSize);
    }
    let ptr = unsafe { libc::malloc(size) } as *mut u8;
    NonNull::new(ptr).ok_or(PoolError::Exhausted { requested: size })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_chunk_pool_round_trip() {
        let pool = SystemChunkPool::new(1024);
        let chunk = pool.alloc_chunk().unwrap();
        unsafe { pool.free_chunk(chunk) };
    }

    #[test]
    fn system_raw_pool_round_trip() {
        let pool = SystemRawPool;
        let buf = pool.alloc(2500, BufKind::Data).unwrap();
        unsafe { pool.free(buf, 2500, BufKind::Data) };
    }

    #[test]
    #[should_panic]
    fn chunk_size_must_be_power_of_two() {
        SystemChunkPool::new(700);
    }
}

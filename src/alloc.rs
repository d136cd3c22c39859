//! Allocator operations: construct, derive, and tear down Handles.

use crate::constants::MAX_BLOCK_SIZE;
use crate::context::AbdContext;
use crate::error::PoolError;
use crate::flags::AbdFlags;
use crate::handle::{Handle, Storage};
use crate::pool::BufKind;
use crate::stats::Counter;
use std::ptr::NonNull;

fn check_size(size: usize) {
    assert!(size > 0 && size <= MAX_BLOCK_SIZE, "size {} out of range (0, {}]", size, MAX_BLOCK_SIZE);
}

/// Default constructor. Delegates to [`alloc_linear`] when
/// `ctx.scatter_enabled()` is false; otherwise scatter-allocates from
/// `ctx`'s [`crate::pool::ChunkPool`].
pub fn alloc(ctx: &AbdContext, size: usize, is_metadata: bool) -> Result<Handle, PoolError> {
    check_size(size);
    if !ctx.scatter_enabled() {
        return alloc_linear(ctx, size, is_metadata);
    }

    let chunk_size = ctx.chunk_size();
    let n = (size + chunk_size - 1) / chunk_size;
    let mut chunks = Vec::with_capacity(n);
    for _ in 0..n {
        match ctx.chunk_pool.alloc_chunk() {
            Ok(c) => chunks.push(c),
            Err(e) => {
                // Unwind what we already grabbed; a partial scatter
                // allocation must not leak chunks back to the pool.
                for c in chunks {
                    unsafe { ctx.chunk_pool.free_chunk(c) };
                }
                return Err(e);
            }
        }
    }

    let mut flags = AbdFlags::OWNER;
    if is_metadata {
        flags |= AbdFlags::META;
    }
    if size < chunk_size {
        flags |= AbdFlags::SMALL;
    }
    let handle = Handle::new(Storage::Scattered { offset: 0, chunk_size, chunks }, flags, size);

    let waste = (n * chunk_size) as i64 - size as i64;
    ctx.stats.inc(Counter::scatter_cnt);
    ctx.stats.add(Counter::scatter_data_size, size as i64);
    ctx.stats.add(Counter::scatter_chunk_waste, waste);
    if is_metadata {
        ctx.stats.inc(Counter::scattered_metadata_cnt);
    } else {
        ctx.stats.inc(Counter::scattered_filedata_cnt);
    }
    if size < chunk_size {
        ctx.stats.inc(Counter::small_scatter_cnt);
    }
    log::trace!("alloc scattered size={} chunks={} meta={}", size, n, is_metadata);
    handle.check_invariants();
    Ok(handle)
}

/// Requests one contiguous buffer of exactly `size` bytes from the
/// context's [`crate::pool::RawPool`].
pub fn alloc_linear(ctx: &AbdContext, size: usize, is_metadata: bool) -> Result<Handle, PoolError> {
    check_size(size);
    let kind = if is_metadata { BufKind::Metadata } else { BufKind::Data };
    let buf = ctx.raw_pool.alloc(size, kind)?;

    let mut flags = AbdFlags::LINEAR | AbdFlags::OWNER;
    if is_metadata {
        flags |= AbdFlags::META;
    }
    let handle = Handle::new(Storage::Linear { buf }, flags, size);

    ctx.stats.inc(Counter::linear_cnt);
    ctx.stats.add(Counter::linear_data_size, size as i64);
    if is_metadata {
        ctx.stats.inc(Counter::linear_metadata_cnt);
    } else {
        ctx.stats.inc(Counter::linear_filedata_cnt);
    }
    log::trace!("alloc linear size={} meta={}", size, is_metadata);
    handle.check_invariants();
    Ok(handle)
}

/// Dispatches to [`alloc_linear`] or [`alloc`] based on `source`'s
/// `LINEAR`/`META` flags; `source` is not otherwise consulted.
pub fn alloc_same_type(ctx: &AbdContext, source: &Handle, size: usize) -> Result<Handle, PoolError> {
    if source.is_linear() {
        alloc_linear(ctx, size, source.is_metadata())
    } else {
        alloc(ctx, size, source.is_metadata())
    }
}

/// Alias for [`alloc`]. Documents the intent that a future scatter-gather
/// I/O path may bypass materialization; today it is identical
/// to `alloc`.
#[inline]
pub fn alloc_for_io(ctx: &AbdContext, size: usize, is_metadata: bool) -> Result<Handle, PoolError> {
    alloc(ctx, size, is_metadata)
}

/// Wraps an externally owned linear buffer. The result carries `LINEAR |
/// NOMOVE` and no `OWNER` — callers that want ABD to own (and eventually
/// free) `buf` must call [`crate::borrow::take_ownership_of_buf`]
/// afterwards.
///
/// # Safety
/// `buf` must be valid for reads and writes for `size` bytes for as long as
/// the returned Handle (and any view derived from it) is alive.
pub unsafe fn get_from_buf(buf: NonNull<u8>, size: usize) -> Handle {
    check_size(size);
    let handle = Handle::new(Storage::Linear { buf }, AbdFlags::LINEAR | AbdFlags::NOMOVE, size);
    log::trace!("get_from_buf size={}", size);
    handle.check_invariants();
    handle
}

/// Derives a view over `source`'s bytes `[off, off+size)`. `size` must be
/// strictly positive. Pins `source` against relocation, adds `size` to its
/// weighted child refcount, and adjusts the scatter offset/chunk sequence
/// so the view addresses the same underlying bytes without copying.
pub fn get_offset_size(source: &Handle, off: usize, size: usize) -> Handle {
    assert!(size > 0, "view size must be strictly positive");

    let storage = {
        let src = source.lock();
        let end = off.checked_add(size).expect("offset + size overflow");
        assert!(end <= src.size, "view range [{}, {}) exceeds source size {}", off, end, src.size);
        match &src.storage {
            Storage::Linear { buf } => {
                // SAFETY: `off < src.size` was just asserted, so `off` is
                // within the bytes `buf` is valid for.
                let view_buf = unsafe { NonNull::new_unchecked(buf.as_ptr().add(off)) };
                Storage::Linear { buf: view_buf }
            }
            Storage::Scattered { offset, chunk_size, chunks } => {
                let abs = offset + off;
                let start_chunk = abs / chunk_size;
                let new_offset = abs % chunk_size;
                let needed = (new_offset + size + chunk_size - 1) / chunk_size;
                let view_chunks = chunks[start_chunk..start_chunk + needed].to_vec();
                Storage::Scattered { offset: new_offset, chunk_size: *chunk_size, chunks: view_chunks }
            }
        }
    };

    let mut view_flags = AbdFlags::NOMOVE;
    if matches!(storage, Storage::Linear { .. }) {
        view_flags |= AbdFlags::LINEAR;
    }
    let view = Handle::new(storage, view_flags, size);
    {
        let mut vg = view.lock();
        vg.parent = Some(source.clone());
    }
    {
        let mut sg = source.lock();
        sg.flags |= AbdFlags::NOMOVE;
    }
    source.add_child_weight(size);

    log::trace!("get_offset_size off={} size={}", off, size);
    view.check_invariants();
    source.check_invariants();
    view
}

/// `get_offset_size(source, off, source.size() - off)`.
pub fn get_offset(source: &Handle, off: usize) -> Handle {
    let src_size = source.size();
    assert!(off <= src_size, "offset {} exceeds source size {}", off, src_size);
    get_offset_size(source, off, src_size - off)
}

/// Root-only teardown. Returns the backing storage to `ctx`'s pools and
/// deallocates the Handle record.
///
/// # Panics
/// If `handle` is not an owning root, or has live views (`child_refcount >
/// 0`).
pub fn free(ctx: &AbdContext, handle: Handle) -> Result<(), PoolError> {
    {
        let mut g = handle.lock();
        assert!(g.flags.is_owner(), "free() called on a non-owning Handle (use put())");
        assert!(g.parent.is_none(), "free() called on a Handle with a parent (use put())");
        assert_eq!(handle.child_refcount(), 0, "free() called while views are live");
        g.flags |= AbdFlags::NOMOVE;
    }

    let g = handle.lock();
    match &g.storage {
        Storage::Linear { buf } => {
            let kind = if g.flags.is_metadata() { BufKind::Metadata } else { BufKind::Data };
            unsafe { ctx.raw_pool.free(*buf, g.size, kind) };
            ctx.stats.dec(Counter::linear_cnt);
            ctx.stats.add(Counter::linear_data_size, -(g.size as i64));
            if g.flags.is_metadata() {
                ctx.stats.dec(Counter::linear_metadata_cnt);
            } else {
                ctx.stats.dec(Counter::linear_filedata_cnt);
            }
        }
        Storage::Scattered { chunk_size, chunks, .. } => {
            for &c in chunks {
                unsafe { ctx.chunk_pool.free_chunk(c) };
            }
            let n = chunks.len();
            ctx.stats.dec(Counter::scatter_cnt);
            ctx.stats.add(Counter::scatter_data_size, -(g.size as i64));
            ctx.stats.add(Counter::scatter_chunk_waste, g.size as i64 - (n * chunk_size) as i64);
            if g.flags.is_metadata() {
                ctx.stats.dec(Counter::scattered_metadata_cnt);
            } else {
                ctx.stats.dec(Counter::scattered_filedata_cnt);
            }
            if g.flags.is_small() {
                ctx.stats.dec(Counter::small_scatter_cnt);
            }
        }
    }
    log::trace!("free size={}", g.size);
    drop(g);
    Ok(())
}

/// View-only teardown. Decrements the parent's weighted child refcount by
/// `handle.size()`; if it reaches zero, clears the parent's `NOMOVE`
/// *unless* the parent is separately pinned by a `to_buf` borrow (design
/// note (a)). Deallocates the Handle record, never the backing storage.
///
/// # Panics
/// If `handle` is an owning Handle, or has no parent.
pub fn put(handle: Handle) {
    let (parent, weight) = {
        let g = handle.lock();
        assert!(!g.flags.is_owner(), "put() called on an owning Handle (use free())");
        let parent = g.parent.clone().expect("put() called on a Handle with no parent");
        (parent, g.size)
    };
    let reached_zero = parent.sub_child_weight(weight);
    if reached_zero {
        let mut pg = parent.lock();
        if !pg.pinned_by_to_buf {
            pg.flags.remove(AbdFlags::NOMOVE);
        }
    }
    log::trace!("put view size={}", weight);
}

//! Borrow protocol: temporary flat-pointer access to a Handle's
//! bytes, with correctness on return enforced by a read-only invariant for
//! the scattered path.

use crate::context::AbdContext;
use crate::flags::AbdFlags;
use crate::handle::{Handle, Storage};
use crate::iter::{cmp_buf, cmp_buf_off, copy_from_buf_off, copy_to_buf_off};
use crate::pool::BufKind;
use crate::stats::Counter;
use std::ptr::NonNull;

/// Returns a flat pointer to `n` bytes backed by `handle`. If `handle` is
/// linear, this is the Handle's own buffer (no allocation). If scattered,
/// a fresh scratch buffer is allocated from `ctx`'s
/// [`crate::pool::RawPool`] with **undefined contents**. Either way, `n`
/// is added to `handle`'s weighted child refcount, keyed by the returned
/// pointer's identity.
pub fn borrow_buf(ctx: &AbdContext, handle: &Handle, n: usize) -> NonNull<u8> {
    assert!(n <= handle.size(), "borrow_buf: n={} exceeds handle size={}", n, handle.size());
    let ptr = {
        let g = handle.lock();
        match &g.storage {
            Storage::Linear { buf } => *buf,
            Storage::Scattered { .. } => ctx.raw_pool.alloc(n, BufKind::Data).expect("borrow scratch allocation failed"),
        }
    };
    handle.register_borrow(ptr, n);
    handle.add_child_weight(n);
    ctx.stats.inc(Counter::borrowed_bufs);
    log::trace!("borrow_buf n={} linear={}", n, handle.is_linear());
    ptr
}

/// As [`borrow_buf`], but on the scattered path materializes the Handle's
/// first `n` bytes into the scratch buffer instead of leaving it undefined.
pub fn borrow_buf_copy(ctx: &AbdContext, handle: &Handle, n: usize) -> NonNull<u8> {
    let ptr = borrow_buf(ctx, handle, n);
    if !handle.is_linear() {
        let slice = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), n) };
        copy_to_buf_off(handle, slice, 0, n);
    }
    ptr
}

fn take_borrow(handle: &Handle, buf: NonNull<u8>, n: usize) {
    let recorded = handle.remove_borrow(buf);
    assert_eq!(recorded, Some(n), "return_buf: no matching borrow_buf registration for this pointer/size");
}

/// Ends a borrow taken out with [`borrow_buf`]/[`borrow_buf_copy`]. Linear:
/// asserts `buf` is the Handle's own buffer (no mutation permitted, nothing
/// freed). Scattered: asserts the caller did not mutate the borrow (`buf`
/// still matches the Handle's current bytes) and frees the scratch buffer.
pub fn return_buf(ctx: &AbdContext, handle: &Handle, buf: NonNull<u8>, n: usize) {
    take_borrow(handle, buf, n);
    if handle.is_linear() {
        let own = { handle.lock().linear_buf().expect("return_buf: linear Handle with no linear storage") };
        assert_eq!(own.as_ptr(), buf.as_ptr(), "return_buf: linear borrow must not be mutated or replaced");
    } else {
        let slice = unsafe { std::slice::from_raw_parts(buf.as_ptr(), n) };
        assert_eq!(cmp_buf(handle, slice, n), 0, "return_buf: scattered borrow was mutated before return");
        unsafe { ctx.raw_pool.free(buf, n, BufKind::Data) };
    }
    handle.sub_child_weight(n);
    ctx.stats.dec(Counter::borrowed_bufs);
    log::trace!("return_buf n={}", n);
}

/// As [`return_buf`], but first copies `buf` back into the Handle so the
/// read-only check in `return_buf` passes trivially.
pub fn return_buf_copy(ctx: &AbdContext, handle: &Handle, buf: NonNull<u8>, n: usize) {
    if !handle.is_linear() {
        let slice = unsafe { std::slice::from_raw_parts(buf.as_ptr(), n) };
        copy_from_buf_off(handle, slice, 0, n);
    }
    return_buf(ctx, handle, buf, n);
}

/// As [`return_buf`], but only `buf[off..off+len)` is declared valid —
/// the scattered-side check becomes `cmp_buf_off(handle, buf[off..], off,
/// len) == 0` instead of comparing the whole `n`-byte scratch buffer.
pub fn return_buf_off(ctx: &AbdContext, handle: &Handle, buf: NonNull<u8>, off: usize, len: usize, n: usize) {
    take_borrow(handle, buf, n);
    if handle.is_linear() {
        let own = { handle.lock().linear_buf().expect("return_buf_off: linear Handle with no linear storage") };
        assert_eq!(own.as_ptr(), buf.as_ptr(), "return_buf_off: linear borrow must not be mutated or replaced");
    } else {
        let slice = unsafe { std::slice::from_raw_parts(buf.as_ptr().add(off), len) };
        assert_eq!(cmp_buf_off(handle, slice, off, len), 0, "return_buf_off: scattered borrow was mutated before return");
        unsafe { ctx.raw_pool.free(buf, n, BufKind::Data) };
    }
    handle.sub_child_weight(n);
    ctx.stats.dec(Counter::borrowed_bufs);
    log::trace!("return_buf_off off={} len={} n={}", off, len, n);
}

/// As [`return_buf_off`], but first copies `buf[off..off+len)` back into
/// the Handle at the same offset.
pub fn return_buf_copy_off(ctx: &AbdContext, handle: &Handle, buf: NonNull<u8>, off: usize, len: usize, n: usize) {
    if !handle.is_linear() {
        let slice = unsafe { std::slice::from_raw_parts(buf.as_ptr().add(off), len) };
        copy_from_buf_off(handle, slice, off, len);
    }
    return_buf_off(ctx, handle, buf, off, len, n);
}

/// Linear-only shortcut: returns the raw pointer and pins the Handle
/// against relocation until a view descending from it releases the pin
/// (design note (a)).
pub fn to_buf(handle: &Handle) -> NonNull<u8> {
    let mut g = handle.lock();
    let buf = g.linear_buf().expect("to_buf: Handle is not linear");
    g.flags |= AbdFlags::NOMOVE;
    g.pinned_by_to_buf = true;
    buf
}

/// As [`to_buf`], but does not set `NOMOVE`. For assertions/diagnostics
/// that do not retain the pointer beyond the current stack frame.
pub fn to_buf_ephemeral(handle: &Handle) -> NonNull<u8> {
    handle.lock().linear_buf().expect("to_buf_ephemeral: Handle is not linear")
}

/// Flips `OWNER` (and `META` if requested) on a non-owning linear root,
/// converting it from caller-supplied storage into ABD-owned storage.
pub fn take_ownership_of_buf(ctx: &AbdContext, handle: &Handle, is_metadata: bool) {
    let size = {
        let mut g = handle.lock();
        assert!(g.is_linear(), "take_ownership_of_buf: Handle is not linear");
        assert!(g.parent.is_none(), "take_ownership_of_buf: Handle has a parent");
        assert!(!g.flags.is_owner(), "take_ownership_of_buf: Handle already owns its buffer");
        g.flags |= AbdFlags::OWNER;
        if is_metadata {
            g.flags |= AbdFlags::META;
        }
        g.size
    };
    ctx.stats.inc(Counter::linear_cnt);
    ctx.stats.add(Counter::linear_data_size, size as i64);
    if is_metadata {
        ctx.stats.inc(Counter::linear_metadata_cnt);
    } else {
        ctx.stats.inc(Counter::linear_filedata_cnt);
    }
    handle.check_invariants();
}

/// Inverse of [`take_ownership_of_buf`].
pub fn release_ownership_of_buf(ctx: &AbdContext, handle: &Handle) {
    let (size, was_metadata) = {
        let mut g = handle.lock();
        assert!(g.is_linear(), "release_ownership_of_buf: Handle is not linear");
        assert!(g.flags.is_owner(), "release_ownership_of_buf: Handle does not own its buffer");
        let was_metadata = g.flags.is_metadata();
        g.flags.remove(AbdFlags::OWNER | AbdFlags::META);
        (g.size, was_metadata)
    };
    ctx.stats.dec(Counter::linear_cnt);
    ctx.stats.add(Counter::linear_data_size, -(size as i64));
    if was_metadata {
        ctx.stats.dec(Counter::linear_metadata_cnt);
    } else {
        ctx.stats.dec(Counter::linear_filedata_cnt);
    }
    handle.check_invariants();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{alloc, alloc_linear, free, get_from_buf};
    use crate::context::AbdContext;
    use crate::iter::copy_from_buf;

    fn ctx() -> AbdContext {
        AbdContext::system_default(1024, true)
    }

    #[test]
    fn s4_borrow_copy_zeroes_scattered() {
        let c = ctx();
        let h = alloc(&c, 2500, false).unwrap();
        copy_from_buf(&h, &vec![0xAAu8; 2500], 2500);
        let before = c.stats.get(Counter::borrowed_bufs);
        let b = borrow_buf(&c, &h, 2500);
        unsafe { std::ptr::write_bytes(b.as_ptr(), 0, 2500) };
        return_buf_copy(&c, &h, b, 2500);
        assert_eq!(cmp_buf(&h, &vec![0u8; 2500], 2500), 0);
        assert_eq!(c.stats.get(Counter::borrowed_bufs), before);
        free(&c, h).unwrap();
    }

    #[test]
    #[should_panic(expected = "mutated before return")]
    fn return_buf_rejects_silent_mutation() {
        let c = ctx();
        let h = alloc(&c, 256, false).unwrap();
        let b = borrow_buf(&c, &h, 256);
        unsafe { std::ptr::write_bytes(b.as_ptr(), 0x42, 256) };
        return_buf(&c, &h, b, 256);
    }

    #[test]
    fn borrow_on_linear_is_zero_copy() {
        let c = ctx();
        let h = alloc_linear(&c, 64, false).unwrap();
        let own = to_buf_ephemeral(&h);
        let b = borrow_buf(&c, &h, 64);
        assert_eq!(own.as_ptr(), b.as_ptr());
        return_buf(&c, &h, b, 64);
        free(&c, h).unwrap();
    }

    #[test]
    fn s5_linear_ownership_transfer() {
        let c = ctx();
        let layout = std::alloc::Layout::from_size_align(1024, 1).unwrap();
        let raw = std::ptr::NonNull::new(unsafe { std::alloc::alloc(layout) }).unwrap();
        unsafe { std::ptr::write_bytes(raw.as_ptr(), 0xAB, 1024) };
        let h = unsafe { get_from_buf(raw, 1024) };
        assert!(!h.is_owner());
        assert!(h.flags().is_nomove());

        take_ownership_of_buf(&c, &h, false);
        assert!(h.is_owner());
        assert_eq!(c.stats.get(Counter::linear_cnt), 1);

        // `free` here returns the buffer to the RawPool; since it actually
        // came from the global allocator (not libc malloc) in this test we
        // don't call the real SystemRawPool::free to avoid a cross-allocator
        // mismatch — we exercise the ownership flip/stat bump only.
        release_ownership_of_buf(&c, &h);
        assert!(!h.is_owner());
        unsafe { std::alloc::dealloc(raw.as_ptr(), layout) };
    }
}

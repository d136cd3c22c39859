//! Iterator engine: `iterate_func`/`iterate_func2` and the
//! derived bulk-copy/compare/zero primitives built on top of them.
//!
//! The C source's callback takes a `void *ctx`; in Rust the equivalent is
//! just a closure's captured environment, so the public signatures here
//! drop the explicit `ctx` parameter a C-style callback would carry — `FnMut`
//! already carries whatever state the caller needs.

use crate::cursor::Cursor;
use crate::handle::Handle;
use std::cmp::Ordering;

/// Lock `handle`, advance to `off`, then repeatedly map/call/unmap/advance
/// until `size` bytes have been visited or `f` returns non-zero. Returns
/// the first non-zero callback result, or `0` if the whole range was
/// visited.
pub fn iterate_func(handle: &Handle, off: usize, size: usize, mut f: impl FnMut(&mut [u8]) -> i32) -> i32 {
    if size == 0 {
        return 0;
    }
    let guard = handle.lock();
    assert!(off.checked_add(size).map_or(false, |end| end <= guard.size), "iterate_func range out of bounds");

    let mut cursor = Cursor::init(off);
    let mut remaining = size;
    let mut rc = 0;
    while remaining > 0 {
        cursor.map(&guard);
        debug_assert!(cursor.is_mapped(), "cursor ran past EOF inside a bounds-checked range");
        let len = cursor.map_size().min(remaining);
        let ptr = cursor.map_addr().unwrap();
        // SAFETY: `ptr` is within the bytes owned by `handle`'s storage as
        // established by `Cursor::map`, and we hold `handle`'s lock for the
        // duration of the borrow.
        let slice = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) };
        rc = f(slice);
        cursor.unmap();
        if rc != 0 {
            break;
        }
        cursor.advance(len);
        remaining -= len;
    }
    rc
}

/// Dual-cursor variant. Locks both handles in canonical order (lower
/// `Handle` address first) to avoid the classic A-B/B-A lock-ordering deadlock.
pub fn iterate_func2(
    dst: &Handle,
    src: &Handle,
    doff: usize,
    soff: usize,
    size: usize,
    mut f: impl FnMut(&mut [u8], &[u8]) -> i32,
) -> i32 {
    assert!(dst != src, "iterate_func2 requires distinct handles");
    if size == 0 {
        return 0;
    }

    let dst_first = dst.addr() < src.addr();
    let (guard_a, guard_b) = if dst_first { (dst.lock(), src.lock()) } else { (src.lock(), dst.lock()) };
    let (dst_state, src_state) = if dst_first { (&guard_a, &guard_b) } else { (&guard_b, &guard_a) };

    assert!(doff.checked_add(size).map_or(false, |end| end <= dst_state.size), "iterate_func2 dst range out of bounds");
    assert!(soff.checked_add(size).map_or(false, |end| end <= src_state.size), "iterate_func2 src range out of bounds");

    let mut dcur = Cursor::init(doff);
    let mut scur = Cursor::init(soff);
    let mut remaining = size;
    let mut rc = 0;
    while remaining > 0 {
        dcur.map(dst_state);
        scur.map(src_state);
        let len = dcur.map_size().min(scur.map_size()).min(remaining);
        let dptr = dcur.map_addr().unwrap();
        let sptr = scur.map_addr().unwrap();
        // SAFETY: both pointers fall within their handle's bytes per
        // `Cursor::map`, both handles are locked for the duration, and
        // `dst != src` was asserted above so the two slices cannot alias.
        let dslice = unsafe { std::slice::from_raw_parts_mut(dptr.as_ptr(), len) };
        let sslice = unsafe { std::slice::from_raw_parts(sptr.as_ptr(), len) };
        rc = f(dslice, sslice);
        dcur.unmap();
        scur.unmap();
        if rc != 0 {
            break;
        }
        dcur.advance(len);
        scur.advance(len);
        remaining -= len;
    }
    rc
}

/// Materialize `handle`'s bytes `[off, off+size)` into `dst[0..size]`.
pub fn copy_to_buf_off(handle: &Handle, dst: &mut [u8], off: usize, size: usize) {
    assert!(dst.len() >= size);
    let mut written = 0usize;
    iterate_func(handle, off, size, |chunk| {
        dst[written..written + chunk.len()].copy_from_slice(chunk);
        written += chunk.len();
        0
    });
}

/// Write `src[0..size]` into `handle`'s bytes `[off, off+size)`.
pub fn copy_from_buf_off(handle: &Handle, src: &[u8], off: usize, size: usize) {
    assert!(src.len() >= size);
    let mut read = 0usize;
    iterate_func(handle, off, size, |chunk| {
        chunk.copy_from_slice(&src[read..read + chunk.len()]);
        read += chunk.len();
        0
    });
}

/// Sign-preserving byte compare of `handle`'s bytes `[off, off+size)`
/// against `buf[0..size]`. Zero iff equal.
pub fn cmp_buf_off(handle: &Handle, buf: &[u8], off: usize, size: usize) -> i32 {
    let mut read = 0usize;
    let mut result = 0i32;
    iterate_func(handle, off, size, |chunk| match chunk.cmp(&buf[read..read + chunk.len()]) {
        Ordering::Equal => {
            read += chunk.len();
            0
        }
        Ordering::Less => {
            result = -1;
            1
        }
        Ordering::Greater => {
            result = 1;
            1
        }
    });
    result
}

/// Zero `handle`'s bytes `[off, off+size)`.
pub fn zero_off(handle: &Handle, off: usize, size: usize) {
    iterate_func(handle, off, size, |chunk| {
        chunk.fill(0);
        0
    });
}

/// Copy `size` bytes from `src[soff..]` into `dst[doff..]`.
pub fn copy_off(dst: &Handle, src: &Handle, doff: usize, soff: usize, size: usize) {
    iterate_func2(dst, src, doff, soff, size, |d, s| {
        d.copy_from_slice(s);
        0
    });
}

/// Sign-preserving byte compare of two Handles' bytes at the given offsets.
pub fn cmp_off(dst: &Handle, src: &Handle, doff: usize, soff: usize, size: usize) -> i32 {
    let mut result = 0i32;
    iterate_func2(dst, src, doff, soff, size, |d, s| match d.cmp(s) {
        Ordering::Equal => 0,
        Ordering::Less => {
            result = -1;
            1
        }
        Ordering::Greater => {
            result = 1;
            1
        }
    });
    result
}

/// `copy_to_buf_off` at offset 0.
pub fn copy_to_buf(handle: &Handle, dst: &mut [u8], size: usize) {
    copy_to_buf_off(handle, dst, 0, size);
}

/// `copy_from_buf_off` at offset 0.
pub fn copy_from_buf(handle: &Handle, src: &[u8], size: usize) {
    copy_from_buf_off(handle, src, 0, size);
}

/// `cmp_buf_off` at offset 0.
pub fn cmp_buf(handle: &Handle, buf: &[u8], size: usize) -> i32 {
    cmp_buf_off(handle, buf, 0, size)
}

/// `zero_off` at offset 0.
pub fn zero(handle: &Handle, size: usize) {
    zero_off(handle, 0, size);
}

/// `copy_off` at offset 0 on both sides.
pub fn copy(dst: &Handle, src: &Handle, size: usize) {
    copy_off(dst, src, 0, 0, size);
}

/// `cmp_off` at offset 0 on both sides.
pub fn cmp(dst: &Handle, src: &Handle, size: usize) -> i32 {
    cmp_off(dst, src, 0, 0, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{alloc, free};
    use crate::context::AbdContext;

    fn ctx() -> AbdContext {
        AbdContext::system_default(1024, true)
    }

    #[test]
    fn round_trip_buffer_law() {
        let c = ctx();
        let h = alloc(&c, 2500, false).unwrap();
        let b: Vec<u8> = (0..2500).map(|i| (i % 251) as u8).collect();
        copy_from_buf(&h, &b, 2500);
        let mut out = vec![0u8; 2500];
        copy_to_buf(&h, &mut out, 2500);
        assert_eq!(b, out);
        free(&c, h).unwrap();
    }

    #[test]
    fn cmp_buf_matches_contents() {
        let c = ctx();
        let h = alloc(&c, 2500, true).unwrap();
        let b: Vec<u8> = (0..2500).map(|i| (i % 251) as u8).collect();
        copy_from_buf(&h, &b, 2500);
        assert_eq!(cmp_buf(&h, &b, 2500), 0);
        free(&c, h).unwrap();
    }

    #[test]
    fn zero_clears_contents() {
        let c = ctx();
        let h = alloc(&c, 2500, false).unwrap();
        copy_from_buf(&h, &vec![0xFFu8; 2500], 2500);
        zero(&h, 2500);
        let mut out = vec![1u8; 2500];
        copy_to_buf(&h, &mut out, 2500);
        assert!(out.iter().all(|&b| b == 0));
        free(&c, h).unwrap();
    }

    #[test]
    fn copy_between_handles() {
        let c = ctx();
        let a = alloc(&c, 2500, false).unwrap();
        let b = alloc(&c, 2500, false).unwrap();
        let data: Vec<u8> = (0..2500).map(|i| (i % 97) as u8).collect();
        copy_from_buf(&a, &data, 2500);
        copy(&b, &a, 2500);
        assert_eq!(cmp(&a, &b, 2500), 0);
        free(&c, a).unwrap();
        free(&c, b).unwrap();
    }
}

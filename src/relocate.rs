//! Relocator: `try_move`, invoked out-of-band by the external
//! chunk/raw allocator when it wants to defragment a slab.

use crate::context::AbdContext;
use crate::flags::AbdFlags;
use crate::handle::{Handle, Storage};
use crate::pool::BufKind;
use crate::stats::Counter;

/// Attempt to rehome `handle`'s backing storage to freshly allocated
/// chunks/buffer, preserving every byte and refreshing `create_time`.
///
/// Returns `false` — an expected, non-error outcome — if `handle` is
/// pinned (`NOMOVE`) or has live views (`child_refcount > 0`); the caller
/// is expected to skip this slab slot and try later.
pub fn try_move(ctx: &AbdContext, handle: &Handle) -> bool {
    let mut g = handle.lock();

    if g.flags.contains(AbdFlags::NOMOVE) {
        ctx.stats.inc(Counter::move_to_buf_flag_fail);
        log::trace!("try_move: handle pinned (NOMOVE)");
        #[cfg(debug_assertions)]
        {
            let age = g.create_time.elapsed();
            debug_assert!(
                age >= crate::constants::MIN_AGE_BEFORE_MOVE,
                "try_move: NOMOVE set on a Handle only {:?} old; likely a correctness bug, not real pinning",
                age
            );
        }
        return false;
    }

    if handle.child_refcount() > 0 {
        ctx.stats.inc(Counter::move_refcount_nonzero);
        log::trace!("try_move: child_refcount {} > 0", handle.child_refcount());
        return false;
    }

    match &mut g.storage {
        Storage::Scattered { chunk_size, chunks, .. } => {
            let chunk_size = *chunk_size;
            let mut new_chunks = Vec::with_capacity(chunks.len());
            for &old in chunks.iter() {
                let new = match ctx.chunk_pool.alloc_chunk() {
                    Ok(c) => c,
                    Err(_) => {
                        for c in new_chunks {
                            unsafe { ctx.chunk_pool.free_chunk(c) };
                        }
                        return false;
                    }
                };
                unsafe {
                    std::ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), chunk_size);
                }
                new_chunks.push(new);
            }
            let old_chunks = std::mem::replace(chunks, new_chunks);
            for old in old_chunks {
                unsafe { ctx.chunk_pool.free_chunk_to_slab(old) };
            }
            g.create_time = std::time::Instant::now();
            if g.flags.is_metadata() {
                ctx.stats.inc(Counter::moved_scattered_metadata);
            } else {
                ctx.stats.inc(Counter::moved_scattered_filedata);
            }
            log::trace!("try_move: relocated scattered handle");
            true
        }
        Storage::Linear { buf } => {
            let kind = if g.flags.is_metadata() { BufKind::Metadata } else { BufKind::Data };
            let size = g.size;
            let new_buf = match ctx.raw_pool.alloc(size, kind) {
                Ok(b) => b,
                Err(_) => return false,
            };
            unsafe {
                std::ptr::copy_nonoverlapping(buf.as_ptr(), new_buf.as_ptr(), size);
            }
            let old_buf = std::mem::replace(buf, new_buf);
            unsafe { ctx.raw_pool.free(old_buf, size, kind) };
            g.create_time = std::time::Instant::now();
            ctx.stats.inc(Counter::moved_linear);
            log::trace!("try_move: relocated linear handle");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{alloc, alloc_linear, free, get_offset};
    use crate::iter::{cmp_buf, copy_from_buf};

    fn ctx() -> AbdContext {
        AbdContext::system_default(1024, true)
    }

    #[test]
    fn s6_scattered_relocation_preserves_bytes() {
        let c = ctx();
        let h = alloc(&c, 2500, false).unwrap();
        let pattern: Vec<u8> = (0..2500).map(|i| (i % 251) as u8).collect();
        copy_from_buf(&h, &pattern, 2500);

        let old_addrs: Vec<usize> = match &h.lock().storage {
            Storage::Scattered { chunks, .. } => chunks.iter().map(|p| p.as_ptr() as usize).collect(),
            Storage::Linear { .. } => panic!("expected scattered storage"),
        };

        assert!(try_move(&c, &h));
        assert_eq!(c.stats.get(Counter::moved_scattered_filedata), 1);
        assert_eq!(cmp_buf(&h, &pattern, 2500), 0);

        let new_addrs: Vec<usize> = match &h.lock().storage {
            Storage::Scattered { chunks, .. } => chunks.iter().map(|p| p.as_ptr() as usize).collect(),
            Storage::Linear { .. } => panic!("expected scattered storage"),
        };
        assert_ne!(old_addrs, new_addrs, "try_move must hand back fresh chunks");

        free(&c, h).unwrap();
    }

    #[test]
    fn s6_linear_relocation_preserves_bytes() {
        let c = ctx();
        let h = alloc_linear(&c, 128, false).unwrap();
        let pattern = vec![0x5Au8; 128];
        copy_from_buf(&h, &pattern, 128);

        assert!(try_move(&c, &h));
        assert_eq!(c.stats.get(Counter::moved_linear), 1);
        assert_eq!(cmp_buf(&h, &pattern, 128), 0);

        free(&c, h).unwrap();
    }

    #[test]
    fn try_move_rejects_nonzero_child_refcount() {
        // Exercises step 2 of try_move in isolation from step 1: a nonzero
        // weighted refcount must block relocation even for a Handle that
        // was never itself pinned. `get_offset` would also set `NOMOVE` on
        // `h` (the NOMOVE ratchet described below), which is covered separately by
        // `nomove_on_a_fresh_handle_trips_the_debug_tripwire`, so the
        // weight is added directly here instead.
        let c = ctx();
        let h = alloc(&c, 2500, false).unwrap();
        h.add_child_weight(500);

        let before = c.stats.get(Counter::move_refcount_nonzero);
        assert!(!try_move(&c, &h), "a Handle with a nonzero child refcount must not relocate");
        assert_eq!(c.stats.get(Counter::move_refcount_nonzero), before + 1);

        h.sub_child_weight(500);
        free(&c, h).unwrap();
    }

    /// Matches scenario S3: a live view pins its source against relocation.
    /// In a release build `try_move` simply reports `false`; in a debug
    /// build the source is also fresh enough to trip the tripwire above,
    /// so that variant lives in a separate, `should_panic` test.
    #[test]
    #[cfg(not(debug_assertions))]
    fn get_offset_view_blocks_relocation_of_its_source() {
        let c = ctx();
        let h = alloc(&c, 2500, false).unwrap();
        let v = get_offset(&h, 1100);
        assert!(!try_move(&c, &h));
        crate::alloc::put(v);
        free(&c, h).unwrap();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "likely a correctness bug")]
    fn get_offset_view_blocks_relocation_of_its_source() {
        let c = ctx();
        let h = alloc(&c, 2500, false).unwrap();
        let v = get_offset(&h, 1100);
        try_move(&c, &h);
        crate::alloc::put(v);
        free(&c, h).unwrap();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "likely a correctness bug")]
    fn nomove_on_a_fresh_handle_trips_the_debug_tripwire() {
        let c = ctx();
        let h = alloc_linear(&c, 64, false).unwrap();
        h.lock().flags |= AbdFlags::NOMOVE;
        try_move(&c, &h);
    }
}

//! The Handle record and the Storage discriminant.
//!
//! A Handle is `Arc<HandleInner>`: Rust's atomic-refcounted pointer already
//! gives safe shared ownership between a parent and its views, which is the
//! Rust-native substitute for an arena of stable indices plus an atomic
//! count per node — the usual approach in a systems language without a
//! tracing GC. `child_refcount` is tracked separately as a
//! *weighted* (sum-of-descendant-sizes) count — that's a second number
//! layered on top of `Arc`'s own strong count, not a replacement for it.

use crate::flags::AbdFlags;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[cfg(debug_assertions)]
const MAGIC: u64 = 0xAB0D_AB0D_AB0D_AB0D;

/// Which representation a Handle's bytes live in.
pub(crate) enum Storage {
    Linear {
        buf: NonNull<u8>,
    },
    Scattered {
        /// Byte offset into `chunks[0]`. Always `< chunk_size`.
        offset: usize,
        /// Frozen at handle-creation time.
        chunk_size: usize,
        chunks: Vec<NonNull<u8>>,
    },
}

// SAFETY: every `NonNull<u8>` inside `Storage` is exclusively accessed
// through `HandleInner::state`'s mutex; Handle never exposes the raw
// pointer without going through a method that either holds the lock or has
// already established exclusive access (e.g. `free`/`put` on a Handle about
// to be dropped).
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Linear { buf } => f.debug_struct("Linear").field("buf", buf).finish(),
            Storage::Scattered { offset, chunk_size, chunks } => f
                .debug_struct("Scattered")
                .field("offset", offset)
                .field("chunk_size", chunk_size)
                .field("chunk_count", &chunks.len())
                .finish(),
        }
    }
}

/// Every field that must stay internally consistent, guarded by one non-recursive
/// lock.
pub(crate) struct MutableState {
    pub(crate) storage: Storage,
    pub(crate) flags: AbdFlags,
    pub(crate) size: usize,
    pub(crate) parent: Option<Handle>,
    pub(crate) create_time: Instant,
    /// Set by a non-ephemeral `to_buf`. Tracked separately from
    /// `child_refcount` so `put`'s "parent refcount hit zero" clear of
    /// `NOMOVE` never undoes a pin a consumer took
    /// out directly on this Handle — see design note (a) / Open Question.
    pub(crate) pinned_by_to_buf: bool,
    /// Live borrows taken out with `borrow_buf`/`borrow_buf_copy`, keyed by
    /// pointer address, so `return_buf` can verify the pointer it was
    /// handed matches an outstanding borrow and recover its weight.
    borrows: std::collections::HashMap<usize, usize>,
}

impl MutableState {
    pub(crate) fn linear_buf(&self) -> Option<NonNull<u8>> {
        match self.storage {
            Storage::Linear { buf } => Some(buf),
            Storage::Scattered { .. } => None,
        }
    }
}

struct HandleInner {
    state: spin::Mutex<MutableState>,
    /// Weighted refcount: sum of `descendant.size` over every live view.
    child_refcount: AtomicUsize,
    #[cfg(debug_assertions)]
    magic: u64,
}

/// A handle to an ABD Handle record. Cheap to clone (bumps the `Arc` strong
/// count); cloning does **not** create a view — use
/// [`crate::alloc::get_offset`] for that. Equality and the lock-ordering
/// comparison used by `iterate_func2` are both based on the underlying
/// pointer identity.
#[derive(Clone)]
pub struct Handle(pub(crate) Arc<HandleInner>);

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Handle {}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("addr", &self.addr()).finish()
    }
}

impl Handle {
    pub(crate) fn new(storage: Storage, flags: AbdFlags, size: usize) -> Handle {
        let inner = HandleInner {
            state: spin::Mutex::new(MutableState {
                storage,
                flags,
                size,
                parent: None,
                create_time: Instant::now(),
                pinned_by_to_buf: false,
                borrows: std::collections::HashMap::new(),
            }),
            child_refcount: AtomicUsize::new(0),
            #[cfg(debug_assertions)]
            magic: MAGIC,
        };
        let h = Handle(Arc::new(inner));
        h.check_invariants();
        h
    }

    /// Stable identity used for `iterate_func2`'s canonical lock order and
    /// for `Debug`.
    #[inline]
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    #[cfg(debug_assertions)]
    #[inline]
    pub(crate) fn check_magic(&self) {
        assert_eq!(self.0.magic, MAGIC, "Handle magic word corrupted");
    }

    #[cfg(not(debug_assertions))]
    #[inline]
    pub(crate) fn check_magic(&self) {}

    #[inline]
    pub(crate) fn lock(&self) -> spin::MutexGuard<'_, MutableState> {
        self.check_magic();
        self.0.state.lock()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.lock().size
    }

    #[inline]
    pub fn flags(&self) -> AbdFlags {
        self.lock().flags
    }

    #[inline]
    pub fn is_linear(&self) -> bool {
        self.flags().is_linear()
    }

    #[inline]
    pub fn is_metadata(&self) -> bool {
        self.flags().is_metadata()
    }

    #[inline]
    pub fn is_owner(&self) -> bool {
        self.flags().is_owner()
    }

    #[inline]
    pub fn has_parent(&self) -> bool {
        self.lock().parent.is_some()
    }

    #[inline]
    pub fn parent(&self) -> Option<Handle> {
        self.lock().parent.clone()
    }

    #[inline]
    pub fn create_time(&self) -> Instant {
        self.lock().create_time
    }

    /// Weighted refcount (each live descendant contributes
    /// `descendant.size`).
    #[inline]
    pub fn child_refcount(&self) -> usize {
        self.0.child_refcount.load(Ordering::Acquire)
    }

    /// Record a live borrow for later verification by `return_buf`.
    pub(crate) fn register_borrow(&self, ptr: NonNull<u8>, n: usize) {
        self.lock().borrows.insert(ptr.as_ptr() as usize, n);
    }

    /// Remove and return the registered weight for `ptr`, if any.
    pub(crate) fn remove_borrow(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.lock().borrows.remove(&(ptr.as_ptr() as usize))
    }

    pub(crate) fn add_child_weight(&self, weight: usize) {
        self.0.child_refcount.fetch_add(weight, Ordering::AcqRel);
    }

    /// Returns `true` if the refcount reached zero after the subtraction.
    pub(crate) fn sub_child_weight(&self, weight: usize) -> bool {
        let prev = self.0.child_refcount.fetch_sub(weight, Ordering::AcqRel);
        debug_assert!(prev >= weight, "child_refcount underflow");
        prev == weight
    }

    /// Invariants re-checked at every returning public operation. Called
    /// after every mutation that completes a public operation.
    pub(crate) fn check_invariants(&self) {
        self.check_magic();
        let state = self.0.state.lock();
        assert!(state.size > 0 && state.size <= crate::constants::MAX_BLOCK_SIZE, "size out of range: {}", state.size);

        if state.flags.is_owner() {
            assert!(state.parent.is_none(), "OWNER set but parent is Some");
        }
        if state.parent.is_some() {
            assert!(!state.flags.is_owner(), "parent set but OWNER also set");
        }
        if state.flags.is_metadata() {
            assert!(state.flags.is_owner(), "META set without OWNER");
        }
        match &state.storage {
            Storage::Linear { .. } => {
                assert!(state.flags.is_linear(), "Linear storage without LINEAR flag");
            }
            Storage::Scattered { offset, chunk_size, chunks } => {
                assert!(!state.flags.is_linear(), "Scattered storage with LINEAR flag");
                assert!(offset < chunk_size, "scatter offset {} >= chunk_size {}", offset, chunk_size);
                let expected = (offset + state.size + chunk_size - 1) / chunk_size;
                assert_eq!(chunks.len(), expected, "chunk sequence length mismatch");
                if state.flags.is_small() {
                    assert!(state.size < *chunk_size, "SMALL set but size >= chunk_size");
                }
            }
        }

        #[cfg(feature = "extreme_assertions")]
        {
            let borrowed: usize = state.borrows.values().sum();
            assert!(borrowed <= self.child_refcount(), "registered borrows exceed weighted child refcount");
        }
    }
}

impl MutableState {
    #[inline]
    pub(crate) fn is_linear(&self) -> bool {
        matches!(self.storage, Storage::Linear { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::AbdFlags;

    fn linear_handle(size: usize) -> Handle {
        let layout = std::alloc::Layout::from_size_align(size, 1).unwrap();
        let buf = NonNull::new(unsafe { std::alloc::alloc(layout) }).unwrap();
        Handle::new(Storage::Linear { buf }, AbdFlags::LINEAR | AbdFlags::OWNER, size)
    }

    #[test]
    fn new_handle_satisfies_invariants() {
        let h = linear_handle(64);
        h.check_invariants();
        assert_eq!(h.size(), 64);
        assert!(h.is_linear());
        assert!(h.is_owner());
    }

    #[test]
    fn clone_shares_identity() {
        let h = linear_handle(32);
        let h2 = h.clone();
        assert_eq!(h, h2);
        assert_eq!(h.addr(), h2.addr());
    }

    #[test]
    fn child_refcount_add_sub() {
        let h = linear_handle(32);
        h.add_child_weight(10);
        assert_eq!(h.child_refcount(), 10);
        assert!(!h.sub_child_weight(4));
        assert_eq!(h.child_refcount(), 6);
        assert!(h.sub_child_weight(6));
        assert_eq!(h.child_refcount(), 0);
    }

    #[test]
    #[should_panic(expected = "size out of range")]
    fn zero_size_rejected() {
        // Constructed directly to exercise the assertion without going
        // through the Allocator's own size check.
        let layout = std::alloc::Layout::from_size_align(8, 1).unwrap();
        let buf = NonNull::new(unsafe { std::alloc::alloc(layout) }).unwrap();
        let h = Handle::new(Storage::Linear { buf }, AbdFlags::LINEAR | AbdFlags::OWNER, 8);
        h.lock().size = 0;
        h.check_invariants();
    }
}

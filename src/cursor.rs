//! Internal cursor used by the iterator engine. Not
//! part of the public surface — `iterate_func`/`iterate_func2` are.

use crate::handle::{MutableState, Storage};
use std::ptr::NonNull;

/// `{pos, map_addr, map_size}` bookkeeping needed
/// to tell "mapped" from "unmapped" without a sentinel pointer value.
pub(crate) struct Cursor {
    pos: usize,
    mapped: Option<(NonNull<u8>, usize)>,
}

impl Cursor {
    pub(crate) fn init(pos: usize) -> Self {
        Cursor { pos, mapped: None }
    }

    #[inline]
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    /// Requires the cursor to be unmapped.
    pub(crate) fn advance(&mut self, n: usize) {
        assert!(self.mapped.is_none(), "advance on a mapped cursor");
        self.pos += n;
    }

    #[inline]
    pub(crate) fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// No-op at EOF; otherwise sets the mapped region to the current
    /// physically contiguous run of bytes starting at `pos`.
    pub(crate) fn map(&mut self, state: &MutableState) {
        if self.mapped.is_some() || self.pos >= state.size {
            return;
        }
        let (addr, size) = match &state.storage {
            Storage::Linear { buf } => {
                let addr = unsafe { NonNull::new_unchecked(buf.as_ptr().add(self.pos)) };
                (addr, state.size - self.pos)
            }
            Storage::Scattered { offset, chunk_size, chunks } => {
                let abs = offset + self.pos;
                let chunk_idx = abs / chunk_size;
                let in_chunk = abs % chunk_size;
                let chunk_ptr = chunks[chunk_idx];
                let addr = unsafe { NonNull::new_unchecked(chunk_ptr.as_ptr().add(in_chunk)) };
                let remaining_in_chunk = chunk_size - in_chunk;
                let remaining_total = state.size - self.pos;
                (addr, remaining_in_chunk.min(remaining_total))
            }
        };
        self.mapped = Some((addr, size));
    }

    pub(crate) fn unmap(&mut self) {
        self.mapped = None;
    }

    pub(crate) fn map_addr(&self) -> Option<NonNull<u8>> {
        self.mapped.map(|(a, _)| a)
    }

    pub(crate) fn map_size(&self) -> usize {
        self.mapped.map(|(_, s)| s).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::AbdFlags;
    use crate::handle::Handle;

    fn scattered_state(chunk_size: usize, offset: usize, size: usize, n_chunks: usize) -> Handle {
        let mut chunks = Vec::with_capacity(n_chunks);
        for _ in 0..n_chunks {
            let layout = std::alloc::Layout::from_size_align(chunk_size, 1).unwrap();
            chunks.push(NonNull::new(unsafe { std::alloc::alloc(layout) }).unwrap());
        }
        Handle::new(
            Storage::Scattered { offset, chunk_size, chunks },
            AbdFlags::OWNER,
            size,
        )
    }

    #[test]
    fn map_crosses_chunk_boundary_at_chunk_size() {
        let h = scattered_state(1024, 76, 1400, 2);
        let guard = h.lock();
        let mut cur = Cursor::init(0);
        cur.map(&guard);
        assert_eq!(cur.map_size(), 1024 - 76);
        cur.unmap();
        cur.advance(1024 - 76);
        cur.map(&guard);
        assert_eq!(cur.map_size(), 1400 - (1024 - 76));
    }

    #[test]
    fn map_is_noop_at_eof() {
        let h = scattered_state(1024, 0, 10, 1);
        let guard = h.lock();
        let mut cur = Cursor::init(10);
        cur.map(&guard);
        assert!(!cur.is_mapped());
    }
}

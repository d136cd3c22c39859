//! Handle flag bits: independent bits carried by every Handle.

use bitflags::bitflags;

bitflags! {
    /// Independent bits carried by every Handle. See the type invariants
    /// documented on `Handle::check_invariants` for how these interact with
    /// `parent`/`child_refcount`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AbdFlags: u8 {
        /// Storage is a single contiguous buffer rather than scattered chunks.
        const LINEAR  = 0b0000_0001;
        /// This Handle owns its backing storage and must release it on `free`.
        const OWNER   = 0b0000_0010;
        /// Backing storage holds filesystem metadata rather than file data.
        /// Meaningless (and never set) on a view.
        const META    = 0b0000_0100;
        /// Scattered storage whose size is smaller than one chunk.
        const SMALL   = 0b0000_1000;
        /// Pinned against `try_move`. Monotonic until cleared by `put`.
        const NOMOVE  = 0b0001_0000;
    }
}

impl AbdFlags {
    /// `OWNER` set implies no parent, and vice versa; enforced by callers,
    /// not by the bitset itself.
    pub fn is_owner(self) -> bool {
        self.contains(AbdFlags::OWNER)
    }

    /// `META` implies `OWNER`.
    pub fn is_metadata(self) -> bool {
        self.contains(AbdFlags::META)
    }

    /// Linear/scattered discriminant bit.
    pub fn is_linear(self) -> bool {
        self.contains(AbdFlags::LINEAR)
    }

    pub fn is_small(self) -> bool {
        self.contains(AbdFlags::SMALL)
    }

    pub fn is_nomove(self) -> bool {
        self.contains(AbdFlags::NOMOVE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_compose() {
        let f = AbdFlags::OWNER | AbdFlags::META;
        assert!(f.is_owner());
        assert!(f.is_metadata());
        assert!(!f.is_linear());
    }

    #[test]
    fn default_is_empty() {
        assert_eq!(AbdFlags::default(), AbdFlags::empty());
    }
}

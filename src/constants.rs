//! Compile-time and boot-time constants shared across the crate.

/// Upper bound on any single Handle's `size`. Mirrors the storage engine's
/// block-size ceiling; ABD itself does not interpret this value beyond
/// rejecting anything larger.
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// Default chunk size handed out by [`crate::pool::SystemChunkPool`] when a
/// caller doesn't pick one explicitly. Power-of-two, frozen once an
/// [`crate::context::AbdContext`] is constructed.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Lower bound, in wall-clock age, before a debug build will allow
/// [`crate::relocate::try_move`] to fire the `NOMOVE` tripwire assertion.
/// Omitted entirely from release builds; see design note (b).
#[cfg(debug_assertions)]
pub const MIN_AGE_BEFORE_MOVE: std::time::Duration = std::time::Duration::from_secs(5 * 60);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_is_power_of_two() {
        assert!(DEFAULT_CHUNK_SIZE.is_power_of_two());
    }

    #[test]
    fn max_block_size_exceeds_default_chunk() {
        assert!(MAX_BLOCK_SIZE > DEFAULT_CHUNK_SIZE);
    }
}

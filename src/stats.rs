//! Stats registry adapter.
//!
//! The real telemetry registry lives outside ABD's scope; this module is
//! a thin adapter: a named-counter table plus atomic
//! increment/decrement, collected into one registry instead of being
//! scattered across a handful of ad hoc fields. Counters are padded with
//! `crossbeam::utils::CachePadded` so that bumping one under contention
//! doesn't thrash a cache line shared with its neighbors.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicI64, Ordering};
use strum_macros::{Display, EnumIter};

/// One named counter in the exposed-counter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[allow(non_camel_case_types)]
pub enum Counter {
    struct_size,
    scatter_cnt,
    scatter_data_size,
    scatter_chunk_waste,
    linear_cnt,
    linear_data_size,
    linear_metadata_cnt,
    linear_filedata_cnt,
    scattered_metadata_cnt,
    scattered_filedata_cnt,
    small_scatter_cnt,
    borrowed_bufs,
    move_refcount_nonzero,
    moved_linear,
    moved_scattered_filedata,
    moved_scattered_metadata,
    move_to_buf_flag_fail,
}

const COUNTER_COUNT: usize = 17;

/// Registry of all exposed counters. Relaxed atomics throughout: per design
/// note "Stat atomics", individual counters are monotonic where declared so,
/// but cross-counter consistency under concurrency is not promised — only
/// convergence at quiescence.
pub struct Stats {
    counters: [CachePadded<AtomicI64>; COUNTER_COUNT],
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Stats {
            counters: std::array::from_fn(|_| CachePadded::new(AtomicI64::new(0))),
        }
    }

    #[inline]
    fn slot(&self, c: Counter) -> &AtomicI64 {
        &self.counters[c as usize]
    }

    /// Bump a counter by a signed delta (waste counters can go negative
    /// a negative value).
    pub fn add(&self, c: Counter, delta: i64) {
        self.slot(c).fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc(&self, c: Counter) {
        self.add(c, 1);
    }

    pub fn dec(&self, c: Counter) {
        self.add(c, -1);
    }

    pub fn get(&self, c: Counter) -> i64 {
        self.slot(c).load(Ordering::Relaxed)
    }

    /// Snapshot every counter, e.g. for a quiescence assertion in tests.
    pub fn snapshot(&self) -> Vec<(Counter, i64)> {
        use strum::IntoEnumIterator;
        Counter::iter().map(|c| (c, self.get(c))).collect()
    }
}

impl Stats {
    /// `struct_size` is set once at boot and never changes afterwards.
    pub fn set_struct_size(&self, bytes: usize) {
        self.slot(Counter::struct_size).store(bytes as i64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn fresh_registry_is_zero() {
        let stats = Stats::new();
        for c in Counter::iter() {
            assert_eq!(stats.get(c), 0);
        }
    }

    #[test]
    fn add_and_negative_waste() {
        let stats = Stats::new();
        stats.add(Counter::scatter_chunk_waste, -324);
        assert_eq!(stats.get(Counter::scatter_chunk_waste), -324);
    }

    #[test]
    fn inc_dec_round_trip() {
        let stats = Stats::new();
        stats.inc(Counter::scatter_cnt);
        stats.inc(Counter::scatter_cnt);
        stats.dec(Counter::scatter_cnt);
        assert_eq!(stats.get(Counter::scatter_cnt), 1);
    }
}

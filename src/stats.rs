//! Lock-free counters. Every hot-path failure mode bumps an atomic counter
//! instead of propagating an error.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct MixerStats {
    pub packets_received: AtomicU64,
    pub malformed_dropped: AtomicU64,
    pub queue_dropped: AtomicU64,
    pub overruns: AtomicU64,
    pub deadline_missed: AtomicU64,
    pub nodes_evicted: AtomicU64,
    pub pings_received: AtomicU64,
}

impl MixerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

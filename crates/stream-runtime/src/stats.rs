//! Delivery counters for the three branch sinks, reported at shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared run statistics, incremented by sink stages.
#[derive(Debug, Default)]
pub struct RunStats {
    pub frames_displayed: AtomicU64,
    pub datagrams_sent: AtomicU64,
    pub records_stored: AtomicU64,
    pub bytes_stored: AtomicU64,
}

impl RunStats {
    pub fn frames_displayed(&self) -> u64 {
        self.frames_displayed.load(Ordering::Relaxed)
    }

    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams_sent.load(Ordering::Relaxed)
    }

    pub fn records_stored(&self) -> u64 {
        self.records_stored.load(Ordering::Relaxed)
    }

    pub fn bytes_stored(&self) -> u64 {
        self.bytes_stored.load(Ordering::Relaxed)
    }
}

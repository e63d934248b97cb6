//! Leak tracking for OS reservations
//!
//! Every reservation made through [`crate::vm::reserve`] is recorded here
//! and removed again on release. Records flagged leak-permitted are allowed
//! to survive context teardown; everything else still live at that point is
//! reported as a leak.

use dashmap::DashMap;
use tracing::warn;

/// One outstanding reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRecord {
    pub address: usize,
    pub size: usize,
    pub leak_permitted: bool,
}

/// Concurrent address -> record table.
pub struct LeakTracker {
    records: DashMap<usize, AllocRecord>,
}

impl LeakTracker {
    pub fn new() -> Self {
        Self {
            records: DashMap::with_capacity(64),
        }
    }

    /// Record a reservation.
    pub fn track_alloc(&self, address: usize, size: usize, leak_permitted: bool) {
        let record = AllocRecord {
            address,
            size,
            leak_permitted,
        };
        if let Some(stale) = self.records.insert(address, record) {
            // An untracked release followed by an OS reuse of the same address.
            warn!(
                target: "vmarena::tracker",
                address = format_args!("{:#x}", address),
                stale_size = stale.size,
                "address tracked twice without release"
            );
        }
    }

    /// Forget a reservation. Unknown addresses are ignored.
    pub fn track_dealloc(&self, address: usize) {
        self.records.remove(&address);
    }

    pub fn is_tracked(&self, address: usize) -> bool {
        self.records.contains_key(&address)
    }

    pub fn outstanding(&self) -> usize {
        self.records.len()
    }

    /// Total bytes of live reservations.
    pub fn outstanding_bytes(&self) -> usize {
        self.records.iter().map(|entry| entry.value().size).sum()
    }

    /// Snapshot of every live record, sorted by address.
    pub fn report(&self) -> LeakReport {
        let mut records: Vec<AllocRecord> =
            self.records.iter().map(|entry| *entry.value()).collect();
        records.sort_by_key(|record| record.address);
        LeakReport { records }
    }
}

impl Default for LeakTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Outstanding reservations at the time of [`LeakTracker::report`].
#[derive(Debug, Clone, Default)]
pub struct LeakReport {
    records: Vec<AllocRecord>,
}

impl LeakReport {
    pub fn records(&self) -> &[AllocRecord] {
        &self.records
    }

    /// Records that were not allowed to outlive teardown.
    pub fn leaks(&self) -> impl Iterator<Item = &AllocRecord> {
        self.records.iter().filter(|record| !record.leak_permitted)
    }

    pub fn leaked_bytes(&self) -> usize {
        self.leaks().map(|record| record.size).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.leaks().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_dealloc_is_clean() {
        let tracker = LeakTracker::new();
        tracker.track_alloc(0x1000, 4096, false);
        assert!(tracker.is_tracked(0x1000));
        assert_eq!(tracker.outstanding_bytes(), 4096);

        tracker.track_dealloc(0x1000);
        assert!(tracker.report().is_clean());
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn leak_permitted_records_are_not_leaks() {
        let tracker = LeakTracker::new();
        tracker.track_alloc(0x2000, 8192, true);
        tracker.track_alloc(0x1000, 4096, false);

        let report = tracker.report();
        assert_eq!(report.records().len(), 2);
        assert_eq!(report.records()[0].address, 0x1000);
        assert_eq!(report.leaks().count(), 1);
        assert_eq!(report.leaked_bytes(), 4096);
    }

    #[test]
    fn unknown_dealloc_is_ignored() {
        let tracker = LeakTracker::new();
        tracker.track_dealloc(0xdead_0000);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn retracking_overwrites() {
        let tracker = LeakTracker::new();
        tracker.track_alloc(0x1000, 4096, false);
        tracker.track_alloc(0x1000, 8192, true);
        assert_eq!(tracker.outstanding(), 1);
        assert!(tracker.report().is_clean());
    }
}

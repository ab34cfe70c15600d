//! Gap detection counters
//!
//! - Counters only, monotonic
//! - Reset only on process start
//! - Relaxed atomics; exactness across threads is not required

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for detection passes and gap edits.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    passes_completed: AtomicU64,
    passes_failed: AtomicU64,
    full_analyses: AtomicU64,
    ids_observed: AtomicU64,
    gaps_added: AtomicU64,
    gaps_deleted: AtomicU64,
    gaps_expired: AtomicU64,
    gaps_rejected: AtomicU64,
    overlaps_repaired: AtomicU64,
    bulk_saves: AtomicU64,
    fine_grained_saves: AtomicU64,
    rows_routed: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_passes_completed(&self) {
        self.passes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_passes_failed(&self) {
        self.passes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_full_analyses(&self) {
        self.full_analyses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_ids_observed(&self, count: u64) {
        self.ids_observed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_gaps_added(&self, count: u64) {
        self.gaps_added.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_gaps_deleted(&self, count: u64) {
        self.gaps_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_gaps_expired(&self) {
        self.gaps_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_gaps_rejected(&self) {
        self.gaps_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_overlaps_repaired(&self, count: u64) {
        self.overlaps_repaired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_bulk_saves(&self) {
        self.bulk_saves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fine_grained_saves(&self) {
        self.fine_grained_saves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rows_routed(&self, count: u64) {
        self.rows_routed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            passes_failed: self.passes_failed.load(Ordering::Relaxed),
            full_analyses: self.full_analyses.load(Ordering::Relaxed),
            ids_observed: self.ids_observed.load(Ordering::Relaxed),
            gaps_added: self.gaps_added.load(Ordering::Relaxed),
            gaps_deleted: self.gaps_deleted.load(Ordering::Relaxed),
            gaps_expired: self.gaps_expired.load(Ordering::Relaxed),
            gaps_rejected: self.gaps_rejected.load(Ordering::Relaxed),
            overlaps_repaired: self.overlaps_repaired.load(Ordering::Relaxed),
            bulk_saves: self.bulk_saves.load(Ordering::Relaxed),
            fine_grained_saves: self.fine_grained_saves.load(Ordering::Relaxed),
            rows_routed: self.rows_routed.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> String {
        // Plain integers only; serialization cannot fail
        serde_json::to_string(&self.snapshot()).unwrap_or_default()
    }
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub passes_completed: u64,
    pub passes_failed: u64,
    pub full_analyses: u64,
    pub ids_observed: u64,
    pub gaps_added: u64,
    pub gaps_deleted: u64,
    pub gaps_expired: u64,
    pub gaps_rejected: u64,
    pub overlaps_repaired: u64,
    pub bulk_saves: u64,
    pub fine_grained_saves: u64,
    pub rows_routed: u64,
}

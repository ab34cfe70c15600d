//! In-memory implementations of the store ports
//!
//! `MemorySequenceSource` keeps change rows, routed ids and the gap table
//! behind one mutex. Gap edits are staged in the transaction and applied
//! atomically on commit. One-shot fault injection lets callers exercise
//! rollback paths.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::traits::{CapabilityProbe, ChangeLog, ContextStore, GapTransaction, SequenceSource};
use crate::routing::{DataGap, GapError, GapResult};

/// Operation that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Next `begin` fails
    Begin,
    /// Next `insert_gap` fails
    Insert,
    /// Next `delete_gap` or `delete_all_gaps` fails
    Delete,
    /// Next `commit` fails
    Commit,
    /// Next `rollback` fails; staged edits are still discarded
    Rollback,
    /// Next `find_gaps` fails
    FindGaps,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeSet<i64>,
    route_counts: BTreeMap<i64, u32>,
    gaps: BTreeSet<DataGap>,
}

/// Transactional in-memory change log and gap table.
#[derive(Debug, Default)]
pub struct MemorySequenceSource {
    state: Mutex<MemoryState>,
    faults: Mutex<Vec<Fault>>,
    count_queries: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl MemorySequenceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source from previously persisted parts.
    pub fn from_parts(rows: &[i64], routed: &[i64], gaps: &[DataGap]) -> Self {
        let source = Self::new();
        {
            let mut state = source.lock_state();
            state.rows.extend(rows.iter().copied());
            for id in routed {
                state.route_counts.insert(*id, 1);
            }
            state.gaps.extend(gaps.iter().cloned());
        }
        source
    }

    fn lock_state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_fault(&self, fault: Fault) -> bool {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        match faults.iter().position(|f| *f == fault) {
            Some(index) => {
                faults.remove(index);
                true
            }
            None => false,
        }
    }

    /// Arm a one-shot failure.
    pub fn inject_fault(&self, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(fault);
    }

    /// Commit a change row.
    pub fn insert_row(&self, id: i64) {
        self.lock_state().rows.insert(id);
    }

    pub fn insert_rows(&self, ids: impl IntoIterator<Item = i64>) {
        self.lock_state().rows.extend(ids);
    }

    /// Write gap rows directly, outside any transaction.
    pub fn seed_gaps(&self, gaps: impl IntoIterator<Item = DataGap>) {
        self.lock_state().gaps.extend(gaps);
    }

    /// The gap table as currently committed, ascending.
    pub fn persisted_gaps(&self) -> Vec<DataGap> {
        self.lock_state().gaps.iter().cloned().collect()
    }

    pub fn rows(&self) -> Vec<i64> {
        self.lock_state().rows.iter().copied().collect()
    }

    pub fn routed_ids(&self) -> Vec<i64> {
        self.lock_state().route_counts.keys().copied().collect()
    }

    /// How many times each id has been routed.
    pub fn route_counts(&self) -> BTreeMap<i64, u32> {
        self.lock_state().route_counts.clone()
    }

    /// Number of authoritative row counts performed.
    pub fn count_queries(&self) -> u64 {
        self.count_queries.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }
}

impl SequenceSource for MemorySequenceSource {
    fn find_gaps(&self) -> GapResult<Vec<DataGap>> {
        if self.take_fault(Fault::FindGaps) {
            return Err(GapError::source("injected find_gaps failure"));
        }
        Ok(self.persisted_gaps())
    }

    fn find_ids_in_range(&self, start: i64, end: i64) -> GapResult<Vec<i64>> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .lock_state()
            .route_counts
            .range(start..=end)
            .map(|(id, _)| *id)
            .collect())
    }

    fn count_rows_in_range(&self, start: i64, end: i64) -> GapResult<i64> {
        self.count_queries.fetch_add(1, Ordering::Relaxed);
        if start > end {
            return Ok(0);
        }
        Ok(self.lock_state().rows.range(start..=end).count() as i64)
    }

    fn max_data_id(&self) -> GapResult<Option<i64>> {
        Ok(self.lock_state().rows.iter().next_back().copied())
    }

    fn begin(&self) -> GapResult<Box<dyn GapTransaction + '_>> {
        if self.take_fault(Fault::Begin) {
            return Err(GapError::source("injected begin failure"));
        }
        Ok(Box::new(MemoryGapTransaction {
            source: self,
            ops: Vec::new(),
        }))
    }
}

impl ChangeLog for MemorySequenceSource {
    fn read_changes(&self, start: i64, end: i64, limit: usize) -> GapResult<Vec<i64>> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .lock_state()
            .rows
            .range(start..=end)
            .take(limit)
            .copied()
            .collect())
    }

    fn mark_routed(&self, ids: &[i64]) -> GapResult<()> {
        let mut state = self.lock_state();
        for id in ids {
            *state.route_counts.entry(*id).or_insert(0) += 1;
        }
        Ok(())
    }
}

#[derive(Debug)]
enum GapOp {
    Insert(DataGap),
    Delete(DataGap),
    DeleteAll,
}

/// Staged gap table edits against a [`MemorySequenceSource`].
pub struct MemoryGapTransaction<'a> {
    source: &'a MemorySequenceSource,
    ops: Vec<GapOp>,
}

impl GapTransaction for MemoryGapTransaction<'_> {
    fn insert_gap(&mut self, gap: &DataGap) -> GapResult<()> {
        if self.source.take_fault(Fault::Insert) {
            return Err(GapError::source(format!("injected insert failure for {}", gap)));
        }
        self.ops.push(GapOp::Insert(gap.clone()));
        Ok(())
    }

    fn delete_gap(&mut self, gap: &DataGap) -> GapResult<()> {
        if self.source.take_fault(Fault::Delete) {
            return Err(GapError::source(format!("injected delete failure for {}", gap)));
        }
        self.ops.push(GapOp::Delete(gap.clone()));
        Ok(())
    }

    fn delete_all_gaps(&mut self) -> GapResult<()> {
        if self.source.take_fault(Fault::Delete) {
            return Err(GapError::source("injected delete-all failure"));
        }
        self.ops.push(GapOp::DeleteAll);
        Ok(())
    }

    fn commit(self: Box<Self>) -> GapResult<()> {
        if self.source.take_fault(Fault::Commit) {
            return Err(GapError::source("injected commit failure"));
        }
        let MemoryGapTransaction { source, ops } = *self;
        let mut state = source.lock_state();
        for op in ops {
            match op {
                GapOp::Insert(gap) => {
                    state.gaps.replace(gap);
                }
                GapOp::Delete(gap) => {
                    state.gaps.remove(&gap);
                }
                GapOp::DeleteAll => state.gaps.clear(),
            }
        }
        source.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> GapResult<()> {
        self.source.rollbacks.fetch_add(1, Ordering::Relaxed);
        if self.source.take_fault(Fault::Rollback) {
            return Err(GapError::source("injected rollback failure"));
        }
        Ok(())
    }
}

/// Process-local context store.
#[derive(Debug, Default)]
pub struct MemoryContextStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextStore for MemoryContextStore {
    fn get_string(&self, key: &str) -> GapResult<Option<String>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn save(&self, key: &str, value: &str) -> GapResult<()> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Capability probe with fixed answers.
#[derive(Debug)]
pub struct StaticProbe {
    transaction_views: bool,
    earliest_open: Mutex<Option<DateTime<Utc>>>,
    store_time: Mutex<Option<DateTime<Utc>>>,
}

impl StaticProbe {
    /// A store that cannot report open transactions.
    pub fn without_transaction_views() -> Self {
        Self {
            transaction_views: false,
            earliest_open: Mutex::new(None),
            store_time: Mutex::new(None),
        }
    }

    /// A store that reports open transactions; none are open initially.
    pub fn with_transaction_views() -> Self {
        Self {
            transaction_views: true,
            ..Self::without_transaction_views()
        }
    }

    pub fn set_earliest_open_transaction(&self, start: Option<DateTime<Utc>>) {
        *self.earliest_open.lock().unwrap_or_else(|e| e.into_inner()) = start;
    }

    /// Pin the store clock; `None` follows the system clock.
    pub fn set_store_time(&self, time: Option<DateTime<Utc>>) {
        *self.store_time.lock().unwrap_or_else(|e| e.into_inner()) = time;
    }
}

impl CapabilityProbe for StaticProbe {
    fn supports_transaction_views(&self) -> bool {
        self.transaction_views
    }

    fn earliest_open_transaction_start(&self) -> GapResult<Option<DateTime<Utc>>> {
        Ok(*self.earliest_open.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn current_store_time(&self) -> GapResult<DateTime<Utc>> {
        let pinned = *self.store_time.lock().unwrap_or_else(|e| e.into_inner());
        Ok(pinned.unwrap_or_else(Utc::now))
    }
}

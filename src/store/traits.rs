//! Ports the gap detector talks to
//!
//! All calls are synchronous and may block on store latency or locks. No
//! timeout is enforced here; the store's own statement timeout applies.

use chrono::{DateTime, Utc};

use crate::routing::{DataGap, GapResult};

/// The persisted change log and gap table.
pub trait SequenceSource: Send + Sync {
    /// All persisted gaps, ordered by `(start_id, end_id)`.
    fn find_gaps(&self) -> GapResult<Vec<DataGap>>;

    /// Ids inside `[start, end]` that have already been routed, ascending.
    fn find_ids_in_range(&self, start: i64, end: i64) -> GapResult<Vec<i64>>;

    /// Authoritative count of change rows inside `[start, end]`.
    fn count_rows_in_range(&self, start: i64, end: i64) -> GapResult<i64>;

    /// Highest change row id, if any rows exist.
    fn max_data_id(&self) -> GapResult<Option<i64>>;

    /// Open a transaction for gap table edits.
    fn begin(&self) -> GapResult<Box<dyn GapTransaction + '_>>;
}

/// A transaction over the gap table.
///
/// Dropping an unfinished transaction discards its edits.
pub trait GapTransaction {
    fn insert_gap(&mut self, gap: &DataGap) -> GapResult<()>;

    fn delete_gap(&mut self, gap: &DataGap) -> GapResult<()>;

    fn delete_all_gaps(&mut self) -> GapResult<()>;

    fn commit(self: Box<Self>) -> GapResult<()>;

    fn rollback(self: Box<Self>) -> GapResult<()>;
}

/// Change rows as the router sees them.
pub trait ChangeLog: Send + Sync {
    /// Up to `limit` change row ids inside `[start, end]`, ascending.
    fn read_changes(&self, start: i64, end: i64, limit: usize) -> GapResult<Vec<i64>>;

    /// Record that `ids` were routed.
    fn mark_routed(&self, ids: &[i64]) -> GapResult<()>;
}

/// Durable key/value store shared by cooperating processes.
pub trait ContextStore: Send + Sync {
    fn get_string(&self, key: &str) -> GapResult<Option<String>>;

    fn save(&self, key: &str, value: &str) -> GapResult<()>;

    fn get_bool(&self, key: &str) -> GapResult<Option<bool>> {
        match self.get_string(key)? {
            Some(value) => value
                .trim()
                .parse::<bool>()
                .map(Some)
                .map_err(|_| {
                    crate::routing::GapError::context(format!(
                        "context key {} is not a boolean: {}",
                        key, value
                    ))
                }),
            None => Ok(None),
        }
    }

    fn get_long(&self, key: &str) -> GapResult<Option<i64>> {
        match self.get_string(key)? {
            Some(value) => value
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| {
                    crate::routing::GapError::context(format!(
                        "context key {} is not an integer: {}",
                        key, value
                    ))
                }),
            None => Ok(None),
        }
    }
}

/// Store capabilities relevant to gap expiry.
pub trait CapabilityProbe: Send + Sync {
    /// Whether the store exposes open transaction start times.
    fn supports_transaction_views(&self) -> bool;

    /// Start time of the oldest open transaction, `None` when nothing is open.
    fn earliest_open_transaction_start(&self) -> GapResult<Option<DateTime<Utc>>>;

    /// The store's current time.
    fn current_store_time(&self) -> GapResult<DateTime<Utc>>;
}

/// Local wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

//! Gap persistence strategy
//!
//! A pass's edits are written in one of two ways:
//! - fine-grained: delete exactly the resolved gaps, insert exactly the new ones
//! - bulk: replace the whole table with one gap spanning the registry
//!
//! Bulk mode is entered when a pass produces more edits than
//! `max_gap_changes` and is left only when a later pass is back under the
//! threshold. Leaving rewrites the table from the in-memory registry, since
//! the table only holds the spanning row. With cluster locking every save is
//! fine-grained and leaves the table in fine-grained mode, because other
//! processes reload the table each pass.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{GapError, GapResult};
use super::gap::DataGap;
use crate::observability::{log_event_with_fields, Event, Logger, Timer};
use crate::store::{GapTransaction, SequenceSource};

const PROGRESS_INTERVAL_MS: u64 = 30_000;

/// Which representation the gap table currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    /// Table mirrors the registry row for row
    #[default]
    FineGrained,
    /// Table holds one spanning row; the registry lives in memory
    Bulk,
}

/// What a save did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStrategy {
    /// No edits; nothing written
    Skipped,
    /// Deleted resolved rows, inserted new rows
    FineGrained,
    /// Replaced the table with one spanning row
    Bulk,
    /// Left bulk mode: replaced the table with the full registry
    RewriteAll,
}

/// Edits produced by one reconciliation.
#[derive(Debug, Clone, Copy)]
pub struct GapEdits<'a> {
    /// Registry after the edits
    pub all: &'a BTreeSet<DataGap>,
    pub added: &'a BTreeSet<DataGap>,
    pub deleted: &'a BTreeSet<DataGap>,
}

impl GapEdits<'_> {
    pub fn total(&self) -> usize {
        self.added.len() + self.deleted.len()
    }
}

/// Result of [`save_gaps`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub strategy: SaveStrategy,
    /// Mode after the save
    pub mode: PersistMode,
    pub rows_deleted: usize,
    pub rows_inserted: usize,
}

/// Decide how to write `total_changes` edits.
///
/// Returns the strategy and the mode the table will be in afterwards.
pub fn choose_strategy(
    total_changes: usize,
    max_gap_changes: usize,
    cluster_locking: bool,
    mode: PersistMode,
) -> (SaveStrategy, PersistMode) {
    if total_changes == 0 {
        return (SaveStrategy::Skipped, mode);
    }
    if cluster_locking {
        return (SaveStrategy::FineGrained, PersistMode::FineGrained);
    }
    let over_threshold = total_changes > max_gap_changes;
    match (mode, over_threshold) {
        (PersistMode::Bulk, false) => (SaveStrategy::RewriteAll, PersistMode::FineGrained),
        (PersistMode::Bulk, true) | (PersistMode::FineGrained, true) => {
            (SaveStrategy::Bulk, PersistMode::Bulk)
        }
        (PersistMode::FineGrained, false) => (SaveStrategy::FineGrained, PersistMode::FineGrained),
    }
}

/// Roll back `tx` after `cause` aborted it.
///
/// A failed rollback is logged; the caller still returns `cause`.
pub(crate) fn rollback_after(tx: Box<dyn GapTransaction + '_>, cause: &GapError) {
    if let Err(e) = tx.rollback() {
        Logger::warn(
            Event::GapRollbackFailed.as_str(),
            &[
                ("cause", cause.to_string().as_str()),
                ("error", e.to_string().as_str()),
            ],
        );
    }
}

/// Write a pass's edits in one transaction.
///
/// On failure the transaction is rolled back and nothing is committed.
pub fn save_gaps(
    source: &dyn SequenceSource,
    edits: GapEdits<'_>,
    mode: PersistMode,
    max_gap_changes: usize,
    cluster_locking: bool,
    now: DateTime<Utc>,
) -> GapResult<SaveOutcome> {
    let total = edits.total();
    let (strategy, next_mode) = choose_strategy(total, max_gap_changes, cluster_locking, mode);

    if strategy == SaveStrategy::Skipped {
        return Ok(SaveOutcome {
            strategy,
            mode,
            rows_deleted: 0,
            rows_inserted: 0,
        });
    }

    match (mode, next_mode) {
        (PersistMode::FineGrained, PersistMode::Bulk) => {
            let (count, max) = (total.to_string(), max_gap_changes.to_string());
            log_event_with_fields(
                Event::GapPersistBulk,
                &[("changes", count.as_str()), ("max_gap_changes", max.as_str())],
            );
        }
        (PersistMode::Bulk, PersistMode::FineGrained) => {
            let (count, max) = (total.to_string(), max_gap_changes.to_string());
            log_event_with_fields(
                Event::GapPersistFineGrained,
                &[("changes", count.as_str()), ("max_gap_changes", max.as_str())],
            );
        }
        _ => {}
    }

    let mut tx = source
        .begin()
        .map_err(|e| GapError::persistence(format!("begin failed: {}", e)))?;

    let written = write_edits(tx.as_mut(), strategy, edits, now);
    let (rows_deleted, rows_inserted) = match written {
        Ok(counts) => counts,
        Err(e) => {
            let cause = GapError::persistence(e.to_string());
            rollback_after(tx, &cause);
            return Err(cause);
        }
    };

    tx.commit()
        .map_err(|e| GapError::persistence(format!("commit failed: {}", e)))?;

    let (deleted, inserted) = (rows_deleted.to_string(), rows_inserted.to_string());
    let strategy_name = format!("{:?}", strategy);
    log_event_with_fields(
        Event::GapsSaved,
        &[
            ("deleted", deleted.as_str()),
            ("inserted", inserted.as_str()),
            ("strategy", strategy_name.as_str()),
        ],
    );

    Ok(SaveOutcome {
        strategy,
        mode: next_mode,
        rows_deleted,
        rows_inserted,
    })
}

fn write_edits(
    tx: &mut dyn GapTransaction,
    strategy: SaveStrategy,
    edits: GapEdits<'_>,
    now: DateTime<Utc>,
) -> GapResult<(usize, usize)> {
    match strategy {
        SaveStrategy::Skipped => Ok((0, 0)),
        SaveStrategy::FineGrained => {
            let deleted = write_each(edits.deleted, "deleted", |gap| tx.delete_gap(gap))?;
            let inserted = write_each(edits.added, "inserted", |gap| tx.insert_gap(gap))?;
            Ok((deleted, inserted))
        }
        SaveStrategy::RewriteAll => {
            tx.delete_all_gaps()?;
            let inserted = write_each(edits.all, "inserted", |gap| tx.insert_gap(gap))?;
            Ok((0, inserted))
        }
        SaveStrategy::Bulk => {
            tx.delete_all_gaps()?;
            match (edits.all.first(), edits.all.last()) {
                (Some(first), Some(last)) => {
                    tx.insert_gap(&DataGap::new(first.start_id, last.end_id, now))?;
                    Ok((0, 1))
                }
                _ => Ok((0, 0)),
            }
        }
    }
}

fn write_each<F>(gaps: &BTreeSet<DataGap>, verb: &str, mut write: F) -> GapResult<usize>
where
    F: FnMut(&DataGap) -> GapResult<()>,
{
    let mut progress = Timer::new();
    let mut counter = 0;
    for gap in gaps {
        write(gap)?;
        counter += 1;
        if progress.exceeded(PROGRESS_INTERVAL_MS) {
            let (done, total) = (counter.to_string(), gaps.len().to_string());
            Logger::info(
                Event::GapProgress.as_str(),
                &[("done", done.as_str()), ("total", total.as_str()), ("verb", verb)],
            );
            progress.reset();
        }
    }
    Ok(counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Fault, MemorySequenceSource};

    fn gap(start: i64, end: i64) -> DataGap {
        DataGap::new(start, end, Utc::now())
    }

    fn set(ranges: &[(i64, i64)]) -> BTreeSet<DataGap> {
        ranges.iter().map(|&(s, e)| gap(s, e)).collect()
    }

    #[test]
    fn test_strategy_skip_when_no_edits() {
        assert_eq!(
            choose_strategy(0, 10, false, PersistMode::Bulk),
            (SaveStrategy::Skipped, PersistMode::Bulk)
        );
    }

    #[test]
    fn test_strategy_cluster_always_fine_grained() {
        assert_eq!(
            choose_strategy(5000, 10, true, PersistMode::FineGrained),
            (SaveStrategy::FineGrained, PersistMode::FineGrained)
        );
        assert_eq!(
            choose_strategy(5, 10, true, PersistMode::Bulk),
            (SaveStrategy::FineGrained, PersistMode::FineGrained)
        );
    }

    #[test]
    fn test_strategy_threshold_and_hysteresis() {
        assert_eq!(
            choose_strategy(5000, 2000, false, PersistMode::FineGrained),
            (SaveStrategy::Bulk, PersistMode::Bulk)
        );
        assert_eq!(
            choose_strategy(2500, 2000, false, PersistMode::Bulk),
            (SaveStrategy::Bulk, PersistMode::Bulk)
        );
        assert_eq!(
            choose_strategy(500, 2000, false, PersistMode::Bulk),
            (SaveStrategy::RewriteAll, PersistMode::FineGrained)
        );
        assert_eq!(
            choose_strategy(2000, 2000, false, PersistMode::FineGrained),
            (SaveStrategy::FineGrained, PersistMode::FineGrained)
        );
    }

    #[test]
    fn test_fine_grained_save() {
        let source = MemorySequenceSource::new();
        source.seed_gaps([gap(1, 10), gap(11, 20)]);

        let deleted = set(&[(1, 10)]);
        let added = set(&[(4, 8)]);
        let all = set(&[(4, 8), (11, 20)]);
        let edits = GapEdits {
            all: &all,
            added: &added,
            deleted: &deleted,
        };

        let outcome =
            save_gaps(&source, edits, PersistMode::FineGrained, 100, false, Utc::now()).unwrap();

        assert_eq!(outcome.strategy, SaveStrategy::FineGrained);
        assert_eq!(outcome.rows_deleted, 1);
        assert_eq!(outcome.rows_inserted, 1);
        assert_eq!(source.persisted_gaps(), vec![gap(4, 8), gap(11, 20)]);
    }

    #[test]
    fn test_bulk_save_writes_spanning_gap() {
        let source = MemorySequenceSource::new();
        source.seed_gaps([gap(1, 10), gap(11, 20)]);

        let deleted = set(&[(1, 10), (11, 20)]);
        let added = set(&[(2, 3), (5, 6), (21, 120)]);
        let all = added.clone();
        let edits = GapEdits {
            all: &all,
            added: &added,
            deleted: &deleted,
        };

        let outcome =
            save_gaps(&source, edits, PersistMode::FineGrained, 2, false, Utc::now()).unwrap();

        assert_eq!(outcome.strategy, SaveStrategy::Bulk);
        assert_eq!(outcome.mode, PersistMode::Bulk);
        assert_eq!(source.persisted_gaps(), vec![gap(2, 120)]);
    }

    #[test]
    fn test_failed_save_rolls_back() {
        let source = MemorySequenceSource::new();
        source.seed_gaps([gap(1, 10)]);
        source.inject_fault(Fault::Commit);

        let deleted = set(&[(1, 10)]);
        let added = set(&[(4, 8)]);
        let all = added.clone();
        let edits = GapEdits {
            all: &all,
            added: &added,
            deleted: &deleted,
        };

        let result = save_gaps(&source, edits, PersistMode::FineGrained, 100, false, Utc::now());

        assert!(matches!(result, Err(GapError::Persistence(_))));
        assert_eq!(source.persisted_gaps(), vec![gap(1, 10)]);
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let source = MemorySequenceSource::new();
        source.seed_gaps([gap(1, 10)]);
        source.inject_fault(Fault::Insert);

        let deleted = set(&[(1, 10)]);
        let added = set(&[(4, 8)]);
        let all = added.clone();
        let edits = GapEdits {
            all: &all,
            added: &added,
            deleted: &deleted,
        };

        let result = save_gaps(&source, edits, PersistMode::FineGrained, 100, false, Utc::now());

        assert!(result.is_err());
        assert_eq!(source.rollbacks(), 1);
        assert_eq!(source.persisted_gaps(), vec![gap(1, 10)]);
    }

    #[test]
    fn test_failed_rollback_keeps_original_error() {
        let source = MemorySequenceSource::new();
        source.seed_gaps([gap(1, 10)]);
        source.inject_fault(Fault::Insert);
        source.inject_fault(Fault::Rollback);

        let deleted = set(&[(1, 10)]);
        let added = set(&[(4, 8)]);
        let all = added.clone();
        let edits = GapEdits {
            all: &all,
            added: &added,
            deleted: &deleted,
        };

        let result = save_gaps(&source, edits, PersistMode::FineGrained, 100, false, Utc::now());

        match result {
            Err(GapError::Persistence(message)) => {
                assert!(message.contains("insert failure"), "{}", message)
            }
            other => panic!("expected persistence error, got {:?}", other),
        }
        assert_eq!(source.rollbacks(), 1);
        assert_eq!(source.persisted_gaps(), vec![gap(1, 10)]);
    }
}

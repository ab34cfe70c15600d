//! Overlap repair
//!
//! A freshly loaded registry can be corrupt: overlapping neighbours, or rows
//! left behind after the logical last gap (the first gap whose size already
//! reaches the maximum window). Repair is planned as a pure function over the
//! sorted list and then applied to the gap table in one transaction.

use chrono::{DateTime, Utc};

use super::errors::{GapError, GapResult};
use super::gap::DataGap;
use super::persistence::rollback_after;
use crate::observability::{log_event_with_fields, Event, Logger};
use crate::store::SequenceSource;

/// A single repair edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    /// Gap found after the logical last gap; deleted.
    RemoveAfterLast(DataGap),
    /// Two overlapping neighbours replaced by one spanning gap.
    Merge {
        first: DataGap,
        second: DataGap,
        replacement: DataGap,
    },
}

/// Repaired registry plus the edits that produce it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairPlan {
    pub gaps: Vec<DataGap>,
    pub actions: Vec<RepairAction>,
}

impl RepairPlan {
    pub fn is_clean(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Plan repairs for `gaps`, which must be sorted ascending.
///
/// Walking forward, the first gap with `size >= largest_gap_size - 1` is the
/// logical last gap and every later gap is removed. Overlapping neighbours are
/// merged into `[earlier.start, max(ends)]`, or into a maximum-window gap from
/// the earlier start when the later one is the logical last gap; the merged
/// gap is then compared with its next neighbour.
pub fn plan_repairs(gaps: &[DataGap], largest_gap_size: i64, now: DateTime<Utc>) -> RepairPlan {
    let mut repaired: Vec<DataGap> = Vec::with_capacity(gaps.len());
    let mut actions = Vec::new();
    let mut last_gap: Option<DataGap> = None;

    for gap in gaps {
        if last_gap.is_some() {
            actions.push(RepairAction::RemoveAfterLast(gap.clone()));
            continue;
        }

        let mut current = gap.clone();
        let is_last = current.size() >= largest_gap_size - 1;
        if is_last {
            last_gap = Some(current.clone());
        }

        if let Some(previous) = repaired.last() {
            if previous.overlaps(&current) {
                let replacement = if is_last {
                    DataGap::new(
                        previous.start_id,
                        previous.start_id + largest_gap_size - 1,
                        now,
                    )
                } else {
                    DataGap::new(
                        previous.start_id,
                        previous.end_id.max(current.end_id),
                        now,
                    )
                };
                actions.push(RepairAction::Merge {
                    first: previous.clone(),
                    second: current.clone(),
                    replacement: replacement.clone(),
                });
                repaired.pop();
                current = replacement;
            }
        }

        repaired.push(current);
    }

    RepairPlan {
        gaps: repaired,
        actions,
    }
}

/// Repair `gaps` in place and apply the edits to the gap table.
///
/// Returns the number of repair edits. All edits commit together; on any
/// failure the transaction is rolled back, `gaps` is left untouched and the
/// error is returned.
pub fn fix_overlapping_gaps(
    gaps: &mut Vec<DataGap>,
    source: &dyn SequenceSource,
    largest_gap_size: i64,
    now: DateTime<Utc>,
) -> GapResult<usize> {
    Logger::trace(Event::GapOverlapScan.as_str(), &[]);
    let plan = plan_repairs(gaps, largest_gap_size, now);
    if plan.is_clean() {
        return Ok(0);
    }

    let mut tx = source
        .begin()
        .map_err(|e| GapError::repair(format!("begin failed: {}", e)))?;

    let applied = (|| -> GapResult<()> {
        for action in &plan.actions {
            match action {
                RepairAction::RemoveAfterLast(gap) => {
                    log_event_with_fields(
                        Event::GapTrailingRemoved,
                        &[("gap", gap.to_string().as_str())],
                    );
                    tx.delete_gap(gap)?;
                }
                RepairAction::Merge {
                    first,
                    second,
                    replacement,
                } => {
                    Logger::warn(
                        Event::GapOverlapRepaired.as_str(),
                        &[
                            ("first", first.to_string().as_str()),
                            ("second", second.to_string().as_str()),
                            ("replacement", replacement.to_string().as_str()),
                        ],
                    );
                    tx.delete_gap(first)?;
                    tx.delete_gap(second)?;
                    tx.insert_gap(replacement)?;
                }
            }
        }
        Ok(())
    })();

    match applied {
        Ok(()) => tx
            .commit()
            .map_err(|e| GapError::repair(format!("commit failed: {}", e)))?,
        Err(e) => {
            let cause = GapError::repair(e.to_string());
            rollback_after(tx, &cause);
            return Err(cause);
        }
    }

    let edits = plan.actions.len();
    *gaps = plan.gaps;
    Ok(edits)
}

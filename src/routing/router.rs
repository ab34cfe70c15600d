//! Routing pass driver
//!
//! Drives one routing pass the way the router does: prepare the registry,
//! read change rows inside each gap in ascending order up to the row budget,
//! route them, report them to the detector and reconcile.

use std::sync::Arc;

use serde::Serialize;

use super::detector::{GapDetector, PassSummary, PrepareOutcome};
use super::errors::{GapError, GapResult};
use crate::observability::{
    log_event_with_fields, Event, ProcessInfo, ProcessKind, ProcessStatus, Timer,
};
use crate::store::ChangeLog;

/// How the registry was prepared for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepareKind {
    FullAnalysis,
    Reloaded,
    Cached,
}

/// Result of one routing pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSummary {
    pub prepared: PrepareKind,
    /// Reconciliation run by a full analysis before any rows were read
    pub analysis: Option<PassSummary>,
    pub rows_routed: usize,
    /// Row budget ran out before every gap was read
    pub truncated: bool,
    pub detection: PassSummary,
    pub elapsed_ms: u64,
}

/// Routes change rows found inside gaps.
pub struct RoutingPass {
    detector: GapDetector,
    changes: Arc<dyn ChangeLog>,
}

impl RoutingPass {
    pub fn new(detector: GapDetector, changes: Arc<dyn ChangeLog>) -> Self {
        Self { detector, changes }
    }

    pub fn detector(&self) -> &GapDetector {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut GapDetector {
        &mut self.detector
    }

    pub fn into_detector(self) -> GapDetector {
        self.detector
    }

    /// Run one pass.
    ///
    /// If rows were routed but the gap registry could not be updated, the
    /// next pass is forced into a full analysis so routed rows are found by
    /// their routed state instead of being routed again.
    pub fn run(&mut self) -> GapResult<RouteSummary> {
        let timer = Timer::new();
        let process = self.detector.processes().start(ProcessKind::Routing);
        process.set_status(ProcessStatus::Querying);

        match self.route(&process) {
            Ok(mut summary) => {
                summary.elapsed_ms = timer.elapsed_ms();
                process.set_status(ProcessStatus::Ok);
                let (rows, elapsed) = (
                    summary.rows_routed.to_string(),
                    summary.elapsed_ms.to_string(),
                );
                log_event_with_fields(
                    Event::RoutePassComplete,
                    &[
                        ("elapsed_ms", elapsed.as_str()),
                        ("rows", rows.as_str()),
                        ("truncated", if summary.truncated { "true" } else { "false" }),
                    ],
                );
                Ok(summary)
            }
            Err(e) => {
                process.set_status(ProcessStatus::Error);
                let reason = e.to_string();
                log_event_with_fields(
                    Event::RoutePassFailed,
                    &[("code", e.code()), ("reason", reason.as_str())],
                );
                Err(e)
            }
        }
    }

    fn route(&mut self, process: &ProcessInfo) -> GapResult<RouteSummary> {
        let (prepared, analysis) = match self.detector.before_routing()? {
            PrepareOutcome::FullAnalysis(summary) => (PrepareKind::FullAnalysis, Some(summary)),
            PrepareOutcome::Reloaded { .. } => (PrepareKind::Reloaded, None),
            PrepareOutcome::Cached => (PrepareKind::Cached, None),
        };

        let gaps = self.detector.gaps().to_vec();
        let mut budget = self.detector.config().max_rows_per_pass;
        let mut routed: Vec<i64> = Vec::new();
        let mut truncated = false;

        for gap in &gaps {
            if budget == 0 {
                truncated = true;
                break;
            }
            let mut ids = self.changes.read_changes(gap.start_id, gap.end_id, budget + 1)?;
            if ids.len() > budget {
                ids.truncate(budget);
                truncated = true;
            }
            budget -= ids.len();
            process.add_processed(ids.len() as u64);
            routed.extend(ids);
            if truncated {
                break;
            }
        }

        process.set_status(ProcessStatus::Processing);
        if !routed.is_empty() {
            if let Err(e) = self.changes.mark_routed(&routed) {
                self.force_full_analysis(&e);
                return Err(e);
            }
        }
        self.detector.metrics().add_rows_routed(routed.len() as u64);

        let rows_routed = routed.len();
        self.detector.add_observed_ids(routed);
        self.detector.set_all_data_read(!truncated);

        let detection = match self.detector.after_routing() {
            Ok(summary) => summary,
            Err(e) => {
                self.force_full_analysis(&e);
                return Err(e);
            }
        };

        Ok(RouteSummary {
            prepared,
            analysis,
            rows_routed,
            truncated,
            detection,
            elapsed_ms: 0,
        })
    }

    fn force_full_analysis(&mut self, cause: &GapError) {
        if let Err(e) = self.detector.require_full_analysis() {
            let (cause, reason) = (cause.to_string(), e.to_string());
            log_event_with_fields(
                Event::RoutePassFailed,
                &[("cause", cause.as_str()), ("reason", reason.as_str())],
            );
        }
    }
}

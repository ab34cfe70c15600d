//! Gap detector
//!
//! Keeps the gap registry complete across routing passes. The router calls
//! [`GapDetector::before_routing`] to load or verify the registry, reports
//! the ids it routed with [`GapDetector::add_observed_ids`], and calls
//! [`GapDetector::after_routing`] to reconcile those ids against the gaps and
//! persist the result.
//!
//! A full analysis reloads the registry, repairs it, reads every routed id
//! inside every gap and reconciles immediately. Incremental passes reuse the
//! cached registry unless cluster locking requires a reload.
//!
//! Expiry of empty gaps is gated twice: a pass that read the whole id space
//! may expire gaps directly, a partial pass only when the busy-expire
//! interval has elapsed (or never ran), and then only after an authoritative
//! row count confirms the gap and its neighbours are empty.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::config::GapConfig;
use super::context::{DetectorContext, SharedFlags};
use super::errors::{GapError, GapResult};
use super::gap::{validate_new_gap, DataGap};
use super::mapper::map_ids_to_gaps;
use super::persistence::{
    rollback_after, save_gaps, GapEdits, PersistMode, SaveOutcome, SaveStrategy,
};
use super::repair::fix_overlapping_gaps;
use crate::observability::{
    log_event_with_fields, Event, Logger, MetricsRegistry, ObservationScope, ProcessInfo,
    ProcessKind, ProcessStatus, ProcessTracker, Timer,
};
use crate::store::{
    CapabilityProbe, Clock, ContextStore, MemoryContextStore, MemorySequenceSource,
    SequenceSource, StaticProbe, SystemClock,
};

/// Reconciliation or persistence running longer than this reports progress.
const PROGRESS_INTERVAL_MS: u64 = 30_000;

/// A single eager id query longer than this is reported.
const LONG_OPERATION_THRESHOLD_MS: u64 = 30_000;

/// A pass longer than this reports its duration.
const SLOW_PASS_MS: u64 = 10_000;

/// External collaborators of a detector.
#[derive(Clone)]
pub struct DetectorPorts {
    pub source: Arc<dyn SequenceSource>,
    pub context_store: Arc<dyn ContextStore>,
    pub probe: Arc<dyn CapabilityProbe>,
    pub clock: Arc<dyn Clock>,
}

impl DetectorPorts {
    /// Ports around an in-memory source: process-local context, no
    /// transaction views, system clock.
    pub fn in_memory(source: Arc<MemorySequenceSource>) -> Self {
        Self {
            source,
            context_store: Arc::new(MemoryContextStore::new()),
            probe: Arc::new(StaticProbe::without_transaction_views()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_context_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.context_store = store;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Result of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    /// Reconciliation ran as part of a full analysis
    pub full_analysis: bool,
    /// Whether the pass read the whole id space
    pub all_data_read: bool,
    pub ids_observed: usize,
    pub gaps_before: usize,
    pub gaps_after: usize,
    pub gaps_added: usize,
    /// Resolved and expired gaps together
    pub gaps_deleted: usize,
    pub gaps_expired: usize,
    pub gaps_rejected: usize,
    /// Authoritative row counts issued for expiry
    pub expire_checked: usize,
    pub strategy: SaveStrategy,
    pub persist_mode: PersistMode,
    pub elapsed_ms: u64,
}

/// What `before_routing` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// Full analysis ran and already reconciled the registry
    FullAnalysis(PassSummary),
    /// Registry reloaded from the gap table
    Reloaded { gaps: usize },
    /// Cached registry reused
    Cached,
}

#[derive(Debug)]
struct PassState {
    data_ids: Vec<i64>,
    all_data_read: bool,
}

impl Default for PassState {
    fn default() -> Self {
        Self {
            data_ids: Vec::new(),
            all_data_read: true,
        }
    }
}

#[derive(Debug, Default)]
struct WorkingSets {
    all: BTreeSet<DataGap>,
    added: BTreeSet<DataGap>,
    deleted: BTreeSet<DataGap>,
    rejected: usize,
}

impl WorkingSets {
    fn resolve(&mut self, gap: &DataGap) {
        self.deleted.insert(gap.clone());
        self.all.remove(gap);
    }
}

/// Per-process gap detector.
///
/// Not safe for concurrent passes; the caller runs at most one pass at a
/// time.
pub struct GapDetector {
    config: GapConfig,
    ports: DetectorPorts,
    context: DetectorContext,
    pass: PassState,
    metrics: Arc<MetricsRegistry>,
    processes: Arc<ProcessTracker>,
}

impl GapDetector {
    pub fn new(config: GapConfig, ports: DetectorPorts) -> Self {
        Self {
            config,
            ports,
            context: DetectorContext::default(),
            pass: PassState::default(),
            metrics: Arc::new(MetricsRegistry::new()),
            processes: Arc::new(ProcessTracker::new()),
        }
    }

    /// Resume from a context carried over from an earlier detector.
    pub fn with_context(mut self, context: DetectorContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_observability(
        mut self,
        metrics: Arc<MetricsRegistry>,
        processes: Arc<ProcessTracker>,
    ) -> Self {
        self.metrics = metrics;
        self.processes = processes;
        self
    }

    pub fn config(&self) -> &GapConfig {
        &self.config
    }

    pub fn context(&self) -> &DetectorContext {
        &self.context
    }

    pub fn into_context(self) -> DetectorContext {
        self.context
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn processes(&self) -> &Arc<ProcessTracker> {
        &self.processes
    }

    /// Current registry snapshot, empty before the first load.
    pub fn gaps(&self) -> &[DataGap] {
        self.context.gaps.as_deref().unwrap_or(&[])
    }

    /// Accumulate ids routed during the current pass.
    pub fn add_observed_ids(&mut self, ids: impl IntoIterator<Item = i64>) {
        let before = self.pass.data_ids.len();
        self.pass.data_ids.extend(ids);
        self.metrics
            .add_ids_observed((self.pass.data_ids.len() - before) as u64);
    }

    /// Any partial read marks the whole pass partial.
    pub fn set_all_data_read(&mut self, all_data_read: bool) {
        self.pass.all_data_read &= all_data_read;
    }

    pub fn is_all_data_read(&self) -> bool {
        self.pass.all_data_read
    }

    /// Force the next `before_routing` to run a full analysis.
    pub fn require_full_analysis(&mut self) -> GapResult<()> {
        self.flags_set_full_analysis(true)
    }

    pub fn is_full_analysis(&mut self) -> GapResult<bool> {
        let flags = SharedFlags::new(
            self.ports.context_store.as_ref(),
            self.config.cluster_locking_enabled,
        );
        flags.full_analysis(&mut self.context)
    }

    /// Prepare the registry for a routing pass.
    pub fn before_routing(&mut self) -> GapResult<PrepareOutcome> {
        self.reset();

        if self.is_full_analysis()? {
            let scope = ObservationScope::new("GAP_FULL_ANALYSIS");
            return match self.run_full_analysis() {
                Ok(summary) => {
                    let gaps = summary.gaps_after.to_string();
                    scope.complete_with_fields(&[("gaps", gaps.as_str())]);
                    Ok(PrepareOutcome::FullAnalysis(summary))
                }
                Err(e) => {
                    scope.fail(&e.to_string());
                    Err(e)
                }
            };
        }

        if self.context.gaps.is_none() || self.config.cluster_locking_enabled {
            let process = self.processes.start(ProcessKind::GapDetect);
            process.set_status(ProcessStatus::Querying);
            if let Err(e) = self.load_gaps() {
                self.fail_pass(&process, &e);
                return Err(e);
            }
            process.set_status(ProcessStatus::Ok);
            return Ok(PrepareOutcome::Reloaded {
                gaps: self.gaps().len(),
            });
        }

        Ok(PrepareOutcome::Cached)
    }

    /// Reconcile the ids observed this pass and persist the result.
    ///
    /// On failure no gap edits are committed and the cached registry is left
    /// as it was before the pass.
    pub fn after_routing(&mut self) -> GapResult<PassSummary> {
        let process = self.processes.start(ProcessKind::GapDetect);
        process.set_status(ProcessStatus::Processing);

        match self.reconcile(&process) {
            Ok(summary) => {
                process.set_status(ProcessStatus::Ok);
                self.metrics.increment_passes_completed();
                let (added, deleted, elapsed) = (
                    summary.gaps_added.to_string(),
                    summary.gaps_deleted.to_string(),
                    summary.elapsed_ms.to_string(),
                );
                log_event_with_fields(
                    Event::GapPassComplete,
                    &[
                        ("added", added.as_str()),
                        ("deleted", deleted.as_str()),
                        ("elapsed_ms", elapsed.as_str()),
                    ],
                );
                Ok(summary)
            }
            Err(e) => {
                self.fail_pass(&process, &e);
                Err(e)
            }
        }
    }

    fn run_full_analysis(&mut self) -> GapResult<PassSummary> {
        self.metrics.increment_full_analyses();
        let process = self.processes.start(ProcessKind::GapDetect);
        process.set_status(ProcessStatus::Querying);

        let timer = Timer::new();
        let loaded = self.load_gaps().and_then(|_| self.query_data_ids(&process));
        if let Err(e) = loaded {
            self.fail_pass(&process, &e);
            return Err(e);
        }
        process.set_status(ProcessStatus::Ok);
        let (elapsed, ids) = (timer.elapsed_ms().to_string(), self.pass.data_ids.len().to_string());
        log_event_with_fields(
            Event::GapIdsQueried,
            &[("elapsed_ms", elapsed.as_str()), ("ids", ids.as_str())],
        );

        let mut summary = self.after_routing()?;
        summary.full_analysis = true;
        self.reset();
        Ok(summary)
    }

    fn reset(&mut self) {
        self.pass = PassState::default();
    }

    fn fail_pass(&self, process: &ProcessInfo, error: &GapError) {
        process.set_status(ProcessStatus::Error);
        self.metrics.increment_passes_failed();
        let reason = error.to_string();
        log_event_with_fields(
            Event::GapPassFailed,
            &[("code", error.code()), ("reason", reason.as_str())],
        );
    }

    fn flags_set_full_analysis(&mut self, value: bool) -> GapResult<()> {
        let flags = SharedFlags::new(
            self.ports.context_store.as_ref(),
            self.config.cluster_locking_enabled,
        );
        flags.set_full_analysis(&mut self.context, value)
    }

    /// Read the registry, seeding it when empty and repairing it when
    /// validation is enabled.
    fn load_gaps(&mut self) -> GapResult<()> {
        let source = self.ports.source.as_ref();
        let mut gaps = source.find_gaps()?;
        gaps.sort();

        if gaps.is_empty() {
            gaps.push(self.seed_registry()?);
        }

        if self.config.detect_invalid_gaps {
            let repaired = fix_overlapping_gaps(
                &mut gaps,
                source,
                self.config.largest_gap_size,
                self.ports.clock.now(),
            )?;
            self.metrics.add_overlaps_repaired(repaired as u64);
        }

        let count = gaps.len().to_string();
        log_event_with_fields(Event::GapsLoaded, &[("gaps", count.as_str())]);
        self.context.gaps = Some(gaps);
        Ok(())
    }

    /// Persist one open-ended gap covering every known id.
    fn seed_registry(&self) -> GapResult<DataGap> {
        let source = self.ports.source.as_ref();
        let max_id = source.max_data_id()?.unwrap_or(0);
        let gap = DataGap::new(
            0,
            max_id + self.config.largest_gap_size,
            self.ports.clock.now(),
        );

        let mut tx = source.begin()?;
        if let Err(e) = tx.insert_gap(&gap) {
            rollback_after(tx, &e);
            return Err(e);
        }
        tx.commit()?;

        log_event_with_fields(Event::GapsSeeded, &[("gap", gap.to_string().as_str())]);
        Ok(gap)
    }

    /// Eagerly read every routed id inside every gap.
    fn query_data_ids(&mut self, process: &ProcessInfo) -> GapResult<()> {
        let source = Arc::clone(&self.ports.source);
        let gaps = self.gaps().to_vec();
        for gap in &gaps {
            let timer = Timer::new();
            let ids = source.find_ids_in_range(gap.start_id, gap.end_id)?;
            process.add_processed(ids.len() as u64);
            self.add_observed_ids(ids);
            if timer.exceeded(LONG_OPERATION_THRESHOLD_MS) {
                let elapsed = timer.elapsed_ms().to_string();
                Logger::info(
                    Event::GapQuerySlow.as_str(),
                    &[("elapsed_ms", elapsed.as_str()), ("gap", gap.to_string().as_str())],
                );
            }
        }
        Ok(())
    }

    fn reconcile(&mut self, process: &ProcessInfo) -> GapResult<PassSummary> {
        let gaps = self.context.gaps.clone().ok_or(GapError::NotPrepared)?;
        let increment = self.config.data_id_increment_by;
        let all_data_read = self.pass.all_data_read;
        let local_now = self.ports.clock.now();

        let probe = Arc::clone(&self.ports.probe);
        let transaction_views = probe.supports_transaction_views();
        let (current_time, earliest_open) = if transaction_views {
            let skew = Duration::milliseconds(self.config.transaction_view_clock_sync_threshold_ms);
            let earliest = probe.earliest_open_transaction_start()?.map(|start| start - skew);
            (probe.current_store_time()?, earliest)
        } else {
            (local_now, None)
        };

        let busy_expire = !all_data_read && self.busy_expire_due(local_now)?;

        let timer = Timer::new();
        let mut progress = Timer::new();
        let mut work = WorkingSets {
            all: gaps.iter().cloned().collect(),
            ..WorkingSets::default()
        };

        self.pass.data_ids.sort_unstable();
        let buckets = map_ids_to_gaps(&self.pass.data_ids, &gaps);
        if timer.exceeded(PROGRESS_INTERVAL_MS) {
            let (elapsed, ids, count) = (
                timer.elapsed_ms().to_string(),
                self.pass.data_ids.len().to_string(),
                gaps.len().to_string(),
            );
            log_event_with_fields(
                Event::GapMappingSlow,
                &[
                    ("elapsed_ms", elapsed.as_str()),
                    ("gaps", count.as_str()),
                    ("ids", ids.as_str()),
                ],
            );
        }

        let source = Arc::clone(&self.ports.source);
        let mut last_data_id: Option<i64> = None;
        let mut id_count = 0usize;
        let mut range_checked = 0i64;
        let mut expire_checked = 0usize;
        let mut expired_count = 0usize;

        for (index, (gap, ids)) in gaps.iter().zip(&buckets).enumerate() {
            let is_last_gap = index + 1 == gaps.len();
            last_data_id = None;
            id_count += ids.len();
            range_checked += gap.size();

            if !ids.is_empty() {
                work.resolve(gap);
            } else if !is_last_gap && (all_data_read || busy_expire) {
                let expired = match (transaction_views, earliest_open) {
                    (true, Some(earliest)) => gap.create_time < earliest,
                    (true, None) => true,
                    (false, _) => {
                        (current_time - gap.create_time).num_milliseconds()
                            > self.config.stale_gap_timeout_ms
                    }
                };

                if expired {
                    let mut confirmed_empty = false;
                    if !all_data_read {
                        confirmed_empty =
                            source.count_rows_in_range(gap.start_id - 1, gap.end_id + 1)? == 0;
                        expire_checked += 1;
                    }
                    if all_data_read || confirmed_empty {
                        let reason = if transaction_views {
                            "no pending transactions"
                        } else {
                            "stale"
                        };
                        Logger::trace(
                            Event::GapExpired.as_str(),
                            &[("gap", gap.to_string().as_str()), ("reason", reason)],
                        );
                        work.resolve(gap);
                        expired_count += 1;
                        self.metrics.increment_gaps_expired();
                    }
                }
            }

            for &id in ids {
                process.increment_processed();
                match last_data_id {
                    None if gap.start_id + increment <= id => {
                        self.add_gap(&mut work, &gaps, DataGap::new(gap.start_id, id - 1, current_time));
                    }
                    Some(previous) if previous + increment != id && previous != id => {
                        self.add_gap(&mut work, &gaps, DataGap::new(previous + 1, id - 1, current_time));
                    }
                    _ => {}
                }
                last_data_id = Some(id);
            }

            if let Some(last) = last_data_id {
                if !is_last_gap && last + increment <= gap.end_id {
                    self.add_gap(
                        &mut work,
                        &gaps,
                        DataGap::new(last + increment, gap.end_id, current_time),
                    );
                }
            }

            if progress.exceeded(PROGRESS_INTERVAL_MS) {
                let (elapsed, rows, range, added, deleted, checked) = (
                    timer.elapsed_ms().to_string(),
                    id_count.to_string(),
                    range_checked.to_string(),
                    work.added.len().to_string(),
                    work.deleted.len().to_string(),
                    expire_checked.to_string(),
                );
                log_event_with_fields(
                    Event::GapProgress,
                    &[
                        ("added", added.as_str()),
                        ("deleted", deleted.as_str()),
                        ("elapsed_ms", elapsed.as_str()),
                        ("expire_checked", checked.as_str()),
                        ("range", range.as_str()),
                        ("rows", rows.as_str()),
                    ],
                );
                progress.reset();
            }
        }

        if let Some(last) = last_data_id {
            let trailing = DataGap::new(last + 1, last + self.config.largest_gap_size, current_time);
            let description = trailing.to_string();
            if self.add_gap(&mut work, &gaps, trailing) {
                Logger::trace(
                    Event::GapTrailingOpened.as_str(),
                    &[("gap", description.as_str())],
                );
            }
        }

        let outcome = save_gaps(
            source.as_ref(),
            GapEdits {
                all: &work.all,
                added: &work.added,
                deleted: &work.deleted,
            },
            self.context.persist_mode,
            self.config.max_gap_changes,
            self.config.cluster_locking_enabled,
            current_time,
        )?;
        self.record_save(&outcome, &work);

        self.context.persist_mode = outcome.mode;
        self.context.gaps = Some(work.all.iter().cloned().collect());

        self.flags_set_full_analysis(false)?;
        if !all_data_read && expire_checked > 0 {
            let flags = SharedFlags::new(
                self.ports.context_store.as_ref(),
                self.config.cluster_locking_enabled,
            );
            flags.set_last_busy_expire_run(&mut self.context, self.ports.clock.now())?;
        }

        let elapsed_ms = timer.elapsed_ms();
        if elapsed_ms > SLOW_PASS_MS {
            let elapsed = elapsed_ms.to_string();
            log_event_with_fields(Event::GapPassSlow, &[("elapsed_ms", elapsed.as_str())]);
        }

        Ok(PassSummary {
            full_analysis: false,
            all_data_read,
            ids_observed: self.pass.data_ids.len(),
            gaps_before: gaps.len(),
            gaps_after: work.all.len(),
            gaps_added: work.added.len(),
            gaps_deleted: work.deleted.len(),
            gaps_expired: expired_count,
            gaps_rejected: work.rejected,
            expire_checked,
            strategy: outcome.strategy,
            persist_mode: outcome.mode,
            elapsed_ms,
        })
    }

    /// `last run never || now - last run >= busy interval`
    fn busy_expire_due(&mut self, now: DateTime<Utc>) -> GapResult<bool> {
        let flags = SharedFlags::new(
            self.ports.context_store.as_ref(),
            self.config.cluster_locking_enabled,
        );
        Ok(match flags.last_busy_expire_run(&mut self.context)? {
            None => true,
            Some(last) => (now - last).num_milliseconds() >= self.config.stale_gap_busy_expire_ms,
        })
    }

    fn record_save(&self, outcome: &SaveOutcome, work: &WorkingSets) {
        match outcome.strategy {
            SaveStrategy::Skipped => return,
            SaveStrategy::Bulk => self.metrics.increment_bulk_saves(),
            SaveStrategy::FineGrained | SaveStrategy::RewriteAll => {
                self.metrics.increment_fine_grained_saves()
            }
        }
        self.metrics.add_gaps_added(work.added.len() as u64);
        self.metrics.add_gaps_deleted(work.deleted.len() as u64);
    }

    /// Accept a newly detected gap unless validation refuses it.
    fn add_gap(&self, work: &mut WorkingSets, gaps: &[DataGap], gap: DataGap) -> bool {
        if self.config.detect_invalid_gaps {
            if let Err(rejection) = validate_new_gap(
                &gap,
                &work.all,
                self.config.largest_gap_size,
                self.config.suspicious_gap_size(),
            ) {
                Logger::warn(
                    Event::GapRejected.as_str(),
                    &[
                        ("gap", gap.to_string().as_str()),
                        ("reason", rejection.as_str()),
                    ],
                );
                Logger::info(
                    Event::GapRejectedContext.as_str(),
                    &[
                        ("added", format_gaps(&work.added).as_str()),
                        ("data_ids", format!("{:?}", self.pass.data_ids).as_str()),
                        ("deleted", format_gaps(&work.deleted).as_str()),
                        ("gaps", format_gaps(gaps).as_str()),
                    ],
                );
                work.rejected += 1;
                self.metrics.increment_gaps_rejected();
                return false;
            }
        }

        work.added.insert(gap.clone());
        work.all.insert(gap);
        true
    }
}

fn format_gaps<'a>(gaps: impl IntoIterator<Item = &'a DataGap>) -> String {
    let parts: Vec<String> = gaps.into_iter().map(|g| g.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

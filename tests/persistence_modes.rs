//! Persistence Mode Tests
//!
//! Tests for how a pass's gap edits reach the gap table:
//! - Fine-grained diffs under the change threshold
//! - Bulk collapse to one spanning gap above it
//! - Switching back once volume drops
//! - Cluster locking forcing fine-grained saves

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use datagap::routing::{
    DataGap, DetectorContext, DetectorPorts, GapConfig, GapDetector, PersistMode, SaveStrategy,
    FULL_GAP_ANALYSIS_KEY,
};
use datagap::store::{
    ChangeLog, ContextStore, ManualClock, MemoryContextStore, MemorySequenceSource,
};

const WINDOW: i64 = 100_000;

fn config(cluster_locking_enabled: bool) -> GapConfig {
    GapConfig {
        largest_gap_size: WINDOW,
        max_gap_changes: 2000,
        cluster_locking_enabled,
        ..GapConfig::default()
    }
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
    ))
}

fn open_gap() -> DataGap {
    DataGap::new(1, WINDOW, Utc::now())
}

/// Odd ids 1..=9997: resolves the open gap into 4998 single-id gaps plus a
/// new open gap, 5000 edits in total.
fn odd_ids() -> Vec<i64> {
    (0..4999).map(|i| 2 * i + 1).collect()
}

fn bounds(gaps: &[DataGap]) -> Vec<(i64, i64)> {
    gaps.iter().map(|g| (g.start_id, g.end_id)).collect()
}

fn detector(source: &Arc<MemorySequenceSource>, config: GapConfig) -> GapDetector {
    let ports = DetectorPorts::in_memory(Arc::clone(source)).with_clock(clock());
    GapDetector::new(config, ports).with_context(DetectorContext {
        gaps: Some(vec![open_gap()]),
        full_analysis: false,
        ..DetectorContext::default()
    })
}

// =============================================================================
// Bulk Mode Tests
// =============================================================================

/// Edits above the threshold collapse the table to one spanning gap.
#[test]
fn test_large_pass_collapses_to_spanning_gap() {
    let source = Arc::new(MemorySequenceSource::new());
    source.seed_gaps([open_gap()]);
    let mut detector = detector(&source, config(false));

    detector.before_routing().unwrap();
    detector.add_observed_ids(odd_ids());
    let summary = detector.after_routing().unwrap();

    assert_eq!(summary.gaps_added + summary.gaps_deleted, 5000);
    assert_eq!(summary.strategy, SaveStrategy::Bulk);
    assert_eq!(summary.persist_mode, PersistMode::Bulk);
    assert_eq!(detector.context().persist_mode, PersistMode::Bulk);
    assert_eq!(bounds(&source.persisted_gaps()), vec![(2, 9997 + WINDOW)]);
    assert_eq!(detector.gaps().len(), 4999);
}

/// Bulk mode persists while volume stays above the threshold.
#[test]
fn test_bulk_mode_sticks_above_threshold() {
    let source = Arc::new(MemorySequenceSource::new());
    source.seed_gaps([open_gap()]);
    let mut detector = detector(&source, config(false));

    detector.before_routing().unwrap();
    detector.add_observed_ids(odd_ids());
    detector.after_routing().unwrap();

    detector.before_routing().unwrap();
    detector.add_observed_ids((1..=2500).map(|i| 2 * i));
    let summary = detector.after_routing().unwrap();

    assert_eq!(summary.strategy, SaveStrategy::Bulk);
    assert_eq!(source.persisted_gaps().len(), 1);
}

/// A low-volume pass in bulk mode rewrites the table from the full registry.
#[test]
fn test_low_volume_pass_switches_back() {
    let source = Arc::new(MemorySequenceSource::new());
    source.seed_gaps([open_gap()]);
    let mut detector = detector(&source, config(false));

    detector.before_routing().unwrap();
    detector.add_observed_ids(odd_ids());
    detector.after_routing().unwrap();

    detector.before_routing().unwrap();
    detector.add_observed_ids((1..=500).map(|i| 2 * i));
    let summary = detector.after_routing().unwrap();

    assert_eq!(summary.gaps_deleted, 500);
    assert_eq!(summary.strategy, SaveStrategy::RewriteAll);
    assert_eq!(summary.persist_mode, PersistMode::FineGrained);
    assert_eq!(source.persisted_gaps().len(), 4499);
    assert_eq!(bounds(&source.persisted_gaps()), bounds(detector.gaps()));

    let metrics = detector.metrics().snapshot();
    assert_eq!(metrics.bulk_saves, 1);
    assert_eq!(metrics.fine_grained_saves, 1);
}

/// A new process re-derives the fine-grained registry from routed ids.
#[test]
fn test_full_analysis_rederives_bulk_registry() {
    let source = Arc::new(MemorySequenceSource::new());
    source.seed_gaps([open_gap()]);
    let mut first = detector(&source, config(false));

    let ids = odd_ids();
    source.insert_rows(ids.iter().copied());
    source.mark_routed(&ids).unwrap();

    first.before_routing().unwrap();
    first.add_observed_ids(ids);
    first.after_routing().unwrap();
    let expected = bounds(first.gaps());
    assert_eq!(source.persisted_gaps().len(), 1);

    let ports = DetectorPorts::in_memory(Arc::clone(&source)).with_clock(clock());
    let mut restarted = GapDetector::new(config(false), ports);
    restarted.before_routing().unwrap();

    assert_eq!(bounds(restarted.gaps()), expected);
}

// =============================================================================
// Cluster Locking Tests
// =============================================================================

/// Cluster locking always saves fine-grained, whatever the volume.
#[test]
fn test_cluster_locking_always_fine_grained() {
    let source = Arc::new(MemorySequenceSource::new());
    source.seed_gaps([open_gap()]);
    let context = Arc::new(MemoryContextStore::new());
    context.save(FULL_GAP_ANALYSIS_KEY, "false").unwrap();

    let ports = DetectorPorts::in_memory(Arc::clone(&source))
        .with_clock(clock())
        .with_context_store(context);
    let mut detector = GapDetector::new(config(true), ports);

    detector.before_routing().unwrap();
    detector.add_observed_ids(odd_ids());
    let summary = detector.after_routing().unwrap();

    assert_eq!(summary.strategy, SaveStrategy::FineGrained);
    assert_eq!(summary.persist_mode, PersistMode::FineGrained);
    assert_eq!(source.persisted_gaps().len(), 4999);
}

/// A bulk tag carried into a clustered detector is cleared by its first save.
#[test]
fn test_cluster_locking_leaves_bulk_mode() {
    let source = Arc::new(MemorySequenceSource::new());
    source.seed_gaps([open_gap()]);
    let context = Arc::new(MemoryContextStore::new());
    context.save(FULL_GAP_ANALYSIS_KEY, "false").unwrap();

    let ports = DetectorPorts::in_memory(Arc::clone(&source))
        .with_clock(clock())
        .with_context_store(context);
    let mut detector = GapDetector::new(config(true), ports).with_context(DetectorContext {
        full_analysis: false,
        persist_mode: PersistMode::Bulk,
        ..DetectorContext::default()
    });

    detector.before_routing().unwrap();
    detector.add_observed_ids(vec![1, 2, 3]);
    let summary = detector.after_routing().unwrap();

    assert_eq!(summary.strategy, SaveStrategy::FineGrained);
    assert_eq!(summary.persist_mode, PersistMode::FineGrained);
    assert_eq!(detector.context().persist_mode, PersistMode::FineGrained);
    assert_eq!(bounds(&source.persisted_gaps()), vec![(4, WINDOW + 3)]);
}

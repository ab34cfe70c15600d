//! Cluster Flag Tests
//!
//! Two detectors route against one store with cluster locking enabled and
//! share a file-backed context store:
//! - The full-analysis flag left by one is honored by the other
//! - Every pass reloads the gap table
//! - The busy-expire timestamp is shared

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use datagap::routing::{
    DataGap, DetectorPorts, GapConfig, GapDetector, PrepareOutcome, FULL_GAP_ANALYSIS_KEY,
    LAST_BUSY_EXPIRE_RUN_KEY,
};
use datagap::store::{Clock, ContextStore, FileContextStore, ManualClock, MemorySequenceSource};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

fn bounds(gaps: &[DataGap]) -> Vec<(i64, i64)> {
    gaps.iter().map(|g| (g.start_id, g.end_id)).collect()
}

fn node(
    source: &Arc<MemorySequenceSource>,
    context_path: &Path,
    clock: &Arc<ManualClock>,
) -> GapDetector {
    let config = GapConfig {
        largest_gap_size: 1000,
        cluster_locking_enabled: true,
        ..GapConfig::default()
    };
    let ports = DetectorPorts::in_memory(Arc::clone(source))
        .with_context_store(Arc::new(FileContextStore::open(context_path)))
        .with_clock(clock.clone());
    GapDetector::new(config, ports)
}

// =============================================================================
// Full Analysis Handoff Tests
// =============================================================================

/// The first node runs the full analysis; the second reuses its result.
#[test]
fn test_full_analysis_runs_once_across_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let context_path = dir.path().join("context.json");
    let source = Arc::new(MemorySequenceSource::from_parts(&[1, 2, 3], &[], &[]));
    let clock = Arc::new(ManualClock::new(t0()));

    let mut a = node(&source, &context_path, &clock);
    let mut b = node(&source, &context_path, &clock);

    assert!(matches!(a.before_routing().unwrap(), PrepareOutcome::FullAnalysis(_)));
    assert_eq!(
        FileContextStore::open(&context_path)
            .get_string(FULL_GAP_ANALYSIS_KEY)
            .unwrap()
            .as_deref(),
        Some("false")
    );
    assert_eq!(b.before_routing().unwrap(), PrepareOutcome::Reloaded { gaps: 1 });
}

/// A full analysis requested by one node is run by the next node to pass.
#[test]
fn test_requested_full_analysis_seen_by_other_node() {
    let dir = tempfile::tempdir().unwrap();
    let context_path = dir.path().join("context.json");
    let source = Arc::new(MemorySequenceSource::from_parts(&[1, 2, 3], &[], &[]));
    let clock = Arc::new(ManualClock::new(t0()));

    let mut a = node(&source, &context_path, &clock);
    let mut b = node(&source, &context_path, &clock);
    a.before_routing().unwrap();
    b.before_routing().unwrap();

    a.require_full_analysis().unwrap();

    assert!(b.is_full_analysis().unwrap());
    assert!(matches!(b.before_routing().unwrap(), PrepareOutcome::FullAnalysis(_)));
    assert!(!a.is_full_analysis().unwrap());
}

/// Gap edits saved by one node are loaded by the other on its next pass.
#[test]
fn test_nodes_reload_each_pass() {
    let dir = tempfile::tempdir().unwrap();
    let context_path = dir.path().join("context.json");
    let source = Arc::new(MemorySequenceSource::from_parts(&[1, 2, 3], &[], &[]));
    let clock = Arc::new(ManualClock::new(t0()));

    let mut a = node(&source, &context_path, &clock);
    let mut b = node(&source, &context_path, &clock);
    a.before_routing().unwrap();
    b.before_routing().unwrap();

    a.before_routing().unwrap();
    a.add_observed_ids(vec![1, 2, 3]);
    a.after_routing().unwrap();

    assert_eq!(b.before_routing().unwrap(), PrepareOutcome::Reloaded { gaps: 2 });
    assert_eq!(bounds(b.gaps()), vec![(0, 0), (4, 1003)]);
}

// =============================================================================
// Busy-expire Tests
// =============================================================================

/// An expiry check by one node defers the next check on every node.
#[test]
fn test_busy_expire_timestamp_shared() {
    let dir = tempfile::tempdir().unwrap();
    let context_path = dir.path().join("context.json");
    let source = Arc::new(MemorySequenceSource::from_parts(
        &[7],
        &[],
        &[DataGap::new(5, 9, t0()), DataGap::new(20, 1019, t0())],
    ));
    let clock = Arc::new(ManualClock::new(t0()));
    let store = FileContextStore::open(&context_path);
    store.save(FULL_GAP_ANALYSIS_KEY, "false").unwrap();
    clock.advance(Duration::minutes(30));

    let mut a = node(&source, &context_path, &clock);
    let mut b = node(&source, &context_path, &clock);

    a.before_routing().unwrap();
    a.set_all_data_read(false);
    let first = a.after_routing().unwrap();
    assert_eq!(first.expire_checked, 1);
    assert_eq!(
        store.get_long(LAST_BUSY_EXPIRE_RUN_KEY).unwrap(),
        Some(clock.now().timestamp_millis())
    );

    clock.advance(Duration::minutes(1));
    b.before_routing().unwrap();
    b.set_all_data_read(false);
    let second = b.after_routing().unwrap();

    assert_eq!(second.expire_checked, 0);
    assert_eq!(source.count_queries(), 1);
}

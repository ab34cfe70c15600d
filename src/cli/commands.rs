//! CLI command implementations
//!
//! Every command works on a JSON state file holding the change log rows, the
//! routed ids and the gap table. Commands return the JSON payload that
//! `run_command` writes to stdout.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::observability::{log_event_with_fields, Event, Logger, Severity};
use crate::routing::{
    fix_overlapping_gaps, DetectorPorts, GapConfig, GapDetector, GapError, RoutingPass,
};
use crate::store::{FileContextStore, SequenceSource, StateFile};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Parse arguments and run the selected command.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    let severity = Severity::parse(&cli.log_level)
        .ok_or_else(|| CliError::invalid_argument(format!("Unknown log level: {}", cli.log_level)))?;
    Logger::set_min_severity(severity);

    match run_command(cli.command) {
        Ok(()) => Ok(()),
        Err(e) => {
            // stdout may be the thing that failed; the caller still reports on stderr
            let _ = write_error(e.code_str(), e.message());
            Err(e)
        }
    }
}

pub fn run_command(cmd: Command) -> CliResult<()> {
    let data = match cmd {
        Command::CheckConfig { config } => check_config(&config)?,
        Command::Gaps { state } => gaps(&state)?,
        Command::Route {
            config,
            state,
            context,
            passes,
        } => route(&config, &state, context.as_deref(), passes)?,
        Command::Repair { config, state } => repair(&config, &state)?,
    };
    write_response(data)
}

/// Load and validate a configuration file.
pub fn check_config(config_path: &Path) -> CliResult<Value> {
    let config = load_config(config_path)?;
    Ok(serde_json::to_value(&config)?)
}

/// List the persisted gap table.
pub fn gaps(state_path: &Path) -> CliResult<Value> {
    let state = load_state(state_path)?;
    let mut gaps = state.gaps;
    gaps.sort();
    Ok(json!({
        "count": gaps.len(),
        "gaps": gaps,
    }))
}

/// Run `passes` routing passes and persist the resulting state.
///
/// The detector resumes from the context saved by the previous run, so only
/// the first run over a state file starts with a full analysis. The state
/// file is written even when a later pass fails, since rows routed by earlier
/// passes are already recorded as routed.
pub fn route(
    config_path: &Path,
    state_path: &Path,
    context_path: Option<&Path>,
    passes: u32,
) -> CliResult<Value> {
    let config = load_config(config_path)?;
    let mut state = load_state(state_path)?;
    let resumed = state.detector.take();
    let source = Arc::new(state.into_source());

    let mut ports = DetectorPorts::in_memory(Arc::clone(&source));
    if let Some(path) = context_path {
        ports = ports.with_context_store(Arc::new(FileContextStore::open(path)));
    }
    let mut detector = GapDetector::new(config, ports);
    if let Some(context) = resumed {
        detector = detector.with_context(context);
    }
    let mut router = RoutingPass::new(detector, source.clone());

    let mut summaries = Vec::new();
    let mut failure: Option<GapError> = None;
    for _ in 0..passes {
        match router.run() {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    let detector = router.into_detector();
    let data = json!({
        "passes": summaries,
        "gaps": detector.gaps(),
        "metrics": detector.metrics().snapshot(),
    });

    save_state(
        state_path,
        StateFile::from_source(&source).with_detector(detector.into_context()),
    )?;
    if let Some(e) = failure {
        return Err(CliError::pass_failed(&e));
    }
    Ok(data)
}

/// Repair the gap table of a state file.
///
/// Any saved detector context is dropped, so the next `route` reloads the
/// repaired table with a full analysis.
pub fn repair(config_path: &Path, state_path: &Path) -> CliResult<Value> {
    let config = load_config(config_path)?;
    let source = load_state(state_path)?.into_source();

    let mut gaps = source
        .find_gaps()
        .map_err(|e| CliError::pass_failed(&e))?;
    gaps.sort();
    let edits = fix_overlapping_gaps(&mut gaps, &source, config.largest_gap_size, Utc::now())
        .map_err(|e| CliError::pass_failed(&e))?;

    save_state(state_path, StateFile::from_source(&source))?;
    Ok(json!({
        "edits": edits,
        "gaps": gaps,
    }))
}

fn load_config(path: &Path) -> CliResult<GapConfig> {
    let config = GapConfig::load(path).map_err(|e| {
        CliError::config_error(format!("Failed to load {}: {}", path.display(), e))
    })?;
    let key = path.display().to_string();
    log_event_with_fields(Event::ConfigLoaded, &[("path", key.as_str())]);
    Ok(config)
}

fn load_state(path: &Path) -> CliResult<StateFile> {
    StateFile::load(path)
        .map_err(|e| CliError::state_error(format!("Failed to load {}: {}", path.display(), e)))
}

fn save_state(path: &Path, state: StateFile) -> CliResult<()> {
    state
        .save(path)
        .map_err(|e| CliError::state_error(format!("Failed to save {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::super::errors::CliErrorCode;
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_config(temp_dir: &TempDir, config: Value) -> std::path::PathBuf {
        let config_path = temp_dir.path().join("datagap.json");
        fs::write(&config_path, config.to_string()).unwrap();
        config_path
    }

    fn create_state(temp_dir: &TempDir, state: Value) -> std::path::PathBuf {
        let state_path = temp_dir.path().join("state.json");
        fs::write(&state_path, state.to_string()).unwrap();
        state_path
    }

    #[test]
    fn test_check_config_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(&temp_dir, json!({}));

        let data = check_config(&config_path).unwrap();
        assert_eq!(data["largest_gap_size"], 50_000_000);
        assert_eq!(data["max_gap_changes"], 1000);
    }

    #[test]
    fn test_check_config_rejects_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(&temp_dir, json!({ "data_id_increment_by": 0 }));

        let result = check_config(&config_path);
        assert_eq!(result.unwrap_err().code(), &CliErrorCode::ConfigError);
    }

    #[test]
    fn test_gaps_requires_state() {
        let temp_dir = TempDir::new().unwrap();
        let result = gaps(&temp_dir.path().join("missing.json"));
        assert_eq!(result.unwrap_err().code(), &CliErrorCode::StateError);
    }

    #[test]
    fn test_route_persists_state() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(&temp_dir, json!({ "largest_gap_size": 100 }));
        let state_path = create_state(&temp_dir, json!({ "rows": [1, 2, 4] }));

        let data = route(&config_path, &state_path, None, 2).unwrap();
        assert_eq!(data["passes"].as_array().unwrap().len(), 2);

        let state = StateFile::load(&state_path).unwrap();
        assert_eq!(state.routed, vec![1, 2, 4]);
        let bounds: Vec<(i64, i64)> = state.gaps.iter().map(|g| (g.start_id, g.end_id)).collect();
        assert_eq!(bounds, vec![(0, 0), (3, 3), (5, 104)]);
    }

    #[test]
    fn test_route_resumes_after_late_commit() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(
            &temp_dir,
            json!({ "largest_gap_size": 1000, "stale_gap_timeout_ms": 0 }),
        );
        let state_path = create_state(&temp_dir, json!({ "rows": [1, 2, 3, 4, 6, 8, 9, 10] }));

        route(&config_path, &state_path, None, 1).unwrap();
        let mut state = StateFile::load(&state_path).unwrap();
        let bounds: Vec<(i64, i64)> = state.gaps.iter().map(|g| (g.start_id, g.end_id)).collect();
        assert_eq!(bounds, vec![(0, 0), (5, 5), (7, 7), (11, 1010)]);
        assert!(!state.detector.as_ref().unwrap().full_analysis);

        // row 7 commits late, after every interior gap has gone stale
        state.rows.push(7);
        state.save(&state_path).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        route(&config_path, &state_path, None, 1).unwrap();

        let state = StateFile::load(&state_path).unwrap();
        assert_eq!(state.routed, (1..=10).collect::<Vec<i64>>());
    }

    #[test]
    fn test_repair_drops_saved_context() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(&temp_dir, json!({ "largest_gap_size": 100 }));
        let state_path = create_state(&temp_dir, json!({ "rows": [1, 2, 4] }));

        route(&config_path, &state_path, None, 1).unwrap();
        assert!(StateFile::load(&state_path).unwrap().detector.is_some());

        repair(&config_path, &state_path).unwrap();
        assert!(StateFile::load(&state_path).unwrap().detector.is_none());
    }

    #[test]
    fn test_route_with_shared_context() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(
            &temp_dir,
            json!({ "largest_gap_size": 100, "cluster_locking_enabled": true }),
        );
        let state_path = create_state(&temp_dir, json!({ "rows": [1, 2, 3] }));
        let context_path = temp_dir.path().join("context.json");

        route(&config_path, &state_path, Some(&context_path), 1).unwrap();

        let context: Value =
            serde_json::from_str(&fs::read_to_string(&context_path).unwrap()).unwrap();
        assert_eq!(context["routing.full.gap.analysis"], "false");
    }

    #[test]
    fn test_repair_merges_overlaps() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(&temp_dir, json!({ "largest_gap_size": 100 }));
        let created = "2024-01-01T00:00:00Z";
        let state_path = create_state(
            &temp_dir,
            json!({
                "gaps": [
                    { "start_id": 1, "end_id": 10, "create_time": created },
                    { "start_id": 5, "end_id": 15, "create_time": created },
                    { "start_id": 16, "end_id": 115, "create_time": created }
                ]
            }),
        );

        let data = repair(&config_path, &state_path).unwrap();
        assert_eq!(data["edits"], 1);

        let state = StateFile::load(&state_path).unwrap();
        let bounds: Vec<(i64, i64)> = state.gaps.iter().map(|g| (g.start_id, g.end_id)).collect();
        assert_eq!(bounds, vec![(1, 15), (16, 115)]);
    }
}

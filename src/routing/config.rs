//! Gap detector configuration
//!
//! Loaded from a JSON file; every key is optional and falls back to the
//! defaults below. Configuration is read once per process and is immutable
//! for the lifetime of a detector.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::{GapError, GapResult};

/// Gap detection and routing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapConfig {
    /// Maximum gap window. The open-ended trailing gap always extends this
    /// far past the highest routed id.
    #[serde(default = "default_largest_gap_size")]
    pub largest_gap_size: i64,

    /// Validate gaps before accepting them and repair overlapping gaps on load.
    #[serde(default = "default_true")]
    pub detect_invalid_gaps: bool,

    /// Step between consecutive data ids assigned by the store.
    #[serde(default = "default_increment_by")]
    pub data_id_increment_by: i64,

    /// Wall-clock age after which an empty gap is considered abandoned when
    /// the store cannot report open transactions.
    #[serde(default = "default_stale_gap_timeout_ms")]
    pub stale_gap_timeout_ms: i64,

    /// Minimum interval between expiry checks on passes that did not read
    /// the whole id space.
    #[serde(default = "default_busy_expire_ms")]
    pub stale_gap_busy_expire_ms: i64,

    /// Edit count above which gap saves collapse the registry into one
    /// spanning row.
    #[serde(default = "default_max_gap_changes")]
    pub max_gap_changes: usize,

    /// Multiple processes route against the same store.
    #[serde(default)]
    pub cluster_locking_enabled: bool,

    /// Clock skew tolerated between this process and the store when comparing
    /// gap creation times against open transaction start times.
    #[serde(default = "default_clock_sync_threshold_ms")]
    pub transaction_view_clock_sync_threshold_ms: i64,

    /// Row budget for a single routing pass.
    #[serde(default = "default_max_rows_per_pass")]
    pub max_rows_per_pass: usize,
}

fn default_largest_gap_size() -> i64 {
    50_000_000
}
fn default_true() -> bool {
    true
}
fn default_increment_by() -> i64 {
    1
}
fn default_stale_gap_timeout_ms() -> i64 {
    1_200_000
} // 20 minutes
fn default_busy_expire_ms() -> i64 {
    1_200_000
}
fn default_max_gap_changes() -> usize {
    1000
}
fn default_clock_sync_threshold_ms() -> i64 {
    60_000
}
fn default_max_rows_per_pass() -> usize {
    100_000
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            largest_gap_size: default_largest_gap_size(),
            detect_invalid_gaps: true,
            data_id_increment_by: default_increment_by(),
            stale_gap_timeout_ms: default_stale_gap_timeout_ms(),
            stale_gap_busy_expire_ms: default_busy_expire_ms(),
            max_gap_changes: default_max_gap_changes(),
            cluster_locking_enabled: false,
            transaction_view_clock_sync_threshold_ms: default_clock_sync_threshold_ms(),
            max_rows_per_pass: default_max_rows_per_pass(),
        }
    }
}

impl GapConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load(path: &Path) -> GapResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            GapError::configuration(format!("Failed to read config {:?}: {}", path, e))
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string and validate it.
    pub fn from_json(content: &str) -> GapResult<Self> {
        let config: GapConfig = serde_json::from_str(content)
            .map_err(|e| GapError::configuration(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges.
    pub fn validate(&self) -> GapResult<()> {
        if self.largest_gap_size < 2 {
            return Err(GapError::configuration("largest_gap_size must be >= 2"));
        }
        if self.data_id_increment_by < 1 {
            return Err(GapError::configuration("data_id_increment_by must be >= 1"));
        }
        if self.stale_gap_timeout_ms < 0 {
            return Err(GapError::configuration("stale_gap_timeout_ms must be >= 0"));
        }
        if self.stale_gap_busy_expire_ms < 0 {
            return Err(GapError::configuration(
                "stale_gap_busy_expire_ms must be >= 0",
            ));
        }
        if self.transaction_view_clock_sync_threshold_ms < 0 {
            return Err(GapError::configuration(
                "transaction_view_clock_sync_threshold_ms must be >= 0",
            ));
        }
        if self.max_gap_changes == 0 {
            return Err(GapError::configuration("max_gap_changes must be > 0"));
        }
        if self.max_rows_per_pass == 0 {
            return Err(GapError::configuration("max_rows_per_pass must be > 0"));
        }
        Ok(())
    }

    /// Lower bound of the "suspiciously large" gap size band.
    pub fn suspicious_gap_size(&self) -> i64 {
        (self.largest_gap_size as f64 * 0.75) as i64
    }
}

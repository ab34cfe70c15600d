//! File-backed context store and state snapshots
//!
//! Both files are whole-document JSON. Writes go to a sibling temp file that
//! is fsynced and renamed over the target, so a crash leaves either the old
//! or the new document.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::memory::MemorySequenceSource;
use super::traits::ContextStore;
use crate::routing::{DataGap, DetectorContext, GapResult};

fn write_atomic(path: &Path, content: &[u8]) -> GapResult<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Context store persisted as a JSON object of string values.
///
/// The file is re-read on every lookup so that values saved by another
/// process are observed.
#[derive(Debug, Clone)]
pub struct FileContextStore {
    path: PathBuf,
}

impl FileContextStore {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> GapResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }
}

impl ContextStore for FileContextStore {
    fn get_string(&self, key: &str) -> GapResult<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn save(&self, key: &str, value: &str) -> GapResult<()> {
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        write_atomic(&self.path, &serde_json::to_vec_pretty(&values)?)
    }
}

/// Snapshot of a change log, its gap table and the detector context of the
/// last routing run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    /// Committed change row ids
    #[serde(default)]
    pub rows: Vec<i64>,
    /// Ids already routed
    #[serde(default)]
    pub routed: Vec<i64>,
    /// Persisted gap table
    #[serde(default)]
    pub gaps: Vec<DataGap>,
    /// Detector context to resume from; absent means the next run starts
    /// with a full analysis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector: Option<DetectorContext>,
}

impl StateFile {
    pub fn load(path: &Path) -> GapResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> GapResult<()> {
        write_atomic(path, &serde_json::to_vec_pretty(self)?)
    }

    pub fn into_source(self) -> MemorySequenceSource {
        MemorySequenceSource::from_parts(&self.rows, &self.routed, &self.gaps)
    }

    pub fn from_source(source: &MemorySequenceSource) -> Self {
        Self {
            rows: source.rows(),
            routed: source.routed_ids(),
            gaps: source.persisted_gaps(),
            detector: None,
        }
    }

    pub fn with_detector(mut self, context: DetectorContext) -> Self {
        self.detector = Some(context);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_context_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("context.json");

        let store = FileContextStore::open(&path);
        assert_eq!(store.get_bool("routing.full.gap.analysis").unwrap(), None);
        store.save("routing.full.gap.analysis", "false").unwrap();
        store.save("routing.last.busy.expire.run.time", "42").unwrap();

        let reopened = FileContextStore::open(&path);
        assert_eq!(
            reopened.get_bool("routing.full.gap.analysis").unwrap(),
            Some(false)
        );
        assert_eq!(
            reopened.get_long("routing.last.busy.expire.run.time").unwrap(),
            Some(42)
        );
    }

    #[test]
    fn test_context_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("context.json");
        fs::write(&path, "{broken").unwrap();

        let store = FileContextStore::open(&path);
        assert!(store.get_string("anything").is_err());
    }

    #[test]
    fn test_state_file_round_trip_through_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let state = StateFile {
            rows: vec![1, 2, 3],
            routed: vec![1],
            gaps: vec![DataGap::new(2, 100, Utc::now())],
            detector: None,
        };
        state.save(&path).unwrap();

        let source = StateFile::load(&path).unwrap().into_source();
        assert_eq!(source.rows(), vec![1, 2, 3]);
        assert_eq!(source.routed_ids(), vec![1]);
        assert_eq!(StateFile::from_source(&source), state);
    }

    #[test]
    fn test_state_file_keeps_detector_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let context = DetectorContext {
            gaps: Some(vec![DataGap::new(5, 5, Utc::now()), DataGap::new(11, 110, Utc::now())]),
            full_analysis: false,
            ..DetectorContext::default()
        };

        StateFile::from_source(&MemorySequenceSource::new())
            .with_detector(context.clone())
            .save(&path)
            .unwrap();

        assert_eq!(StateFile::load(&path).unwrap().detector, Some(context));
    }
}

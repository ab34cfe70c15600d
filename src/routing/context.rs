//! Detector context
//!
//! The state a gap detector carries from one pass to the next. Two of its
//! fields are shared between cooperating processes when cluster locking is
//! enabled; those are read through and written through the context store
//! instead of being trusted from memory.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::errors::GapResult;
use super::gap::DataGap;
use super::persistence::PersistMode;
use crate::store::ContextStore;

/// Context store key for the shared full-analysis flag.
pub const FULL_GAP_ANALYSIS_KEY: &str = "routing.full.gap.analysis";

/// Context store key for the shared busy-expire timestamp (epoch millis).
pub const LAST_BUSY_EXPIRE_RUN_KEY: &str = "routing.last.busy.expire.run.time";

/// Cross-pass detector state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorContext {
    /// Cached registry, sorted ascending. `None` until first loaded.
    pub gaps: Option<Vec<DataGap>>,
    /// Next pass must reload and re-verify every gap.
    pub full_analysis: bool,
    /// Last time an expiry check ran on a partially read pass.
    pub last_busy_expire_run: Option<DateTime<Utc>>,
    /// Representation currently held by the gap table.
    pub persist_mode: PersistMode,
}

impl Default for DetectorContext {
    fn default() -> Self {
        Self {
            gaps: None,
            full_analysis: true,
            last_busy_expire_run: None,
            persist_mode: PersistMode::FineGrained,
        }
    }
}

/// Reads and writes the shared flags of a [`DetectorContext`].
///
/// Without cluster locking the in-memory value is authoritative and the store
/// is never touched.
pub struct SharedFlags<'a> {
    store: &'a dyn ContextStore,
    clustered: bool,
}

impl<'a> SharedFlags<'a> {
    pub fn new(store: &'a dyn ContextStore, clustered: bool) -> Self {
        Self { store, clustered }
    }

    /// Refresh `full_analysis` from the store and return it.
    ///
    /// A missing key means no process has completed a pass yet.
    pub fn full_analysis(&self, context: &mut DetectorContext) -> GapResult<bool> {
        if self.clustered {
            context.full_analysis = self.store.get_bool(FULL_GAP_ANALYSIS_KEY)?.unwrap_or(true);
        }
        Ok(context.full_analysis)
    }

    pub fn set_full_analysis(&self, context: &mut DetectorContext, value: bool) -> GapResult<()> {
        if self.clustered {
            self.store.save(FULL_GAP_ANALYSIS_KEY, &value.to_string())?;
        }
        context.full_analysis = value;
        Ok(())
    }

    /// Refresh `last_busy_expire_run` from the store and return it.
    ///
    /// Zero and a missing key both mean never.
    pub fn last_busy_expire_run(
        &self,
        context: &mut DetectorContext,
    ) -> GapResult<Option<DateTime<Utc>>> {
        if self.clustered {
            context.last_busy_expire_run = match self.store.get_long(LAST_BUSY_EXPIRE_RUN_KEY)? {
                Some(millis) if millis > 0 => Utc.timestamp_millis_opt(millis).single(),
                _ => None,
            };
        }
        Ok(context.last_busy_expire_run)
    }

    pub fn set_last_busy_expire_run(
        &self,
        context: &mut DetectorContext,
        at: DateTime<Utc>,
    ) -> GapResult<()> {
        if self.clustered {
            self.store
                .save(LAST_BUSY_EXPIRE_RUN_KEY, &at.timestamp_millis().to_string())?;
        }
        context.last_busy_expire_run = Some(at);
        Ok(())
    }
}

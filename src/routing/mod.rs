//! Data gap detection for change routing
//!
//! Change rows get monotonically increasing data ids, but concurrent
//! transactions commit out of id order. Remembering the last routed id would
//! skip late commits, so the router instead re-scans a registry of gaps:
//! sorted, non-overlapping id ranges not yet confirmed routed, the last of
//! which is open-ended and always covers future ids.
//!
//! - `gap`: the gap type and validation of newly detected gaps
//! - `mapper`: partitioning observed ids into per-gap buckets
//! - `repair`: fixing overlapping and stray gaps on load
//! - `persistence`: writing a pass's edits, fine-grained or bulk
//! - `context`: state carried between passes and the cluster-shared flags
//! - `detector`: the per-pass state machine
//! - `router`: a routing pass driving the detector

mod config;
mod context;
mod detector;
mod errors;
mod gap;
mod mapper;
mod persistence;
mod repair;
pub mod router;

pub use config::GapConfig;
pub use context::{DetectorContext, SharedFlags, FULL_GAP_ANALYSIS_KEY, LAST_BUSY_EXPIRE_RUN_KEY};
pub use detector::{DetectorPorts, GapDetector, PassSummary, PrepareOutcome};
pub use errors::{GapError, GapResult};
pub use gap::{validate_new_gap, DataGap, GapRejection};
pub use mapper::map_ids_to_gaps;
pub use persistence::{choose_strategy, save_gaps, GapEdits, PersistMode, SaveOutcome, SaveStrategy};
pub use repair::{fix_overlapping_gaps, plan_repairs, RepairAction, RepairPlan};
pub use router::{PrepareKind, RouteSummary, RoutingPass};

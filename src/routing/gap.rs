//! Data gap type
//!
//! A gap is an inclusive range of data ids that has not yet been confirmed to
//! contain only routed rows. Identity and ordering are by `(start_id, end_id)`;
//! the creation time is carried along but never compared.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive range of data ids `[start_id, end_id]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataGap {
    pub start_id: i64,
    pub end_id: i64,
    pub create_time: DateTime<Utc>,
}

impl DataGap {
    /// Create a gap. Malformed ranges (`start_id > end_id`) are representable
    /// so that validation can reject them.
    pub fn new(start_id: i64, end_id: i64, create_time: DateTime<Utc>) -> Self {
        Self {
            start_id,
            end_id,
            create_time,
        }
    }

    /// `end_id - start_id`
    pub fn size(&self) -> i64 {
        self.end_id - self.start_id
    }

    pub fn contains(&self, id: i64) -> bool {
        id >= self.start_id && id <= self.end_id
    }

    /// Whether the two inclusive ranges share at least one id.
    pub fn overlaps(&self, other: &DataGap) -> bool {
        self.start_id <= other.end_id && other.start_id <= self.end_id
    }

    pub fn is_malformed(&self) -> bool {
        self.start_id > self.end_id
    }

    fn key(&self) -> (i64, i64) {
        (self.start_id, self.end_id)
    }
}

impl PartialEq for DataGap {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for DataGap {}

impl Hash for DataGap {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for DataGap {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataGap {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for DataGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start_id, self.end_id)
    }
}

/// Reason a newly detected gap was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapRejection {
    /// An identical range is already known
    Duplicate,
    /// `start_id > end_id`
    Malformed,
    /// Size in `[0.75 * window, window - 1)`, a likely detection defect
    Oversized,
}

impl GapRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapRejection::Duplicate => "DUPLICATE",
            GapRejection::Malformed => "MALFORMED",
            GapRejection::Oversized => "OVERSIZED",
        }
    }
}

impl fmt::Display for GapRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Check a newly detected gap against the current registry.
///
/// The open-ended trailing gap has size `largest_gap_size - 1` and sits just
/// outside the oversized band.
pub fn validate_new_gap(
    gap: &DataGap,
    known: &BTreeSet<DataGap>,
    largest_gap_size: i64,
    suspicious_gap_size: i64,
) -> Result<(), GapRejection> {
    if known.contains(gap) {
        return Err(GapRejection::Duplicate);
    }
    if gap.is_malformed() {
        return Err(GapRejection::Malformed);
    }
    let size = gap.size();
    if size < largest_gap_size - 1 && size >= suspicious_gap_size {
        return Err(GapRejection::Oversized);
    }
    Ok(())
}

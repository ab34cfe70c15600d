//! Observable gap detection events
//!
//! Events are explicit and typed; the string form is what appears in the
//! `event` field of a log line.

use std::fmt;

/// Observable events of the gap detector and router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Configuration loaded and validated
    ConfigLoaded,

    // Registry load
    /// Gap registry read from the sequence source
    GapsLoaded,
    /// Empty registry seeded with an open-ended gap
    GapsSeeded,
    /// Ids inside all gaps queried for a full analysis
    GapIdsQueried,
    /// Id query for one gap was slow
    GapQuerySlow,

    // Overlap repair
    /// Loaded registry scanned for overlaps
    GapOverlapScan,
    /// Gap after the logical last gap removed
    GapTrailingRemoved,
    /// Two overlapping gaps merged
    GapOverlapRepaired,

    // Reconciliation
    /// Id-to-gap mapping was slow
    GapMappingSlow,
    /// Reconciliation progress report
    GapProgress,
    /// Empty gap expired and removed
    GapExpired,
    /// Newly detected gap refused by validation
    GapRejected,
    /// Registry and working sets at the time of a rejection
    GapRejectedContext,
    /// Open-ended trailing gap opened
    GapTrailingOpened,

    // Persistence
    /// Switched from fine-grained to bulk persistence
    GapPersistBulk,
    /// Switched from bulk back to fine-grained persistence
    GapPersistFineGrained,
    /// Gap edits committed
    GapsSaved,
    /// Rollback after a failed edit itself failed
    GapRollbackFailed,

    // Pass lifecycle
    /// Detection pass finished
    GapPassComplete,
    /// Detection pass was slow
    GapPassSlow,
    /// Detection pass aborted
    GapPassFailed,

    // Process tracking
    /// Tracked process changed status
    ProcessStatusChanged,

    // Router
    /// Routing pass finished
    RoutePassComplete,
    /// Routing pass aborted
    RoutePassFailed,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::GapsLoaded => "GAPS_LOADED",
            Event::GapsSeeded => "GAPS_SEEDED",
            Event::GapIdsQueried => "GAP_IDS_QUERIED",
            Event::GapQuerySlow => "GAP_QUERY_SLOW",

            Event::GapOverlapScan => "GAP_OVERLAP_SCAN",
            Event::GapTrailingRemoved => "GAP_TRAILING_REMOVED",
            Event::GapOverlapRepaired => "GAP_OVERLAP_REPAIRED",

            Event::GapMappingSlow => "GAP_MAPPING_SLOW",
            Event::GapProgress => "GAP_PROGRESS",
            Event::GapExpired => "GAP_EXPIRED",
            Event::GapRejected => "GAP_REJECTED",
            Event::GapRejectedContext => "GAP_REJECTED_CONTEXT",
            Event::GapTrailingOpened => "GAP_TRAILING_OPENED",

            Event::GapPersistBulk => "GAP_PERSIST_MODE_BULK",
            Event::GapPersistFineGrained => "GAP_PERSIST_MODE_FINE_GRAINED",
            Event::GapsSaved => "GAPS_SAVED",
            Event::GapRollbackFailed => "GAP_ROLLBACK_FAILED",

            Event::GapPassComplete => "GAP_PASS_COMPLETE",
            Event::GapPassSlow => "GAP_PASS_SLOW",
            Event::GapPassFailed => "GAP_PASS_FAILED",

            Event::ProcessStatusChanged => "PROCESS_STATUS",

            Event::RoutePassComplete => "ROUTE_PASS_COMPLETE",
            Event::RoutePassFailed => "ROUTE_PASS_FAILED",
        }
    }

    /// Events that indicate the pass did not complete.
    pub fn is_failure(&self) -> bool {
        matches!(self, Event::GapPassFailed | Event::RoutePassFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_uppercase() {
        let events = [
            Event::ConfigLoaded,
            Event::GapsLoaded,
            Event::GapsSeeded,
            Event::GapIdsQueried,
            Event::GapQuerySlow,
            Event::GapOverlapScan,
            Event::GapTrailingRemoved,
            Event::GapOverlapRepaired,
            Event::GapMappingSlow,
            Event::GapProgress,
            Event::GapExpired,
            Event::GapRejected,
            Event::GapRejectedContext,
            Event::GapTrailingOpened,
            Event::GapPersistBulk,
            Event::GapPersistFineGrained,
            Event::GapsSaved,
            Event::GapRollbackFailed,
            Event::GapPassComplete,
            Event::GapPassSlow,
            Event::GapPassFailed,
            Event::ProcessStatusChanged,
            Event::RoutePassComplete,
            Event::RoutePassFailed,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_failure_events() {
        assert!(Event::GapPassFailed.is_failure());
        assert!(Event::RoutePassFailed.is_failure());
        assert!(!Event::GapsSaved.is_failure());
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::GapRejected), "GAP_REJECTED");
        assert_eq!(Event::ProcessStatusChanged.as_str(), "PROCESS_STATUS");
        assert_eq!(Event::GapRollbackFailed.as_str(), "GAP_ROLLBACK_FAILED");
    }
}

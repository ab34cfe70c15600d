//! Process status tracking
//!
//! Each detection or routing phase gets a tracked [`ProcessInfo`] whose status
//! and processed-row counter can be inspected while it runs. Tracking is
//! fire-and-forget: nothing here can fail the caller.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::events::Event;
use super::logger::Logger;

/// What a tracked process is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessKind {
    GapDetect,
    Routing,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::GapDetect => "GAP_DETECT",
            ProcessKind::Routing => "ROUTING",
        }
    }
}

/// Lifecycle status of a tracked process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    /// Created, not yet reporting
    New,
    /// Reading from the store
    Querying,
    /// Working on data already read
    Processing,
    Ok,
    Error,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::New => "NEW",
            ProcessStatus::Querying => "QUERYING",
            ProcessStatus::Processing => "PROCESSING",
            ProcessStatus::Ok => "OK",
            ProcessStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tracked process handle.
#[derive(Debug)]
pub struct ProcessInfo {
    id: Uuid,
    kind: ProcessKind,
    started: DateTime<Utc>,
    status: Mutex<ProcessStatus>,
    processed: AtomicU64,
}

impl ProcessInfo {
    fn new(kind: ProcessKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            started: Utc::now(),
            status: Mutex::new(ProcessStatus::New),
            processed: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    pub fn status(&self) -> ProcessStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_status(&self, status: ProcessStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
        let id = self.id.to_string();
        Logger::trace(
            Event::ProcessStatusChanged.as_str(),
            &[
                ("id", id.as_str()),
                ("kind", self.kind.as_str()),
                ("status", status.as_str()),
            ],
        );
    }

    pub fn increment_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_processed(&self, count: u64) {
        self.processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            id: self.id,
            kind: self.kind,
            started: self.started,
            status: self.status(),
            processed: self.processed(),
        }
    }
}

/// Point-in-time copy of a [`ProcessInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessSnapshot {
    pub id: Uuid,
    pub kind: ProcessKind,
    pub started: DateTime<Utc>,
    pub status: ProcessStatus,
    pub processed: u64,
}

/// Keeps the most recent tracked processes.
#[derive(Debug)]
pub struct ProcessTracker {
    recent: Mutex<VecDeque<Arc<ProcessInfo>>>,
    capacity: usize,
}

impl ProcessTracker {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Start tracking a new process.
    pub fn start(&self, kind: ProcessKind) -> Arc<ProcessInfo> {
        let info = Arc::new(ProcessInfo::new(kind));
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(Arc::clone(&info));
        info
    }

    /// Most recent processes, oldest first.
    pub fn recent(&self) -> Vec<ProcessSnapshot> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|info| info.snapshot())
            .collect()
    }

    pub fn last(&self) -> Option<ProcessSnapshot> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .back()
            .map(|info| info.snapshot())
    }
}

impl Default for ProcessTracker {
    fn default() -> Self {
        Self::new()
    }
}

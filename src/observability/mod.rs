//! Observability for gap detection
//!
//! - Structured JSON logging
//! - Typed lifecycle events
//! - Scoped begin/complete logging and timers
//! - Counters
//! - Per-phase process status tracking
//!
//! Observability is read-only: nothing here can fail or alter a pass.
//!
//! ```ignore
//! use datagap::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::GapsLoaded, &[("gaps", "12")]);
//! ```

mod events;
mod logger;
mod metrics;
mod process;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use process::{ProcessInfo, ProcessKind, ProcessSnapshot, ProcessStatus, ProcessTracker};
pub use scope::{ObservationScope, Timer};

/// Log a lifecycle event
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_failure() {
        Severity::Error
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}

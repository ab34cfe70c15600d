//! Observation scopes and timers
//!
//! A scope logs `{name}_BEGIN` on creation and exactly one of
//! `{name}_COMPLETE`, `{name}_FAILED` or `{name}_INCOMPLETE` (on drop).

use std::cell::Cell;
use std::time::{Duration, Instant};

use super::logger::Logger;

/// Logs the start and end of a long-running phase.
///
/// ```ignore
/// let scope = ObservationScope::new("GAP_FULL_ANALYSIS");
/// // ... do work ...
/// scope.complete_with_fields(&[("gaps", "12")]);
/// ```
pub struct ObservationScope<'a> {
    name: &'a str,
    completed: Cell<bool>,
    timer: Timer,
}

impl<'a> ObservationScope<'a> {
    pub fn new(name: &'a str) -> Self {
        Logger::info(&format!("{}_BEGIN", name), &[]);
        Self {
            name,
            completed: Cell::new(false),
            timer: Timer::new(),
        }
    }

    /// Logs `{name}_COMPLETE` with the elapsed time.
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    /// Logs `{name}_COMPLETE` with the elapsed time and extra fields.
    pub fn complete_with_fields(self, extra_fields: &[(&str, &str)]) {
        self.completed.set(true);
        let elapsed = self.timer.elapsed_ms().to_string();
        let mut fields: Vec<(&str, &str)> = vec![("elapsed_ms", elapsed.as_str())];
        fields.extend(extra_fields.iter().copied());
        Logger::info(&format!("{}_COMPLETE", self.name), &fields);
    }

    /// Logs `{name}_FAILED` at ERROR level.
    pub fn fail(self, reason: &str) {
        self.completed.set(true);
        let elapsed = self.timer.elapsed_ms().to_string();
        Logger::error(
            &format!("{}_FAILED", self.name),
            &[("elapsed_ms", elapsed.as_str()), ("reason", reason)],
        );
    }

    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.completed.get() {
            Logger::warn(
                &format!("{}_INCOMPLETE", self.name),
                &[("reason", "scope dropped without completion")],
            );
        }
    }
}

/// Elapsed-time measurement.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Whether more than `threshold_ms` has passed.
    pub fn exceeded(&self, threshold_ms: u64) -> bool {
        self.elapsed_ms() > threshold_ms
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

//! datagap - self-correcting data id gap detection for change routing
//!
//! - `routing`: gap registry, detector, persistence strategy and routing pass
//! - `store`: ports to the change log, context store and capability probe
//! - `observability`: structured logging, counters and process tracking
//! - `cli`: the `datagap` command line

pub mod cli;
pub mod observability;
pub mod routing;
pub mod store;

//! Store ports and reference implementations
//!
//! The gap detector never talks to a database directly. It goes through:
//! - [`SequenceSource`]: change log queries and transactional gap table edits
//! - [`ChangeLog`]: the router's view of change rows
//! - [`ContextStore`]: flags shared between cooperating processes
//! - [`CapabilityProbe`]: open-transaction visibility and store time
//! - [`Clock`]: local wall time

mod clock;
mod file;
mod memory;
mod traits;

pub use clock::{ManualClock, SystemClock};
pub use file::{FileContextStore, StateFile};
pub use memory::{Fault, MemoryContextStore, MemoryGapTransaction, MemorySequenceSource, StaticProbe};
pub use traits::{CapabilityProbe, ChangeLog, Clock, ContextStore, GapTransaction, SequenceSource};

//! Vireo Time-Travel Debugging
//!
//! A record/replay event log over the engine substrate:
//! - Log entries: a tagged payload per host-visible action, with an
//!   entry-level completion status and result value
//! - Block-chunked event list with O(1) append and front drain
//! - Mode stack (record / replay / replay-debugger plus orthogonal flags)
//! - Call-stack shadow for time-to-location mapping and breakpoints
//! - Heap snapshots with fast/slow inflate back into a thread context
//! - Replay dispatch with divergence detection
//! - Binary log persistence with a SHA-256 integrity trailer
//!
//! Everything here is strictly single-threaded per thread context; there is
//! no internal locking.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::needless_return)]
#![allow(clippy::too_many_arguments)]

pub mod breakpoints;
pub mod callstack;
pub mod events;
pub mod list;
pub mod log;
pub mod mode;
pub mod persist;
pub mod replay;
pub mod snapshot;
pub mod var;

pub use breakpoints::{Breakpoint, BreakpointManager, SkippedHit};
pub use callstack::{CallStackShadow, ReturnLocation, SingleCallCounter};
pub use events::{ActionStatus, ActionToken, EventLogEntry, EventPayload};
pub use list::{TtEventList, BLOCK_CAPACITY};
pub use log::EventLog;
pub use mode::{BaseMode, ModeFlag, ModeStack};
pub use persist::{emit_log, parse_log, LogFormatError, LogHeader, ParsedLog};
pub use replay::{ReplayError, WrapperDiscipline};
pub use snapshot::{ContextSnapshot, HeapSnapshot};
pub use var::TtdVar;

//! Vireo JIT RPC Surface
//!
//! Everything both sides of the out-of-process JIT boundary agree on:
//! - Generation-checked context handles
//! - Result status codes
//! - The portable bytecode carried inside work items
//! - Work item and JIT output structures
//! - Request/response messages and wire framing

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bytecode;
pub mod framing;
pub mod handle;
pub mod messages;
pub mod status;
pub mod workitem;

pub use bytecode::{JitBody, JitOp};
pub use framing::{read_frame, write_frame, TransportError, MAX_FRAME_LEN};
pub use handle::{RawHandle, ScriptContextHandle, ThreadContextHandle};
pub use messages::{Request, Response};
pub use status::Status;
pub use workitem::{
    CodeGenWorkItem, InlineCacheDescriptor, JitOutput, NumberPageSegment, ScriptContextData,
    ThreadContextData,
};

//! Vireo Engine Substrate
//!
//! Shared runtime state consumed by both the out-of-process JIT subsystem
//! and the time-travel-debugging event log:
//! - Tagged runtime values
//! - Object model (plain objects, arrays, buffers, functions, errors)
//! - Script contexts (one per global realm) and the owning thread context
//! - Property-record interning (stable property ids across processes)
//! - Host stream abstraction for log persistence

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::needless_return)]

pub mod context;
pub mod object;
pub mod property;
pub mod source;
pub mod stream;
pub mod value;

pub use context::{ScriptContext, ScriptContextId, ThreadContext};
pub use object::{ErrorKind, JsObject, ObjectId, ObjectKind, TypedArrayInfo};
pub use property::{PropertyId, PropertyRecord, PropertyTable};
pub use source::{FunctionSource, SourceContextId, SourceOrigin};
pub use stream::{FileStreamProvider, MemoryStreamProvider, StreamProvider, TraceLogger};
pub use value::JsValue;

/// Engine-level errors shared by both subsystems
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An object id did not resolve in the owning script context
    #[error("Unknown object id: {0}")]
    UnknownObject(u64),

    /// A script context id did not resolve in the thread context
    #[error("Unknown script context: {0}")]
    UnknownContext(u32),

    /// A property id was used before being interned
    #[error("Unknown property id: {0}")]
    UnknownProperty(u32),

    /// Operation applied to a value of the wrong kind
    #[error("Type error: {0}")]
    TypeError(String),

    /// Stream open/read/write failure in the host stream provider
    #[error("Stream error: {0}")]
    Stream(#[from] std::io::Error),
}

/// Engine result alias
pub type EngineResult<T> = Result<T, EngineError>;

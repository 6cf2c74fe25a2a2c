//! Vireo JIT Server
//!
//! Server-process half of the out-of-process JIT split:
//! - Context registry (process-wide directory of live contexts)
//! - Server thread/script contexts mirroring client state
//! - Call guard converting every failure into a discrete status code
//! - Remote code generation with pluggable backends
//! - Socket server loop with connection rundown

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::needless_return)]

pub mod backend;
pub mod codespace;
pub mod guard;
pub mod process;
pub mod registry;
pub mod script_context;
pub mod server;
pub mod service;
pub mod thread_context;

pub use backend::{CodegenBackend, CodegenError, CompileContext, CompiledCode, TemplateBackend};
pub use codespace::{AllocationKind, CodeSpace, PRE_RESERVED_REGION_SIZE};
pub use process::{LocalProcessProbe, ProcessProbe, ScriptedProbe};
pub use registry::ContextRegistry;
pub use script_context::ServerScriptContext;
pub use server::JitServer;
pub use service::JitService;
pub use thread_context::ServerThreadContext;

use vireo_jit_proto::Status;

/// Failure inside a guarded call body. The call guard translates these to
/// wire statuses; nothing above the guard sees them.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Null, stale, or malformed handle/argument
    #[error("Invalid argument")]
    InvalidArg,

    /// Context closed before or during the call
    #[error("Context closed")]
    AccessDenied,

    /// Allocation failed (code region exhausted)
    #[error("Out of memory")]
    OutOfMemory,

    /// Stack exhaustion sentinel
    #[error("Out of stack")]
    OutOfStack,

    /// Operation aborted server-side
    #[error("Aborted")]
    Aborted,

    /// Code generation failed
    #[error("Codegen error: {0}")]
    Codegen(#[from] backend::CodegenError),
}

impl ServiceError {
    /// The wire status this failure reports
    pub fn to_status(&self) -> Status {
        match self {
            ServiceError::InvalidArg => Status::InvalidArg,
            ServiceError::AccessDenied => Status::AccessDenied,
            ServiceError::OutOfMemory => Status::OutOfMemory,
            ServiceError::OutOfStack => Status::OutOfStack,
            ServiceError::Aborted => Status::Aborted,
            ServiceError::Codegen(CodegenError::MalformedBody(_)) => Status::InvalidArg,
            ServiceError::Codegen(_) => Status::Fail,
        }
    }
}

/// Result alias for guarded call bodies
pub type ServiceResult<T> = Result<T, ServiceError>;

//! Backend-agnostic code generation traits

use vireo_jit_proto::bytecode::{BodyError, JitBody};
use vireo_jit_proto::workitem::InlineCacheDescriptor;

/// Error during code generation
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// Backend-internal failure
    #[error("Backend error: {0}")]
    BackendError(String),
    /// The body uses an operation this backend cannot lower
    #[error("Unsupported operation: {0}")]
    UnsupportedOp(String),
    /// The body failed validation before lowering
    #[error("Malformed body: {0}")]
    MalformedBody(#[from] BodyError),
}

/// Per-call compilation inputs beyond the body itself
pub struct CompileContext<'a> {
    /// Inline caches the body's property ops index into
    pub inline_caches: &'a [InlineCacheDescriptor],
    /// Client-space global-`this` address recorded on the script context
    pub global_this_addr: u64,
    /// Constants resident in the work item's number page, if any
    pub page_constants: &'a [f64],
}

/// Position-independent compiled code, not yet placed in client space
#[derive(Debug, Clone)]
pub struct CompiledCode {
    /// Machine (or template) code bytes
    pub code: Vec<u8>,
    /// Entry point offset within the bytes
    pub entry_offset: u32,
    /// Prolog length for the client's unwinder
    pub prolog_size: u32,
    /// Frame size the code establishes
    pub frame_size: u32,
}

/// The backend-agnostic code generation trait
pub trait CodegenBackend: Send + Sync {
    /// Backend name (for diagnostics and output attribution)
    fn name(&self) -> &str;

    /// Compile one body. Implementations must validate the body against
    /// the compile context before lowering.
    fn compile(&self, body: &JitBody, ctx: &CompileContext<'_>)
        -> Result<CompiledCode, CodegenError>;
}

//! Code generation backends
//!
//! The service compiles through the `CodegenBackend` seam. The template
//! backend is always available and fully deterministic; the Cranelift
//! backend (behind the `jit` feature) produces real native code for the
//! arithmetic subset.

pub mod template;
pub mod traits;

#[cfg(feature = "jit")]
pub mod cranelift;

pub use template::TemplateBackend;
pub use traits::{CodegenBackend, CodegenError, CompileContext, CompiledCode};

#[cfg(feature = "jit")]
pub use cranelift::CraneliftBackend;

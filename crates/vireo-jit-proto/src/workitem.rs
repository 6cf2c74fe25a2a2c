//! Work items and JIT output
//!
//! A `CodeGenWorkItem` describes one function to compile and is consumed
//! entirely within a single `RemoteCodeGen` call. The `JitOutput` hands
//! ownership of everything in it back to the client; the server keeps only
//! its allocation record so `IsNativeAddr`/`FreeAllocation` keep working.

use crate::bytecode::JitBody;
use serde::{Deserialize, Serialize};
use vireo_engine::property::PropertyId;

/// Client payload for `InitializeThreadContext`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadContextData {
    /// Client process id, used for liveness polling and rundown
    pub process_id: u32,
    /// Base address of the client's executable image, informational
    pub client_base_addr: u64,
}

/// Client payload for `InitializeScriptContext`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptContextData {
    /// Client-space address of the realm's global `this`
    pub global_this_addr: u64,
}

/// One inline cache slot the compiled code may consult
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineCacheDescriptor {
    /// Index the bytecode refers to
    pub cache_index: u16,
    /// Property the cache guards
    pub property_id: PropertyId,
    /// Object slot offset recorded by the profiler
    pub slot_offset: u16,
}

/// Shared page of numeric constants, addressed in client space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberPageSegment {
    /// Segment id assigned by whichever side allocated it
    pub segment_id: u64,
    /// Client-space base address of the page
    pub base_addr: u64,
    /// Constants resident in the page
    pub constants: Vec<f64>,
}

/// Description of one function pending JIT compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeGenWorkItem {
    /// The function body to compile
    pub body: JitBody,
    /// Source context the body belongs to
    pub source_context: u64,
    /// Inline caches the body's property ops index into
    pub inline_caches: Vec<InlineCacheDescriptor>,
    /// Current client-space global-`this` address
    pub global_this_addr: u64,
    /// Optional numeric-constant page to compile against
    pub number_page_segment: Option<NumberPageSegment>,
    /// Client submit timestamp, microseconds since the epoch
    pub submitted_at_micros: u64,
}

/// Result of one remote compilation.
///
/// Constructed zeroed before the call body runs; an early-failing call can
/// never leak stale data from a previous compilation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JitOutput {
    /// Client-space address the code was assigned
    pub code_addr: u64,
    /// Generated machine code (or template) bytes
    pub code_bytes: Vec<u8>,
    /// Offset of the entry point within the code
    pub entry_offset: u32,
    /// Prolog length in bytes, for the client's unwinder
    pub prolog_size: u32,
    /// Frame size the generated code establishes
    pub frame_size: u32,
    /// Number page segment handed back to the client, if any
    pub number_page_segment: Option<NumberPageSegment>,
    /// Backend that produced the code
    pub backend: String,
    /// Time spent in the backend, microseconds
    pub codegen_micros: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::JitOp;

    #[test]
    fn test_jit_output_default_is_zeroed() {
        let out = JitOutput::default();
        assert_eq!(out.code_addr, 0);
        assert!(out.code_bytes.is_empty());
        assert!(out.number_page_segment.is_none());
        assert_eq!(out.codegen_micros, 0);
    }

    #[test]
    fn test_work_item_serde_roundtrip() {
        let item = CodeGenWorkItem {
            body: JitBody {
                body_id: 3,
                name: "add".to_string(),
                arg_count: 2,
                consts: vec![],
                ops: vec![JitOp::LoadArg(0), JitOp::LoadArg(1), JitOp::Add, JitOp::Return],
            },
            source_context: 1,
            inline_caches: vec![InlineCacheDescriptor {
                cache_index: 0,
                property_id: 17,
                slot_offset: 2,
            }],
            global_this_addr: 0x7000_0000,
            number_page_segment: Some(NumberPageSegment {
                segment_id: 1,
                base_addr: 0x7100_0000,
                constants: vec![3.25],
            }),
            submitted_at_micros: 99,
        };
        let json = serde_json::to_string(&item).unwrap();
        let back: CodeGenWorkItem = serde_json::from_str(&json).unwrap();
        assert_eq!(item, back);
    }
}

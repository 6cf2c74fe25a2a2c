//! Request/response messages
//!
//! One variant per RPC operation. Handles are rundown-safe: a dropped
//! connection must trigger the same cleanup as explicit `Cleanup*` calls.

use crate::handle::{ScriptContextHandle, ThreadContextHandle};
use crate::status::Status;
use crate::workitem::{CodeGenWorkItem, JitOutput, ScriptContextData, ThreadContextData};
use serde::{Deserialize, Serialize};
use vireo_engine::property::{PropertyId, PropertyRecord};

/// Client-to-server request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Register a thread context; must precede every other per-context call
    InitializeThreadContext {
        /// Client thread/runtime description
        data: ThreadContextData,
    },
    /// Tear down a thread context and cascade-close its script contexts
    CleanupThreadContext {
        /// Context to destroy
        handle: ThreadContextHandle,
    },
    /// Register a script realm under a thread context
    InitializeScriptContext {
        /// Owning thread context
        thread: ThreadContextHandle,
        /// Realm description
        data: ScriptContextData,
    },
    /// Close a script context; further calls observe access-denied
    CloseScriptContext {
        /// Context to close
        handle: ScriptContextHandle,
    },
    /// Destroy a closed script context; closing first is required
    CleanupScriptContext {
        /// Context to destroy
        handle: ScriptContextHandle,
    },
    /// Mirror client property-record interning into the server
    UpdatePropertyRecordMap {
        /// Owning thread context
        thread: ThreadContextHandle,
        /// Newly interned records
        added: Vec<PropertyRecord>,
        /// Reclaimed record ids
        removed: Vec<PropertyId>,
    },
    /// Record the well-known host type id for DOM checks
    SetWellKnownHostType {
        /// Owning thread context
        thread: ThreadContextHandle,
        /// Host type id
        type_id: u32,
    },
    /// Register a DOM fast-path helper the compiled code may call
    AddDomFastPathHelper {
        /// Owning script context
        script: ScriptContextHandle,
        /// Helper slot
        helper_id: u32,
        /// Client-space helper address
        helper_addr: u64,
    },
    /// Register a module record for import.meta resolution
    AddModuleRecordInfo {
        /// Owning script context
        script: ScriptContextHandle,
        /// Module record id
        module_id: u32,
        /// Client-space module record address
        module_addr: u64,
    },
    /// Mark the realm's PRNG as seeded
    SetIsPrngSeeded {
        /// Owning script context
        script: ScriptContextHandle,
        /// Seeded flag
        seeded: bool,
    },
    /// Allocate and fill an interpreter-thunk block in client space
    NewInterpreterThunkBlock {
        /// Owning script context
        script: ScriptContextHandle,
        /// Thunks requested
        thunk_count: u32,
    },
    /// Compile one function
    RemoteCodeGen {
        /// Owning script context
        script: ScriptContextHandle,
        /// Function to compile
        work_item: CodeGenWorkItem,
    },
    /// Is the address inside a code region this thread context owns?
    IsNativeAddr {
        /// Owning thread context
        thread: ThreadContextHandle,
        /// Client-space address to check
        addr: u64,
    },
    /// Release one code allocation
    FreeAllocation {
        /// Owning thread context
        thread: ThreadContextHandle,
        /// Client-space address previously returned by codegen
        addr: u64,
    },
    /// Force-close every context belonging to a client process
    CleanupProcess {
        /// Client process id
        process_id: u32,
    },
    /// Stop the server loop
    Shutdown,
}

/// Server-to-client response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Reply to `InitializeThreadContext`
    ThreadContextInitialized {
        /// Call result
        status: Status,
        /// New handle on success
        handle: Option<ThreadContextHandle>,
        /// Client-space base of the pre-reserved code region
        pre_reserved_base: u64,
        /// Size of the pre-reserved region in bytes
        pre_reserved_size: u64,
    },
    /// Reply to `InitializeScriptContext`
    ScriptContextInitialized {
        /// Call result
        status: Status,
        /// New handle on success
        handle: Option<ScriptContextHandle>,
    },
    /// Reply to any operation with no payload
    Ack {
        /// Call result
        status: Status,
    },
    /// Reply to `IsNativeAddr`
    NativeAddr {
        /// Call result
        status: Status,
        /// True when the address lies inside a known code region
        is_native: bool,
    },
    /// Reply to `NewInterpreterThunkBlock`
    ThunkBlock {
        /// Call result
        status: Status,
        /// Client-space base of the thunk block
        base_addr: u64,
        /// Thunks available in the block
        thunk_count: u32,
    },
    /// Reply to `RemoteCodeGen`
    CodeGen {
        /// Call result
        status: Status,
        /// Output on success; absent on failure
        output: Option<JitOutput>,
    },
}

impl Response {
    /// The status carried by any response variant
    pub fn status(&self) -> Status {
        match self {
            Response::ThreadContextInitialized { status, .. }
            | Response::ScriptContextInitialized { status, .. }
            | Response::Ack { status }
            | Response::NativeAddr { status, .. }
            | Response::ThunkBlock { status, .. }
            | Response::CodeGen { status, .. } => *status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::RawHandle;

    #[test]
    fn test_request_serde_roundtrip() {
        let req = Request::IsNativeAddr {
            thread: ThreadContextHandle(RawHandle::new(1, 1)),
            addr: 0xdead_beef,
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn test_response_status_accessor() {
        let r = Response::Ack {
            status: Status::AccessDenied,
        };
        assert_eq!(r.status(), Status::AccessDenied);
        let r = Response::CodeGen {
            status: Status::Ok,
            output: None,
        };
        assert!(r.status().is_success());
    }
}

//! Typed RPC surface
//!
//! One method per operation. Every method checks the wire status and
//! turns failures into `ClientError::Call`, so engine code never has to
//! inspect raw responses.

use crate::transport::JitTransport;
use crate::{ClientError, ClientResult};
use vireo_engine::property::{PropertyId, PropertyRecord};
use vireo_jit_proto::handle::{ScriptContextHandle, ThreadContextHandle};
use vireo_jit_proto::messages::{Request, Response};
use vireo_jit_proto::workitem::{
    CodeGenWorkItem, JitOutput, ScriptContextData, ThreadContextData,
};

/// What the server hands back for a new thread context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadContextInfo {
    /// Handle for all further calls
    pub handle: ThreadContextHandle,
    /// Client-space base of the pre-reserved code region
    pub pre_reserved_base: u64,
    /// Size of the pre-reserved region in bytes
    pub pre_reserved_size: u64,
}

/// Client handle over any transport
pub struct JitClient<T: JitTransport> {
    transport: T,
}

impl<T: JitTransport> JitClient<T> {
    /// Client over an established transport
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    fn call(&mut self, request: Request) -> ClientResult<Response> {
        let response = self.transport.call(request)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Call { status });
        }
        Ok(response)
    }

    fn call_ack(&mut self, request: Request) -> ClientResult<()> {
        match self.call(request)? {
            Response::Ack { .. } => Ok(()),
            other => Err(ClientError::Protocol(format!(
                "expected Ack, got {:?}",
                other
            ))),
        }
    }

    /// Register this engine thread with the server
    pub fn initialize_thread_context(
        &mut self,
        data: ThreadContextData,
    ) -> ClientResult<ThreadContextInfo> {
        match self.call(Request::InitializeThreadContext { data })? {
            Response::ThreadContextInitialized {
                handle: Some(handle),
                pre_reserved_base,
                pre_reserved_size,
                ..
            } => Ok(ThreadContextInfo {
                handle,
                pre_reserved_base,
                pre_reserved_size,
            }),
            other => Err(ClientError::Protocol(format!(
                "expected ThreadContextInitialized, got {:?}",
                other
            ))),
        }
    }

    /// Tear down a thread context and everything under it
    pub fn cleanup_thread_context(&mut self, handle: ThreadContextHandle) -> ClientResult<()> {
        self.call_ack(Request::CleanupThreadContext { handle })
    }

    /// Register a realm under a thread context
    pub fn initialize_script_context(
        &mut self,
        thread: ThreadContextHandle,
        data: ScriptContextData,
    ) -> ClientResult<ScriptContextHandle> {
        match self.call(Request::InitializeScriptContext { thread, data })? {
            Response::ScriptContextInitialized {
                handle: Some(handle),
                ..
            } => Ok(handle),
            other => Err(ClientError::Protocol(format!(
                "expected ScriptContextInitialized, got {:?}",
                other
            ))),
        }
    }

    /// Close a realm; one of two racing closers wins
    pub fn close_script_context(&mut self, handle: ScriptContextHandle) -> ClientResult<()> {
        self.call_ack(Request::CloseScriptContext { handle })
    }

    /// Destroy a closed realm
    pub fn cleanup_script_context(&mut self, handle: ScriptContextHandle) -> ClientResult<()> {
        self.call_ack(Request::CleanupScriptContext { handle })
    }

    /// Push a property-map delta to the server mirror
    pub fn update_property_record_map(
        &mut self,
        thread: ThreadContextHandle,
        added: Vec<PropertyRecord>,
        removed: Vec<PropertyId>,
    ) -> ClientResult<()> {
        self.call_ack(Request::UpdatePropertyRecordMap {
            thread,
            added,
            removed,
        })
    }

    /// Record the host's well-known type id
    pub fn set_well_known_host_type(
        &mut self,
        thread: ThreadContextHandle,
        type_id: u32,
    ) -> ClientResult<()> {
        self.call_ack(Request::SetWellKnownHostType { thread, type_id })
    }

    /// Register a DOM fast-path helper address
    pub fn add_dom_fast_path_helper(
        &mut self,
        script: ScriptContextHandle,
        helper_id: u32,
        helper_addr: u64,
    ) -> ClientResult<()> {
        self.call_ack(Request::AddDomFastPathHelper {
            script,
            helper_id,
            helper_addr,
        })
    }

    /// Register a module record address
    pub fn add_module_record_info(
        &mut self,
        script: ScriptContextHandle,
        module_id: u32,
        module_addr: u64,
    ) -> ClientResult<()> {
        self.call_ack(Request::AddModuleRecordInfo {
            script,
            module_id,
            module_addr,
        })
    }

    /// Mark the realm's PRNG as seeded
    pub fn set_is_prng_seeded(
        &mut self,
        script: ScriptContextHandle,
        seeded: bool,
    ) -> ClientResult<()> {
        self.call_ack(Request::SetIsPrngSeeded { script, seeded })
    }

    /// Allocate an interpreter-thunk block; returns its base address and
    /// how many thunks it holds
    pub fn new_interpreter_thunk_block(
        &mut self,
        script: ScriptContextHandle,
        thunk_count: u32,
    ) -> ClientResult<(u64, u32)> {
        match self.call(Request::NewInterpreterThunkBlock {
            script,
            thunk_count,
        })? {
            Response::ThunkBlock {
                base_addr,
                thunk_count,
                ..
            } => Ok((base_addr, thunk_count)),
            other => Err(ClientError::Protocol(format!(
                "expected ThunkBlock, got {:?}",
                other
            ))),
        }
    }

    /// Compile one function remotely
    pub fn remote_codegen(
        &mut self,
        script: ScriptContextHandle,
        work_item: CodeGenWorkItem,
    ) -> ClientResult<JitOutput> {
        match self.call(Request::RemoteCodeGen { script, work_item })? {
            Response::CodeGen {
                output: Some(output),
                ..
            } => Ok(output),
            other => Err(ClientError::Protocol(format!(
                "expected CodeGen output, got {:?}",
                other
            ))),
        }
    }

    /// Ask whether an address lies inside server-issued code
    pub fn is_native_addr(
        &mut self,
        thread: ThreadContextHandle,
        addr: u64,
    ) -> ClientResult<bool> {
        match self.call(Request::IsNativeAddr { thread, addr })? {
            Response::NativeAddr { is_native, .. } => Ok(is_native),
            other => Err(ClientError::Protocol(format!(
                "expected NativeAddr, got {:?}",
                other
            ))),
        }
    }

    /// Release one code allocation
    pub fn free_allocation(
        &mut self,
        thread: ThreadContextHandle,
        addr: u64,
    ) -> ClientResult<()> {
        self.call_ack(Request::FreeAllocation { thread, addr })
    }

    /// Force-run-down every context of a client process
    pub fn cleanup_process(&mut self, process_id: u32) -> ClientResult<()> {
        self.call_ack(Request::CleanupProcess { process_id })
    }

    /// Ask the server to stop accepting connections
    pub fn shutdown(&mut self) -> ClientResult<()> {
        self.call_ack(Request::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use std::sync::Arc;
    use vireo_jit_proto::bytecode::{JitBody, JitOp};
    use vireo_jit_proto::Status;
    use vireo_jit_server::JitService;

    fn client() -> JitClient<LocalTransport> {
        JitClient::new(LocalTransport::new(Arc::new(JitService::new())))
    }

    fn data() -> ThreadContextData {
        ThreadContextData {
            process_id: std::process::id(),
            client_base_addr: 0x40_0000,
        }
    }

    #[test]
    fn test_full_context_lifecycle() {
        let mut c = client();
        let info = c.initialize_thread_context(data()).unwrap();
        assert!(info.pre_reserved_size > 0);
        let sc = c
            .initialize_script_context(
                info.handle,
                ScriptContextData {
                    global_this_addr: 0x7000_0000,
                },
            )
            .unwrap();
        c.set_is_prng_seeded(sc, true).unwrap();
        c.close_script_context(sc).unwrap();
        c.cleanup_script_context(sc).unwrap();
        c.cleanup_thread_context(info.handle).unwrap();

        let err = c.set_well_known_host_type(info.handle, 1).unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidArg));
    }

    #[test]
    fn test_codegen_roundtrip_via_client() {
        let mut c = client();
        let info = c.initialize_thread_context(data()).unwrap();
        let sc = c
            .initialize_script_context(
                info.handle,
                ScriptContextData { global_this_addr: 1 },
            )
            .unwrap();
        let out = c
            .remote_codegen(
                sc,
                CodeGenWorkItem {
                    body: JitBody {
                        body_id: 1,
                        name: "one".to_string(),
                        arg_count: 0,
                        consts: vec![1.0],
                        ops: vec![JitOp::ConstNum(0), JitOp::Return],
                    },
                    source_context: 0,
                    inline_caches: vec![],
                    global_this_addr: 1,
                    number_page_segment: None,
                    submitted_at_micros: 0,
                },
            )
            .unwrap();
        assert!(out.code_addr >= info.pre_reserved_base);
        assert!(c.is_native_addr(info.handle, out.code_addr).unwrap());
        c.free_allocation(info.handle, out.code_addr).unwrap();
        assert!(!c.is_native_addr(info.handle, out.code_addr).unwrap());
    }

    #[test]
    fn test_failed_call_surfaces_status() {
        let mut c = client();
        let err = c
            .initialize_thread_context(ThreadContextData {
                process_id: 0,
                client_base_addr: 0,
            })
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidArg));
    }
}

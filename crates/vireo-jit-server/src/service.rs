//! The JIT service proper
//!
//! `JitService::handle` dispatches one request to its call body under the
//! guard and shapes the result into a wire response. Bodies resolve and
//! retain their context up front, then run against the retained `Arc`
//! without the registry lock. After every call that named a context, the
//! owning client process is polled; a dead client gets its contexts run
//! down immediately instead of waiting for the socket to drop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::backend::{CodegenBackend, CompileContext, TemplateBackend};
use crate::codespace::{AllocationKind, PRE_RESERVED_REGION_SIZE};
use crate::guard::run_guarded;
use crate::process::{LocalProcessProbe, ProcessProbe};
use crate::registry::ContextRegistry;
use crate::script_context::ServerScriptContext;
use crate::thread_context::ServerThreadContext;
use crate::{ServiceError, ServiceResult};
use vireo_jit_proto::handle::{ScriptContextHandle, ThreadContextHandle};
use vireo_jit_proto::messages::{Request, Response};
use vireo_jit_proto::workitem::{CodeGenWorkItem, JitOutput};
use vireo_jit_proto::Status;

/// Client-space address where the first pre-reserved region is placed.
/// Subsequent thread contexts get consecutive regions above it.
const FIRST_REGION_BASE: u64 = 0x1000_0000;

/// Bytes reserved per interpreter thunk
pub const THUNK_SIZE: u64 = 32;

/// One JIT server instance; shared by every connection
pub struct JitService {
    registry: ContextRegistry,
    probe: Arc<dyn ProcessProbe>,
    backend: Arc<dyn CodegenBackend>,
    next_region_base: AtomicU64,
    last_error: Mutex<Option<Status>>,
    shutdown: AtomicBool,
}

impl JitService {
    /// Service with the default probe and the template backend
    pub fn new() -> Self {
        Self::with_parts(Arc::new(LocalProcessProbe), Arc::new(TemplateBackend::new()))
    }

    /// Service with an explicit probe and backend
    pub fn with_parts(probe: Arc<dyn ProcessProbe>, backend: Arc<dyn CodegenBackend>) -> Self {
        Self {
            registry: ContextRegistry::new(),
            probe,
            backend,
            next_region_base: AtomicU64::new(FIRST_REGION_BASE),
            last_error: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    /// The context directory (connection rundown walks it)
    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    /// Status recorded by the most recent failing call, if any
    pub fn last_error(&self) -> Option<Status> {
        *self.last_error.lock()
    }

    /// True once a `Shutdown` request has been handled
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Dispatch one request
    pub fn handle(&self, request: Request) -> Response {
        let mut observed_pid: Option<u32> = None;
        let response = self.dispatch(request, &mut observed_pid);
        if let Some(pid) = observed_pid {
            if !self.probe.is_alive(pid) {
                self.registry.cleanup_for_process(pid);
            }
        }
        response
    }

    fn dispatch(&self, request: Request, observed_pid: &mut Option<u32>) -> Response {
        match request {
            Request::InitializeThreadContext { data } => {
                let (status, value) = run_guarded(&self.last_error, || {
                    if data.process_id == 0 {
                        return Err(ServiceError::InvalidArg);
                    }
                    if !self.probe.is_alive(data.process_id) {
                        return Err(ServiceError::InvalidArg);
                    }
                    *observed_pid = Some(data.process_id);
                    let base = self
                        .next_region_base
                        .fetch_add(PRE_RESERVED_REGION_SIZE, Ordering::AcqRel);
                    let ctx = Arc::new(ServerThreadContext::new(&data, base));
                    let handle = self.registry.register_thread(ctx);
                    Ok((handle, base))
                });
                match value {
                    Some((handle, base)) => Response::ThreadContextInitialized {
                        status,
                        handle: Some(handle),
                        pre_reserved_base: base,
                        pre_reserved_size: PRE_RESERVED_REGION_SIZE,
                    },
                    None => Response::ThreadContextInitialized {
                        status,
                        handle: None,
                        pre_reserved_base: 0,
                        pre_reserved_size: 0,
                    },
                }
            }

            Request::CleanupThreadContext { handle } => {
                let (status, _) = run_guarded(&self.last_error, || {
                    let thread = self.registry.unregister_thread(handle)?;
                    *observed_pid = Some(thread.process_id());
                    Ok(())
                });
                Response::Ack { status }
            }

            Request::InitializeScriptContext { thread, data } => {
                let (status, value) = run_guarded(&self.last_error, || {
                    let tc = self.registry.resolve_thread(thread)?;
                    *observed_pid = Some(tc.process_id());
                    let sc = Arc::new(ServerScriptContext::new(tc, &data));
                    Ok(self.registry.register_script(sc))
                });
                Response::ScriptContextInitialized {
                    status,
                    handle: value,
                }
            }

            Request::CloseScriptContext { handle } => {
                let (status, _) = run_guarded(&self.last_error, || {
                    let sc = self.registry.resolve_script_any(handle)?;
                    *observed_pid = Some(sc.thread().process_id());
                    if !sc.close() {
                        // the other closer won the race
                        return Err(ServiceError::AccessDenied);
                    }
                    Ok(())
                });
                Response::Ack { status }
            }

            Request::CleanupScriptContext { handle } => {
                let (status, _) = run_guarded(&self.last_error, || {
                    let sc = self.registry.resolve_script_any(handle)?;
                    *observed_pid = Some(sc.thread().process_id());
                    if !sc.is_closed() {
                        // protocol error: close must precede cleanup
                        return Err(ServiceError::InvalidArg);
                    }
                    self.registry.unregister_script(handle)?;
                    Ok(())
                });
                Response::Ack { status }
            }

            Request::UpdatePropertyRecordMap {
                thread,
                added,
                removed,
            } => {
                let (status, _) = run_guarded(&self.last_error, || {
                    let tc = self.registry.resolve_thread(thread)?;
                    *observed_pid = Some(tc.process_id());
                    tc.update_property_map(added, removed);
                    Ok(())
                });
                Response::Ack { status }
            }

            Request::SetWellKnownHostType { thread, type_id } => {
                let (status, _) = run_guarded(&self.last_error, || {
                    let tc = self.registry.resolve_thread(thread)?;
                    *observed_pid = Some(tc.process_id());
                    tc.set_well_known_host_type(type_id);
                    Ok(())
                });
                Response::Ack { status }
            }

            Request::AddDomFastPathHelper {
                script,
                helper_id,
                helper_addr,
            } => {
                let (status, _) = run_guarded(&self.last_error, || {
                    let sc = self.registry.resolve_script(script)?;
                    *observed_pid = Some(sc.thread().process_id());
                    sc.add_dom_fast_path_helper(helper_id, helper_addr);
                    Ok(())
                });
                Response::Ack { status }
            }

            Request::AddModuleRecordInfo {
                script,
                module_id,
                module_addr,
            } => {
                let (status, _) = run_guarded(&self.last_error, || {
                    let sc = self.registry.resolve_script(script)?;
                    *observed_pid = Some(sc.thread().process_id());
                    sc.add_module_record(module_id, module_addr);
                    Ok(())
                });
                Response::Ack { status }
            }

            Request::SetIsPrngSeeded { script, seeded } => {
                let (status, _) = run_guarded(&self.last_error, || {
                    let sc = self.registry.resolve_script(script)?;
                    *observed_pid = Some(sc.thread().process_id());
                    sc.set_prng_seeded(seeded);
                    Ok(())
                });
                Response::Ack { status }
            }

            Request::NewInterpreterThunkBlock {
                script,
                thunk_count,
            } => {
                let (status, value) = run_guarded(&self.last_error, || {
                    self.new_thunk_block(script, thunk_count, observed_pid)
                });
                match value {
                    Some(base_addr) => Response::ThunkBlock {
                        status,
                        base_addr,
                        thunk_count,
                    },
                    None => Response::ThunkBlock {
                        status,
                        base_addr: 0,
                        thunk_count: 0,
                    },
                }
            }

            Request::RemoteCodeGen { script, work_item } => {
                let (status, value) = run_guarded(&self.last_error, || {
                    self.remote_codegen(script, work_item, observed_pid)
                });
                Response::CodeGen {
                    status,
                    output: value,
                }
            }

            Request::IsNativeAddr { thread, addr } => {
                let (status, value) = run_guarded(&self.last_error, || {
                    let tc = self.registry.resolve_thread(thread)?;
                    *observed_pid = Some(tc.process_id());
                    Ok(tc.is_native_addr(addr))
                });
                Response::NativeAddr {
                    status,
                    is_native: value.unwrap_or(false),
                }
            }

            Request::FreeAllocation { thread, addr } => {
                let (status, _) = run_guarded(&self.last_error, || {
                    let tc = self.registry.resolve_thread(thread)?;
                    *observed_pid = Some(tc.process_id());
                    tc.free_allocation(addr)
                });
                Response::Ack { status }
            }

            Request::CleanupProcess { process_id } => {
                let (status, _) = run_guarded(&self.last_error, || {
                    self.registry.cleanup_for_process(process_id);
                    Ok(())
                });
                Response::Ack { status }
            }

            Request::Shutdown => {
                self.shutdown.store(true, Ordering::Release);
                Response::Ack { status: Status::Ok }
            }
        }
    }

    fn new_thunk_block(
        &self,
        script: ScriptContextHandle,
        thunk_count: u32,
        observed_pid: &mut Option<u32>,
    ) -> ServiceResult<u64> {
        let sc = self.registry.resolve_script(script)?;
        *observed_pid = Some(sc.thread().process_id());
        if thunk_count == 0 {
            return Err(ServiceError::InvalidArg);
        }
        sc.thread()
            .allocate(THUNK_SIZE * thunk_count as u64, AllocationKind::ThunkBlock)
    }

    fn remote_codegen(
        &self,
        script: ScriptContextHandle,
        work_item: CodeGenWorkItem,
        observed_pid: &mut Option<u32>,
    ) -> ServiceResult<JitOutput> {
        // Zeroed before anything can fail; an early error can never hand
        // back a stale field from a previous compilation.
        let mut output = JitOutput::default();

        let sc = self.registry.resolve_script(script)?;
        *observed_pid = Some(sc.thread().process_id());
        let thread = Arc::clone(sc.thread());

        sc.set_global_this_addr(work_item.global_this_addr);

        // Place the number page first so lowering compiles against its
        // final client-space address.
        let mut page = work_item.number_page_segment;
        if let Some(seg) = page.as_mut() {
            if seg.base_addr == 0 {
                let bytes = (seg.constants.len().max(1) as u64) * 8;
                seg.base_addr = thread.allocate(bytes, AllocationKind::NumberPage)?;
            }
        }
        let page_constants: &[f64] = page.as_ref().map(|s| s.constants.as_slice()).unwrap_or(&[]);

        let compile_ctx = CompileContext {
            inline_caches: &work_item.inline_caches,
            global_this_addr: sc.global_this_addr(),
            page_constants,
        };

        let started = Instant::now();
        let compiled = self.backend.compile(&work_item.body, &compile_ctx)?;
        let micros = started.elapsed().as_micros() as u64;

        let code_addr = thread.allocate(compiled.code.len() as u64, AllocationKind::JitCode)?;

        sc.profiler().lock().record(work_item.body.body_id, micros);

        output.code_addr = code_addr;
        output.code_bytes = compiled.code;
        output.entry_offset = compiled.entry_offset;
        output.prolog_size = compiled.prolog_size;
        output.frame_size = compiled.frame_size;
        output.number_page_segment = page;
        output.backend = self.backend.name().to_string();
        output.codegen_micros = micros;
        Ok(output)
    }

    /// Resolve-and-retain helper for connection rundown
    pub fn cleanup_thread_handle(&self, handle: ThreadContextHandle) {
        let _ = self.handle(Request::CleanupThreadContext { handle });
    }
}

impl Default for JitService {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JitService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitService")
            .field("backend", &self.backend.name())
            .field("threads", &self.registry.thread_count())
            .field("scripts", &self.registry.script_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ScriptedProbe;
    use vireo_jit_proto::bytecode::{JitBody, JitOp};
    use vireo_jit_proto::workitem::{NumberPageSegment, ScriptContextData, ThreadContextData};

    fn service() -> (JitService, Arc<ScriptedProbe>) {
        let probe = Arc::new(ScriptedProbe::default());
        let svc = JitService::with_parts(Arc::clone(&probe) as _, Arc::new(TemplateBackend::new()));
        (svc, probe)
    }

    fn init_thread(svc: &JitService, pid: u32) -> ThreadContextHandle {
        match svc.handle(Request::InitializeThreadContext {
            data: ThreadContextData {
                process_id: pid,
                client_base_addr: 0x40_0000,
            },
        }) {
            Response::ThreadContextInitialized {
                status,
                handle: Some(h),
                ..
            } => {
                assert!(status.is_success());
                h
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    fn init_script(svc: &JitService, thread: ThreadContextHandle) -> ScriptContextHandle {
        match svc.handle(Request::InitializeScriptContext {
            thread,
            data: ScriptContextData {
                global_this_addr: 0x7000_0000,
            },
        }) {
            Response::ScriptContextInitialized {
                status,
                handle: Some(h),
            } => {
                assert!(status.is_success());
                h
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    fn add_body() -> JitBody {
        JitBody {
            body_id: 11,
            name: "add".to_string(),
            arg_count: 2,
            consts: vec![],
            ops: vec![JitOp::LoadArg(0), JitOp::LoadArg(1), JitOp::Add, JitOp::Return],
        }
    }

    #[test]
    fn test_zero_pid_rejected() {
        let (svc, _) = service();
        let resp = svc.handle(Request::InitializeThreadContext {
            data: ThreadContextData {
                process_id: 0,
                client_base_addr: 0,
            },
        });
        assert_eq!(resp.status(), Status::InvalidArg);
        assert_eq!(svc.last_error(), Some(Status::InvalidArg));
    }

    #[test]
    fn test_regions_do_not_overlap() {
        let (svc, _) = service();
        let a = svc.handle(Request::InitializeThreadContext {
            data: ThreadContextData {
                process_id: 1,
                client_base_addr: 0,
            },
        });
        let b = svc.handle(Request::InitializeThreadContext {
            data: ThreadContextData {
                process_id: 2,
                client_base_addr: 0,
            },
        });
        let (base_a, base_b) = match (a, b) {
            (
                Response::ThreadContextInitialized {
                    pre_reserved_base: x,
                    ..
                },
                Response::ThreadContextInitialized {
                    pre_reserved_base: y,
                    ..
                },
            ) => (x, y),
            _ => panic!("bad responses"),
        };
        assert!(base_b >= base_a + PRE_RESERVED_REGION_SIZE);
    }

    #[test]
    fn test_close_then_cleanup_protocol() {
        let (svc, _) = service();
        let tc = init_thread(&svc, 1);
        let sc = init_script(&svc, tc);

        // cleanup before close is a protocol error
        let resp = svc.handle(Request::CleanupScriptContext { handle: sc });
        assert_eq!(resp.status(), Status::InvalidArg);

        assert!(svc
            .handle(Request::CloseScriptContext { handle: sc })
            .status()
            .is_success());
        // second close loses the race
        assert_eq!(
            svc.handle(Request::CloseScriptContext { handle: sc }).status(),
            Status::AccessDenied
        );
        assert!(svc
            .handle(Request::CleanupScriptContext { handle: sc })
            .status()
            .is_success());
        // handle is dead now
        assert_eq!(
            svc.handle(Request::CloseScriptContext { handle: sc }).status(),
            Status::InvalidArg
        );
    }

    #[test]
    fn test_closed_script_denies_operations() {
        let (svc, _) = service();
        let tc = init_thread(&svc, 1);
        let sc = init_script(&svc, tc);
        svc.handle(Request::CloseScriptContext { handle: sc });
        let resp = svc.handle(Request::SetIsPrngSeeded {
            script: sc,
            seeded: true,
        });
        assert_eq!(resp.status(), Status::AccessDenied);
    }

    #[test]
    fn test_codegen_allocates_and_tracks_native_addr() {
        let (svc, _) = service();
        let tc = init_thread(&svc, 1);
        let sc = init_script(&svc, tc);

        let resp = svc.handle(Request::RemoteCodeGen {
            script: sc,
            work_item: CodeGenWorkItem {
                body: add_body(),
                source_context: 1,
                inline_caches: vec![],
                global_this_addr: 0x7000_0000,
                number_page_segment: None,
                submitted_at_micros: 0,
            },
        });
        let output = match resp {
            Response::CodeGen {
                status,
                output: Some(out),
            } => {
                assert!(status.is_success());
                out
            }
            other => panic!("unexpected response: {:?}", other),
        };
        assert!(output.code_addr != 0);
        assert!(!output.code_bytes.is_empty());
        assert_eq!(output.backend, "template");

        let native = svc.handle(Request::IsNativeAddr {
            thread: tc,
            addr: output.code_addr,
        });
        assert!(matches!(
            native,
            Response::NativeAddr {
                is_native: true,
                ..
            }
        ));

        assert!(svc
            .handle(Request::FreeAllocation {
                thread: tc,
                addr: output.code_addr,
            })
            .status()
            .is_success());
        let native = svc.handle(Request::IsNativeAddr {
            thread: tc,
            addr: output.code_addr,
        });
        assert!(matches!(
            native,
            Response::NativeAddr {
                is_native: false,
                ..
            }
        ));
    }

    #[test]
    fn test_codegen_places_number_page() {
        let (svc, _) = service();
        let tc = init_thread(&svc, 1);
        let sc = init_script(&svc, tc);

        let body = JitBody {
            body_id: 12,
            name: "page".to_string(),
            arg_count: 0,
            consts: vec![],
            ops: vec![JitOp::PageConst(0), JitOp::Return],
        };

        let resp = svc.handle(Request::RemoteCodeGen {
            script: sc,
            work_item: CodeGenWorkItem {
                body,
                source_context: 1,
                inline_caches: vec![],
                global_this_addr: 0x7000_0000,
                number_page_segment: Some(NumberPageSegment {
                    segment_id: 5,
                    base_addr: 0,
                    constants: vec![2.5, 3.5],
                }),
                submitted_at_micros: 0,
            },
        });
        let output = match resp {
            Response::CodeGen {
                output: Some(out), ..
            } => out,
            other => panic!("unexpected response: {:?}", other),
        };
        let seg = output.number_page_segment.expect("segment handed back");
        assert_eq!(seg.segment_id, 5);
        assert!(seg.base_addr != 0);
        let native = svc.handle(Request::IsNativeAddr {
            thread: tc,
            addr: seg.base_addr,
        });
        assert!(matches!(
            native,
            Response::NativeAddr {
                is_native: true,
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_body_is_invalid_arg_with_no_output() {
        let (svc, _) = service();
        let tc = init_thread(&svc, 1);
        let sc = init_script(&svc, tc);
        let body = JitBody {
            body_id: 1,
            name: "bad".to_string(),
            arg_count: 0,
            consts: vec![],
            ops: vec![JitOp::ConstNum(7), JitOp::Return],
        };
        let resp = svc.handle(Request::RemoteCodeGen {
            script: sc,
            work_item: CodeGenWorkItem {
                body,
                source_context: 0,
                inline_caches: vec![],
                global_this_addr: 0,
                number_page_segment: None,
                submitted_at_micros: 0,
            },
        });
        match resp {
            Response::CodeGen { status, output } => {
                assert_eq!(status, Status::InvalidArg);
                assert!(output.is_none());
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_thunk_block_allocation() {
        let (svc, _) = service();
        let tc = init_thread(&svc, 1);
        let sc = init_script(&svc, tc);
        let resp = svc.handle(Request::NewInterpreterThunkBlock {
            script: sc,
            thunk_count: 8,
        });
        let base = match resp {
            Response::ThunkBlock {
                status,
                base_addr,
                thunk_count,
            } => {
                assert!(status.is_success());
                assert_eq!(thunk_count, 8);
                base_addr
            }
            other => panic!("unexpected response: {:?}", other),
        };
        let native = svc.handle(Request::IsNativeAddr {
            thread: tc,
            addr: base + THUNK_SIZE * 8 - 1,
        });
        assert!(matches!(
            native,
            Response::NativeAddr {
                is_native: true,
                ..
            }
        ));
    }

    #[test]
    fn test_dead_process_runs_down_after_call() {
        let (svc, probe) = service();
        let tc = init_thread(&svc, 42);
        init_script(&svc, tc);
        assert_eq!(svc.registry().thread_count(), 1);

        probe.mark_dead(42);
        // the next call touching this context notices the corpse
        let resp = svc.handle(Request::SetWellKnownHostType {
            thread: tc,
            type_id: 3,
        });
        // the call itself still ran against the retained context
        assert!(resp.status().is_success());
        assert_eq!(svc.registry().thread_count(), 0);
        assert_eq!(svc.registry().script_count(), 0);
    }

    #[test]
    fn test_cleanup_process_removes_only_that_process() {
        let (svc, _) = service();
        let a = init_thread(&svc, 1);
        let b = init_thread(&svc, 2);
        init_script(&svc, a);
        init_script(&svc, b);

        assert!(svc
            .handle(Request::CleanupProcess { process_id: 1 })
            .status()
            .is_success());
        assert_eq!(svc.registry().thread_count(), 1);
        assert_eq!(svc.registry().script_count(), 1);
        assert!(svc
            .handle(Request::SetWellKnownHostType {
                thread: b,
                type_id: 1
            })
            .status()
            .is_success());
    }

    #[test]
    fn test_shutdown_sets_flag() {
        let (svc, _) = service();
        assert!(!svc.is_shut_down());
        assert!(svc.handle(Request::Shutdown).status().is_success());
        assert!(svc.is_shut_down());
    }
}

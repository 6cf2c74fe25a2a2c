//! Server-side script context
//!
//! Mirrors one client realm under its thread context: the global-`this`
//! address, DOM fast-path helpers, module records, and the PRNG-seeded
//! flag. The codegen profiler is created lazily on the first compilation
//! so realms that never JIT pay nothing for it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::thread_context::ServerThreadContext;
use vireo_jit_proto::workitem::ScriptContextData;

/// Per-realm compilation statistics, created on first use
#[derive(Debug, Default)]
pub struct CodegenProfiler {
    bodies_compiled: u64,
    total_micros: u64,
    per_body: FxHashMap<u64, u64>,
}

impl CodegenProfiler {
    /// Record one completed compilation
    pub fn record(&mut self, body_id: u64, micros: u64) {
        self.bodies_compiled += 1;
        self.total_micros += micros;
        *self.per_body.entry(body_id).or_insert(0) += 1;
    }

    /// Completed compilation count
    pub fn bodies_compiled(&self) -> u64 {
        self.bodies_compiled
    }

    /// Total backend time in microseconds
    pub fn total_micros(&self) -> u64 {
        self.total_micros
    }

    /// How often one body has been compiled (bailout recompiles bump this)
    pub fn compile_count(&self, body_id: u64) -> u64 {
        self.per_body.get(&body_id).copied().unwrap_or(0)
    }
}

/// Server mirror of a client script context
pub struct ServerScriptContext {
    thread: Arc<ServerThreadContext>,
    closed: AtomicBool,
    global_this_addr: AtomicU64,
    dom_fast_path_helpers: Mutex<FxHashMap<u32, u64>>,
    module_records: Mutex<FxHashMap<u32, u64>>,
    prng_seeded: AtomicBool,
    profiler: OnceCell<Mutex<CodegenProfiler>>,
}

impl ServerScriptContext {
    /// Mirror a freshly registered realm under `thread`
    pub fn new(thread: Arc<ServerThreadContext>, data: &ScriptContextData) -> Self {
        Self {
            thread,
            closed: AtomicBool::new(false),
            global_this_addr: AtomicU64::new(data.global_this_addr),
            dom_fast_path_helpers: Mutex::new(FxHashMap::default()),
            module_records: Mutex::new(FxHashMap::default()),
            prng_seeded: AtomicBool::new(false),
            profiler: OnceCell::new(),
        }
    }

    /// The owning thread context
    pub fn thread(&self) -> &Arc<ServerThreadContext> {
        &self.thread
    }

    /// True once the realm has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the realm closed. Returns false when it already was; exactly
    /// one of two racing closers wins.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Current client-space global-`this` address
    pub fn global_this_addr(&self) -> u64 {
        self.global_this_addr.load(Ordering::Acquire)
    }

    /// Refresh the global-`this` address (GC may have moved it)
    pub fn set_global_this_addr(&self, addr: u64) {
        self.global_this_addr.store(addr, Ordering::Release);
    }

    /// Register a DOM fast-path helper address
    pub fn add_dom_fast_path_helper(&self, helper_id: u32, helper_addr: u64) {
        self.dom_fast_path_helpers.lock().insert(helper_id, helper_addr);
    }

    /// Look up a registered helper address
    pub fn dom_fast_path_helper(&self, helper_id: u32) -> Option<u64> {
        self.dom_fast_path_helpers.lock().get(&helper_id).copied()
    }

    /// Register a module record address
    pub fn add_module_record(&self, module_id: u32, module_addr: u64) {
        self.module_records.lock().insert(module_id, module_addr);
    }

    /// Look up a registered module record address
    pub fn module_record(&self, module_id: u32) -> Option<u64> {
        self.module_records.lock().get(&module_id).copied()
    }

    /// Record whether the realm's PRNG has been seeded
    pub fn set_prng_seeded(&self, seeded: bool) {
        self.prng_seeded.store(seeded, Ordering::Release);
    }

    /// True when the realm's PRNG has been seeded
    pub fn is_prng_seeded(&self) -> bool {
        self.prng_seeded.load(Ordering::Acquire)
    }

    /// The realm's profiler, created on first access
    pub fn profiler(&self) -> &Mutex<CodegenProfiler> {
        self.profiler
            .get_or_init(|| Mutex::new(CodegenProfiler::default()))
    }

    /// True when a compilation has already forced the profiler into being
    pub fn has_profiler(&self) -> bool {
        self.profiler.get().is_some()
    }
}

impl std::fmt::Debug for ServerScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerScriptContext")
            .field("process_id", &self.thread.process_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_jit_proto::workitem::ThreadContextData;

    fn ctx() -> ServerScriptContext {
        let thread = Arc::new(ServerThreadContext::new(
            &ThreadContextData {
                process_id: 1,
                client_base_addr: 0,
            },
            0x1000_0000,
        ));
        ServerScriptContext::new(
            thread,
            &ScriptContextData {
                global_this_addr: 0x7000_0000,
            },
        )
    }

    #[test]
    fn test_only_first_close_wins() {
        let sc = ctx();
        assert!(sc.close());
        assert!(!sc.close());
        assert!(sc.is_closed());
    }

    #[test]
    fn test_global_this_refresh() {
        let sc = ctx();
        assert_eq!(sc.global_this_addr(), 0x7000_0000);
        sc.set_global_this_addr(0x7000_8000);
        assert_eq!(sc.global_this_addr(), 0x7000_8000);
    }

    #[test]
    fn test_profiler_is_lazy() {
        let sc = ctx();
        assert!(!sc.has_profiler());
        sc.profiler().lock().record(7, 120);
        assert!(sc.has_profiler());
        assert_eq!(sc.profiler().lock().bodies_compiled(), 1);
        assert_eq!(sc.profiler().lock().compile_count(7), 1);
    }

    #[test]
    fn test_helper_and_module_maps() {
        let sc = ctx();
        sc.add_dom_fast_path_helper(3, 0xAA);
        sc.add_module_record(9, 0xBB);
        assert_eq!(sc.dom_fast_path_helper(3), Some(0xAA));
        assert_eq!(sc.dom_fast_path_helper(4), None);
        assert_eq!(sc.module_record(9), Some(0xBB));
    }
}

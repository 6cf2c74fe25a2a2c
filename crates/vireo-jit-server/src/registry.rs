//! Process-wide context registry
//!
//! One arena per context kind, guarded by a single lock. Resolution checks
//! the slot generation against the handle, so a stale handle (slot reused
//! after cleanup) fails with `InvalidArg` instead of aliasing whatever
//! lives there now. Resolution also retains the `Arc` before the lock is
//! dropped; call bodies then run without touching the registry at all.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::script_context::ServerScriptContext;
use crate::thread_context::ServerThreadContext;
use crate::{ServiceError, ServiceResult};
use vireo_jit_proto::handle::{RawHandle, ScriptContextHandle, ThreadContextHandle};

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
struct Arena<T> {
    slots: Vec<Slot<T>>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T: Clone> Arena<T> {
    fn insert(&mut self, value: T) -> RawHandle {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.is_none() {
                slot.generation += 1;
                slot.value = Some(value);
                return RawHandle::new(index as u32, slot.generation);
            }
        }
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        RawHandle::new((self.slots.len() - 1) as u32, 1)
    }

    fn get(&self, handle: RawHandle) -> Option<T> {
        if handle.is_null() {
            return None;
        }
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.clone()
    }

    fn remove(&mut self, handle: RawHandle) -> Option<T> {
        if handle.is_null() {
            return None;
        }
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.take()
    }

    fn live(&self) -> impl Iterator<Item = (RawHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|v| (RawHandle::new(index as u32, slot.generation), v))
        })
    }

    fn count(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    threads: Arena<Arc<ServerThreadContext>>,
    scripts: Arena<Arc<ServerScriptContext>>,
}

/// Directory of every live server context
#[derive(Debug, Default)]
pub struct ContextRegistry {
    inner: Mutex<RegistryInner>,
}

impl ContextRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a thread context, returning its handle
    pub fn register_thread(&self, ctx: Arc<ServerThreadContext>) -> ThreadContextHandle {
        ThreadContextHandle(self.inner.lock().threads.insert(ctx))
    }

    /// Register a script context, returning its handle
    pub fn register_script(&self, ctx: Arc<ServerScriptContext>) -> ScriptContextHandle {
        ScriptContextHandle(self.inner.lock().scripts.insert(ctx))
    }

    /// Resolve a thread context for a call body. Stale or unknown handles
    /// fail with `InvalidArg`, closed contexts with `AccessDenied`.
    pub fn resolve_thread(
        &self,
        handle: ThreadContextHandle,
    ) -> ServiceResult<Arc<ServerThreadContext>> {
        let ctx = self.resolve_thread_any(handle)?;
        if ctx.is_closed() {
            return Err(ServiceError::AccessDenied);
        }
        Ok(ctx)
    }

    /// Resolve a thread context regardless of its closed flag (teardown
    /// paths need this)
    pub fn resolve_thread_any(
        &self,
        handle: ThreadContextHandle,
    ) -> ServiceResult<Arc<ServerThreadContext>> {
        self.inner
            .lock()
            .threads
            .get(handle.0)
            .ok_or(ServiceError::InvalidArg)
    }

    /// Resolve a script context for a call body. Stale or unknown handles
    /// fail with `InvalidArg`, closed contexts with `AccessDenied`.
    pub fn resolve_script(
        &self,
        handle: ScriptContextHandle,
    ) -> ServiceResult<Arc<ServerScriptContext>> {
        let ctx = self.resolve_script_any(handle)?;
        if ctx.is_closed() {
            return Err(ServiceError::AccessDenied);
        }
        Ok(ctx)
    }

    /// Resolve a script context regardless of its closed flag
    pub fn resolve_script_any(
        &self,
        handle: ScriptContextHandle,
    ) -> ServiceResult<Arc<ServerScriptContext>> {
        self.inner
            .lock()
            .scripts
            .get(handle.0)
            .ok_or(ServiceError::InvalidArg)
    }

    /// Remove a script context. The handle is dead afterwards.
    pub fn unregister_script(
        &self,
        handle: ScriptContextHandle,
    ) -> ServiceResult<Arc<ServerScriptContext>> {
        self.inner
            .lock()
            .scripts
            .remove(handle.0)
            .ok_or(ServiceError::InvalidArg)
    }

    /// Remove a thread context and every script context registered under
    /// it. All removed contexts are closed before the lock is released, so
    /// racing calls holding retained `Arc`s observe `AccessDenied`.
    pub fn unregister_thread(
        &self,
        handle: ThreadContextHandle,
    ) -> ServiceResult<Arc<ServerThreadContext>> {
        let mut inner = self.inner.lock();
        let thread = inner
            .threads
            .remove(handle.0)
            .ok_or(ServiceError::InvalidArg)?;
        thread.close();

        let orphaned: Vec<RawHandle> = inner
            .scripts
            .live()
            .filter(|(_, sc)| Arc::ptr_eq(sc.thread(), &thread))
            .map(|(h, _)| h)
            .collect();
        for h in orphaned {
            if let Some(sc) = inner.scripts.remove(h) {
                sc.close();
            }
        }
        Ok(thread)
    }

    /// Force-close and remove every context belonging to `process_id`.
    /// Returns how many thread contexts were removed.
    pub fn cleanup_for_process(&self, process_id: u32) -> usize {
        let mut inner = self.inner.lock();
        let doomed: Vec<RawHandle> = inner
            .threads
            .live()
            .filter(|(_, tc)| tc.process_id() == process_id)
            .map(|(h, _)| h)
            .collect();
        let mut removed = 0;
        for h in &doomed {
            if let Some(tc) = inner.threads.remove(*h) {
                tc.close();
                removed += 1;
                let orphaned: Vec<RawHandle> = inner
                    .scripts
                    .live()
                    .filter(|(_, sc)| Arc::ptr_eq(sc.thread(), &tc))
                    .map(|(sh, _)| sh)
                    .collect();
                for sh in orphaned {
                    if let Some(sc) = inner.scripts.remove(sh) {
                        sc.close();
                    }
                }
            }
        }
        removed
    }

    /// Live thread-context count
    pub fn thread_count(&self) -> usize {
        self.inner.lock().threads.count()
    }

    /// Live script-context count
    pub fn script_count(&self) -> usize {
        self.inner.lock().scripts.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_jit_proto::workitem::{ScriptContextData, ThreadContextData};

    fn thread(pid: u32) -> Arc<ServerThreadContext> {
        Arc::new(ServerThreadContext::new(
            &ThreadContextData {
                process_id: pid,
                client_base_addr: 0,
            },
            0x1000_0000,
        ))
    }

    fn script(tc: &Arc<ServerThreadContext>) -> Arc<ServerScriptContext> {
        Arc::new(ServerScriptContext::new(
            Arc::clone(tc),
            &ScriptContextData { global_this_addr: 1 },
        ))
    }

    #[test]
    fn test_stale_handle_fails_after_unregister() {
        let reg = ContextRegistry::new();
        let h = reg.register_thread(thread(1));
        assert!(reg.resolve_thread(h).is_ok());
        reg.unregister_thread(h).unwrap();
        assert!(matches!(
            reg.resolve_thread(h),
            Err(ServiceError::InvalidArg)
        ));
    }

    #[test]
    fn test_slot_reuse_invalidates_old_generation() {
        let reg = ContextRegistry::new();
        let old = reg.register_thread(thread(1));
        reg.unregister_thread(old).unwrap();
        let new = reg.register_thread(thread(2));
        assert_eq!(old.0.index, new.0.index);
        assert_ne!(old.0.generation, new.0.generation);
        assert!(reg.resolve_thread(old).is_err());
        assert!(reg.resolve_thread(new).is_ok());
    }

    #[test]
    fn test_unregister_thread_cascades_to_scripts() {
        let reg = ContextRegistry::new();
        let tc = thread(1);
        let th = reg.register_thread(Arc::clone(&tc));
        let sh = reg.register_script(script(&tc));
        reg.unregister_thread(th).unwrap();
        assert!(matches!(
            reg.resolve_script(sh),
            Err(ServiceError::InvalidArg)
        ));
        assert_eq!(reg.script_count(), 0);
    }

    #[test]
    fn test_closed_script_resolves_access_denied() {
        let reg = ContextRegistry::new();
        let tc = thread(1);
        reg.register_thread(Arc::clone(&tc));
        let sc = script(&tc);
        let sh = reg.register_script(Arc::clone(&sc));
        sc.close();
        assert!(matches!(
            reg.resolve_script(sh),
            Err(ServiceError::AccessDenied)
        ));
        assert!(reg.resolve_script_any(sh).is_ok());
    }

    #[test]
    fn test_cleanup_for_process_spares_other_processes() {
        let reg = ContextRegistry::new();
        let mine = thread(7);
        let theirs = thread(8);
        let mine_h = reg.register_thread(Arc::clone(&mine));
        let theirs_h = reg.register_thread(Arc::clone(&theirs));
        reg.register_script(script(&mine));
        reg.register_script(script(&theirs));

        assert_eq!(reg.cleanup_for_process(7), 1);
        assert!(reg.resolve_thread(mine_h).is_err());
        assert!(reg.resolve_thread(theirs_h).is_ok());
        assert_eq!(reg.script_count(), 1);
    }

    #[test]
    fn test_null_handle_never_resolves() {
        let reg = ContextRegistry::new();
        reg.register_thread(thread(1));
        let null = ThreadContextHandle(RawHandle::new(0, 0));
        assert!(matches!(
            reg.resolve_thread(null),
            Err(ServiceError::InvalidArg)
        ));
    }
}

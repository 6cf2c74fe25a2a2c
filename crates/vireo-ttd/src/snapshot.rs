//! Heap snapshots
//!
//! A snapshot is a full image of every live realm's heap at one event time.
//! Extraction walks object tables in id order so two snapshots of identical
//! state are byte-identical when persisted. Inflate pushes the image back
//! into a thread context: realms that already exist are reused and
//! overwritten in place, realms the snapshot does not mention are destroyed,
//! and missing realms are recreated under their recorded ids so later
//! allocations continue the recorded sequence.

use rustc_hash::{FxHashMap, FxHashSet};
use vireo_engine::{
    EngineResult, JsObject, ObjectId, ScriptContextId, ThreadContext,
};

/// Serialized image of one realm
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    /// Realm id within the thread context
    pub context_id: ScriptContextId,
    /// The realm's global object
    pub global: ObjectId,
    /// Allocation cursor at extraction time
    pub next_object_id: u64,
    /// Every live object, in id order
    pub objects: Vec<(ObjectId, JsObject)>,
    /// Root set, in id order
    pub roots: Vec<ObjectId>,
}

/// Full heap image across all realms
#[derive(Debug, Clone)]
pub struct HeapSnapshot {
    /// Event time replay resumes from after inflating this snapshot
    pub restore_time: i64,
    /// Realm that was active at extraction time
    pub active_context: Option<ScriptContextId>,
    /// One image per realm, in realm-id order
    pub contexts: Vec<ContextSnapshot>,
}

impl HeapSnapshot {
    /// Extract the current heap state of every realm
    pub fn extract(tc: &ThreadContext, restore_time: i64) -> EngineResult<Self> {
        let mut contexts = Vec::new();
        for id in tc.context_ids() {
            let ctx = tc.context(id)?;
            let objects = ctx
                .objects_sorted()
                .into_iter()
                .map(|(oid, obj)| (oid, obj.clone()))
                .collect();
            contexts.push(ContextSnapshot {
                context_id: id,
                global: ctx.global_object(),
                next_object_id: ctx.next_object_id(),
                objects,
                roots: ctx.roots_sorted(),
            });
        }
        Ok(Self {
            restore_time,
            active_context: tc.active_id(),
            contexts,
        })
    }

    /// Push this image back into the thread context
    pub fn inflate(&self, tc: &mut ThreadContext) -> EngineResult<()> {
        let wanted: FxHashSet<ScriptContextId> =
            self.contexts.iter().map(|c| c.context_id).collect();
        for id in tc.context_ids() {
            if !wanted.contains(&id) {
                tc.destroy_context(id)?;
            }
        }
        for image in &self.contexts {
            let ctx = tc.restore_context(image.context_id);
            let objects: FxHashMap<ObjectId, JsObject> =
                image.objects.iter().cloned().collect();
            let roots: FxHashSet<ObjectId> = image.roots.iter().copied().collect();
            ctx.restore(objects, roots, image.next_object_id, image.global);
        }
        if let Some(active) = self.active_context {
            tc.set_active(active)?;
        }
        Ok(())
    }

    /// Total object count across all realms
    pub fn object_count(&self) -> usize {
        self.contexts.iter().map(|c| c.objects.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_engine::JsValue;

    #[test]
    fn test_extract_inflate_roundtrip() {
        let mut tc = ThreadContext::new();
        let ctx_id = tc.create_context();
        tc.set_active(ctx_id).unwrap();
        let prop = tc.properties.intern("x");
        let ctx = tc.active_context_mut().unwrap();
        let obj = ctx.allocate_object();
        ctx.set_property(obj, prop, JsValue::Int32(5)).unwrap();
        ctx.add_root_ref(obj).unwrap();

        let snap = HeapSnapshot::extract(&tc, 10).unwrap();
        assert_eq!(snap.restore_time, 10);
        assert_eq!(snap.object_count(), 2);

        // mutate past the snapshot, then rewind
        let ctx = tc.active_context_mut().unwrap();
        let extra = ctx.allocate_object();
        ctx.set_property(obj, prop, JsValue::Int32(99)).unwrap();

        snap.inflate(&mut tc).unwrap();
        let ctx = tc.active_context().unwrap();
        assert!(ctx.object(extra).is_err());
        let got = ctx.get_property(obj, prop).unwrap();
        assert!(got.strict_equals(&JsValue::Int32(5)));
        assert!(ctx.is_root(obj));
    }

    #[test]
    fn test_inflate_resumes_allocation_sequence() {
        let mut tc = ThreadContext::new();
        let ctx_id = tc.create_context();
        tc.set_active(ctx_id).unwrap();
        let a = tc.active_context_mut().unwrap().allocate_object();
        let snap = HeapSnapshot::extract(&tc, 1).unwrap();

        let b_before = tc.active_context_mut().unwrap().allocate_object();
        snap.inflate(&mut tc).unwrap();
        let b_after = tc.active_context_mut().unwrap().allocate_object();
        assert_eq!(b_before, b_after);
        assert!(a.0 < b_after.0);
    }

    #[test]
    fn test_inflate_destroys_unrecorded_realms() {
        let mut tc = ThreadContext::new();
        let first = tc.create_context();
        tc.set_active(first).unwrap();
        let snap = HeapSnapshot::extract(&tc, 1).unwrap();

        let second = tc.create_context();
        snap.inflate(&mut tc).unwrap();
        assert!(tc.context(second).is_err());
        assert!(tc.context(first).is_ok());
        assert_eq!(tc.active_id(), Some(first));
    }

    #[test]
    fn test_inflate_recreates_missing_realms() {
        let mut tc = ThreadContext::new();
        let first = tc.create_context();
        tc.set_active(first).unwrap();
        let snap = HeapSnapshot::extract(&tc, 1).unwrap();

        tc.destroy_context(first).unwrap();
        snap.inflate(&mut tc).unwrap();
        assert!(tc.context(first).is_ok());
        assert_eq!(tc.active_id(), Some(first));
    }
}

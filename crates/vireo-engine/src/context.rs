//! Script and thread contexts
//!
//! A `ThreadContext` owns one property-interning table and any number of
//! `ScriptContext`s (one per global realm). All heap mutation goes through
//! the script context so the TTD log can observe and later replay it.

use crate::object::{ErrorKind, JsObject, ObjectId, ObjectKind, TypedArrayInfo};
use crate::property::{PropertyId, PropertyTable};
use crate::source::FunctionSource;
use crate::value::JsValue;
use crate::{EngineError, EngineResult};
use rustc_hash::{FxHashMap, FxHashSet};

/// Stable id of a script context within its thread context
pub type ScriptContextId = u32;

/// One JavaScript global realm
#[derive(Debug)]
pub struct ScriptContext {
    /// This realm's id
    pub id: ScriptContextId,
    objects: FxHashMap<ObjectId, JsObject>,
    next_object_id: u64,
    global: ObjectId,
    roots: FxHashSet<ObjectId>,
    exception: Option<JsValue>,
}

impl ScriptContext {
    /// Create a realm with a fresh global object rooted at id 1.
    /// Id 0 is reserved so a zero id always means "no object".
    pub fn new(id: ScriptContextId) -> Self {
        let mut objects = FxHashMap::default();
        let global = ObjectId(1);
        objects.insert(global, JsObject::new(ObjectKind::Plain));
        let mut roots = FxHashSet::default();
        roots.insert(global);
        Self {
            id,
            objects,
            next_object_id: 2,
            global,
            roots,
            exception: None,
        }
    }

    /// The realm's global object
    pub fn global_object(&self) -> ObjectId {
        self.global
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn alloc(&mut self, obj: JsObject) -> ObjectId {
        let id = ObjectId(self.next_object_id);
        self.next_object_id += 1;
        self.objects.insert(id, obj);
        id
    }

    /// Allocate a plain object
    pub fn allocate_object(&mut self) -> ObjectId {
        self.alloc(JsObject::new(ObjectKind::Plain))
    }

    /// Allocate a host-owned external object
    pub fn allocate_external_object(&mut self) -> ObjectId {
        self.alloc(JsObject::new(ObjectKind::External))
    }

    /// Allocate an array of `len` undefined elements
    pub fn allocate_array(&mut self, len: usize) -> ObjectId {
        self.alloc(JsObject::new_array(len))
    }

    /// Allocate an array buffer of `len` zeroed bytes
    pub fn allocate_array_buffer(&mut self, len: usize) -> ObjectId {
        self.alloc(JsObject::new_array_buffer(len))
    }

    /// Allocate an array buffer whose initial contents are host-supplied
    pub fn allocate_external_array_buffer(&mut self, bytes: Vec<u8>) -> ObjectId {
        let mut obj = JsObject::new(ObjectKind::ExternalArrayBuffer);
        obj.buffer = bytes;
        self.alloc(obj)
    }

    /// Allocate a function closing over the given body artifact
    pub fn allocate_function(&mut self, body_id: u64) -> ObjectId {
        self.alloc(JsObject::new(ObjectKind::Function { body_id }))
    }

    /// Allocate an error object of the given family
    pub fn allocate_error(&mut self, kind: ErrorKind, message: JsValue) -> ObjectId {
        let mut obj = JsObject::new(ObjectKind::Error(kind));
        // Message stored in dense slot 0 so allocation needs no property ids.
        obj.elements.push(message);
        self.alloc(obj)
    }

    /// Borrow an object
    pub fn object(&self, id: ObjectId) -> EngineResult<&JsObject> {
        self.objects.get(&id).ok_or(EngineError::UnknownObject(id.0))
    }

    /// Mutably borrow an object
    pub fn object_mut(&mut self, id: ObjectId) -> EngineResult<&mut JsObject> {
        self.objects
            .get_mut(&id)
            .ok_or(EngineError::UnknownObject(id.0))
    }

    /// Get a named property, walking the prototype chain
    pub fn get_property(&self, id: ObjectId, prop: PropertyId) -> EngineResult<JsValue> {
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            let obj = self.object(cur)?;
            if let Some(v) = obj.properties.get(&prop) {
                return Ok(v.clone());
            }
            cursor = obj.prototype;
        }
        Ok(JsValue::Undefined)
    }

    /// Set a named property on the object itself
    pub fn set_property(
        &mut self,
        id: ObjectId,
        prop: PropertyId,
        value: JsValue,
    ) -> EngineResult<()> {
        let obj = self.object_mut(id)?;
        if obj.prevent_extensions && !obj.properties.contains_key(&prop) {
            return Err(EngineError::TypeError(
                "cannot add property to non-extensible object".to_string(),
            ));
        }
        obj.properties.insert(prop, value);
        Ok(())
    }

    /// Define an own property (ignores extensibility, used by defineProperty)
    pub fn define_property(
        &mut self,
        id: ObjectId,
        prop: PropertyId,
        value: JsValue,
    ) -> EngineResult<()> {
        self.object_mut(id)?.properties.insert(prop, value);
        Ok(())
    }

    /// Delete an own property; true when a property was removed
    pub fn delete_property(&mut self, id: ObjectId, prop: PropertyId) -> EngineResult<bool> {
        Ok(self.object_mut(id)?.properties.remove(&prop).is_some())
    }

    /// True when the property is reachable on the object or its chain
    pub fn has_property(&self, id: ObjectId, prop: PropertyId) -> EngineResult<bool> {
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            let obj = self.object(cur)?;
            if obj.properties.contains_key(&prop) {
                return Ok(true);
            }
            cursor = obj.prototype;
        }
        Ok(false)
    }

    /// Indexed element load (dense storage only, no chain walk)
    pub fn get_index(&self, id: ObjectId, index: usize) -> EngineResult<JsValue> {
        let obj = self.object(id)?;
        Ok(obj.elements.get(index).cloned().unwrap_or(JsValue::Undefined))
    }

    /// Indexed element store; grows dense storage as needed
    pub fn set_index(&mut self, id: ObjectId, index: usize, value: JsValue) -> EngineResult<()> {
        let obj = self.object_mut(id)?;
        if index >= obj.elements.len() {
            obj.elements.resize(index + 1, JsValue::Undefined);
        }
        obj.elements[index] = value;
        Ok(())
    }

    /// Read the prototype link
    pub fn get_prototype(&self, id: ObjectId) -> EngineResult<Option<ObjectId>> {
        Ok(self.object(id)?.prototype)
    }

    /// Set the prototype link, rejecting cycles
    pub fn set_prototype(&mut self, id: ObjectId, proto: Option<ObjectId>) -> EngineResult<()> {
        if let Some(p) = proto {
            self.object(p)?;
            let mut cursor = Some(p);
            while let Some(cur) = cursor {
                if cur == id {
                    return Err(EngineError::TypeError(
                        "cyclic prototype chain".to_string(),
                    ));
                }
                cursor = self.object(cur)?.prototype;
            }
        }
        self.object_mut(id)?.prototype = proto;
        Ok(())
    }

    /// `value instanceof ctor`: walks value's prototype chain looking for
    /// the constructor's `prototype` property (passed as an interned id).
    pub fn instance_of(
        &self,
        value: &JsValue,
        ctor: ObjectId,
        prototype_prop: PropertyId,
    ) -> EngineResult<bool> {
        let ctor_obj = self.object(ctor)?;
        if !ctor_obj.is_function() {
            return Err(EngineError::TypeError(
                "right-hand side of instanceof is not callable".to_string(),
            ));
        }
        let target = match self.get_property(ctor, prototype_prop)? {
            JsValue::Object(p) => p,
            _ => return Ok(false),
        };
        let mut cursor = match value {
            JsValue::Object(id) => self.object(*id)?.prototype,
            _ => return Ok(false),
        };
        while let Some(cur) = cursor {
            if cur == target {
                return Ok(true);
            }
            cursor = self.object(cur)?.prototype;
        }
        Ok(false)
    }

    /// Own string-keyed property ids in ascending id order
    pub fn own_property_names(
        &self,
        id: ObjectId,
        table: &PropertyTable,
    ) -> EngineResult<Vec<PropertyId>> {
        let obj = self.object(id)?;
        let mut props: Vec<PropertyId> = obj
            .properties
            .keys()
            .copied()
            .filter(|p| table.get(*p).map(|r| !r.is_symbol).unwrap_or(true))
            .collect();
        props.sort_unstable();
        Ok(props)
    }

    /// Own symbol-keyed property ids in ascending id order
    pub fn own_property_symbols(
        &self,
        id: ObjectId,
        table: &PropertyTable,
    ) -> EngineResult<Vec<PropertyId>> {
        let obj = self.object(id)?;
        let mut props: Vec<PropertyId> = obj
            .properties
            .keys()
            .copied()
            .filter(|p| table.get(*p).map(|r| r.is_symbol).unwrap_or(false))
            .collect();
        props.sort_unstable();
        Ok(props)
    }

    /// Typed-array view descriptor, when the object carries one
    pub fn typed_array_info(&self, id: ObjectId) -> EngineResult<Option<TypedArrayInfo>> {
        Ok(self.object(id)?.typed_array)
    }

    /// Copy bytes between array buffers
    pub fn raw_buffer_copy(
        &mut self,
        dst: ObjectId,
        dst_offset: usize,
        src: ObjectId,
        src_offset: usize,
        len: usize,
    ) -> EngineResult<()> {
        let bytes: Vec<u8> = {
            let src_obj = self.object(src)?;
            let end = src_offset
                .checked_add(len)
                .filter(|&e| e <= src_obj.buffer.len())
                .ok_or_else(|| EngineError::TypeError("source range out of bounds".to_string()))?;
            src_obj.buffer[src_offset..end].to_vec()
        };
        let dst_obj = self.object_mut(dst)?;
        let end = dst_offset
            .checked_add(len)
            .filter(|&e| e <= dst_obj.buffer.len())
            .ok_or_else(|| EngineError::TypeError("destination range out of bounds".to_string()))?;
        dst_obj.buffer[dst_offset..end].copy_from_slice(&bytes);
        Ok(())
    }

    /// Overwrite a byte range of an array buffer
    pub fn raw_buffer_modify(
        &mut self,
        id: ObjectId,
        offset: usize,
        bytes: &[u8],
    ) -> EngineResult<()> {
        let obj = self.object_mut(id)?;
        let end = offset
            .checked_add(bytes.len())
            .filter(|&e| e <= obj.buffer.len())
            .ok_or_else(|| EngineError::TypeError("buffer range out of bounds".to_string()))?;
        obj.buffer[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Pin an object as a GC root
    pub fn add_root_ref(&mut self, id: ObjectId) -> EngineResult<()> {
        self.object(id)?;
        self.roots.insert(id);
        Ok(())
    }

    /// Unpin an object
    pub fn remove_root_ref(&mut self, id: ObjectId) {
        self.roots.remove(&id);
    }

    /// True when the object is pinned
    pub fn is_root(&self, id: ObjectId) -> bool {
        self.roots.contains(&id)
    }

    /// Record a thrown value as the pending exception
    pub fn set_exception(&mut self, value: JsValue) {
        self.exception = Some(value);
    }

    /// Take the pending exception, clearing it
    pub fn get_and_clear_exception(&mut self) -> Option<JsValue> {
        self.exception.take()
    }

    /// True when an exception is pending
    pub fn has_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Snapshot view: every live object, in id order
    pub fn objects_sorted(&self) -> Vec<(ObjectId, &JsObject)> {
        let mut all: Vec<(ObjectId, &JsObject)> =
            self.objects.iter().map(|(id, o)| (*id, o)).collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    /// Root set, in id order
    pub fn roots_sorted(&self) -> Vec<ObjectId> {
        let mut all: Vec<ObjectId> = self.roots.iter().copied().collect();
        all.sort_unstable();
        all
    }

    /// Rebuild the realm from inflated state. Used by snapshot inflate:
    /// the object table, roots, and allocation cursor come back exactly as
    /// extracted so subsequent allocations continue the recorded sequence.
    pub fn restore(
        &mut self,
        objects: FxHashMap<ObjectId, JsObject>,
        roots: FxHashSet<ObjectId>,
        next_object_id: u64,
        global: ObjectId,
    ) {
        self.objects = objects;
        self.roots = roots;
        self.next_object_id = next_object_id;
        self.global = global;
        self.exception = None;
    }

    /// Allocation cursor (snapshot extraction records this)
    pub fn next_object_id(&self) -> u64 {
        self.next_object_id
    }
}

/// Per-client-runtime engine state: the property table, the realms, and the
/// function-body artifacts produced by top-level code loads.
#[derive(Debug, Default)]
pub struct ThreadContext {
    /// Interned property records, shared by all realms
    pub properties: PropertyTable,
    contexts: FxHashMap<ScriptContextId, ScriptContext>,
    active: Option<ScriptContextId>,
    next_context_id: ScriptContextId,
    sources: FxHashMap<u64, FunctionSource>,
    next_body_id: u64,
}

impl ThreadContext {
    /// Fresh thread context with no realms
    pub fn new() -> Self {
        Self {
            properties: PropertyTable::new(),
            contexts: FxHashMap::default(),
            active: None,
            next_context_id: 1,
            sources: FxHashMap::default(),
            next_body_id: 1,
        }
    }

    /// Create a realm and return its id
    pub fn create_context(&mut self) -> ScriptContextId {
        let id = self.next_context_id;
        self.next_context_id += 1;
        self.contexts.insert(id, ScriptContext::new(id));
        id
    }

    /// Recreate a realm under an explicit id, advancing the id cursor past
    /// it. Snapshot inflate uses this so restored realms keep their recorded
    /// ids; an existing realm with the same id is reused as-is (the caller
    /// overwrites its state via [`ScriptContext::restore`]).
    pub fn restore_context(&mut self, id: ScriptContextId) -> &mut ScriptContext {
        if id >= self.next_context_id {
            self.next_context_id = id + 1;
        }
        self.contexts.entry(id).or_insert_with(|| ScriptContext::new(id))
    }

    /// Destroy a realm; clears the active pointer if it referenced it
    pub fn destroy_context(&mut self, id: ScriptContextId) -> EngineResult<()> {
        self.contexts
            .remove(&id)
            .ok_or(EngineError::UnknownContext(id))?;
        if self.active == Some(id) {
            self.active = None;
        }
        Ok(())
    }

    /// Select the realm subsequent operations target
    pub fn set_active(&mut self, id: ScriptContextId) -> EngineResult<()> {
        if !self.contexts.contains_key(&id) {
            return Err(EngineError::UnknownContext(id));
        }
        self.active = Some(id);
        Ok(())
    }

    /// The currently active realm id
    pub fn active_id(&self) -> Option<ScriptContextId> {
        self.active
    }

    /// Borrow a realm by id
    pub fn context(&self, id: ScriptContextId) -> EngineResult<&ScriptContext> {
        self.contexts.get(&id).ok_or(EngineError::UnknownContext(id))
    }

    /// Mutably borrow a realm by id
    pub fn context_mut(&mut self, id: ScriptContextId) -> EngineResult<&mut ScriptContext> {
        self.contexts
            .get_mut(&id)
            .ok_or(EngineError::UnknownContext(id))
    }

    /// Mutably borrow the active realm
    pub fn active_context_mut(&mut self) -> EngineResult<&mut ScriptContext> {
        let id = self
            .active
            .ok_or_else(|| EngineError::TypeError("no active script context".to_string()))?;
        self.context_mut(id)
    }

    /// Borrow the active realm
    pub fn active_context(&self) -> EngineResult<&ScriptContext> {
        let id = self
            .active
            .ok_or_else(|| EngineError::TypeError("no active script context".to_string()))?;
        self.context(id)
    }

    /// All realm ids in creation order
    pub fn context_ids(&self) -> Vec<ScriptContextId> {
        let mut ids: Vec<ScriptContextId> = self.contexts.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Register a function-body artifact, returning its stable body id
    pub fn register_source(&mut self, mut source: FunctionSource) -> u64 {
        let id = self.next_body_id;
        self.next_body_id += 1;
        source.body_id = id;
        self.sources.insert(id, source);
        id
    }

    /// Register a body artifact under an explicit id (log inflate path)
    pub fn register_source_with_id(&mut self, source: FunctionSource) {
        if source.body_id >= self.next_body_id {
            self.next_body_id = source.body_id + 1;
        }
        self.sources.insert(source.body_id, source);
    }

    /// Look up a body artifact
    pub fn source(&self, body_id: u64) -> Option<&FunctionSource> {
        self.sources.get(&body_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ScriptContext {
        ScriptContext::new(1)
    }

    #[test]
    fn test_object_ids_monotonic() {
        let mut sc = ctx();
        let a = sc.allocate_object();
        let b = sc.allocate_array(0);
        let c = sc.allocate_object();
        assert!(a.0 < b.0 && b.0 < c.0);
    }

    #[test]
    fn test_property_chain_lookup() {
        let mut sc = ctx();
        let proto = sc.allocate_object();
        let obj = sc.allocate_object();
        sc.set_prototype(obj, Some(proto)).unwrap();
        sc.set_property(proto, 20, JsValue::Int32(5)).unwrap();
        let got = sc.get_property(obj, 20).unwrap();
        assert!(got.strict_equals(&JsValue::Int32(5)));
        assert!(sc.has_property(obj, 20).unwrap());
        assert!(!sc.has_property(obj, 21).unwrap());
    }

    #[test]
    fn test_prototype_cycle_rejected() {
        let mut sc = ctx();
        let a = sc.allocate_object();
        let b = sc.allocate_object();
        sc.set_prototype(b, Some(a)).unwrap();
        assert!(sc.set_prototype(a, Some(b)).is_err());
    }

    #[test]
    fn test_set_index_grows() {
        let mut sc = ctx();
        let arr = sc.allocate_array(1);
        sc.set_index(arr, 4, JsValue::Int32(9)).unwrap();
        assert!(sc.get_index(arr, 4).unwrap().strict_equals(&JsValue::Int32(9)));
        assert!(sc.get_index(arr, 2).unwrap().is_undefined());
    }

    #[test]
    fn test_instance_of() {
        let mut sc = ctx();
        let mut table = PropertyTable::new();
        let proto_prop = table.intern("prototype");

        let ctor = sc.allocate_function(1);
        let proto = sc.allocate_object();
        sc.set_property(ctor, proto_prop, JsValue::Object(proto))
            .unwrap();
        let inst = sc.allocate_object();
        sc.set_prototype(inst, Some(proto)).unwrap();

        assert!(sc
            .instance_of(&JsValue::Object(inst), ctor, proto_prop)
            .unwrap());
        let other = sc.allocate_object();
        assert!(!sc
            .instance_of(&JsValue::Object(other), ctor, proto_prop)
            .unwrap());
    }

    #[test]
    fn test_raw_buffer_copy_bounds() {
        let mut sc = ctx();
        let src = sc.allocate_array_buffer(4);
        let dst = sc.allocate_array_buffer(4);
        sc.raw_buffer_modify(src, 0, &[1, 2, 3, 4]).unwrap();
        sc.raw_buffer_copy(dst, 1, src, 0, 3).unwrap();
        assert_eq!(sc.object(dst).unwrap().buffer, vec![0, 1, 2, 3]);
        assert!(sc.raw_buffer_copy(dst, 2, src, 0, 3).is_err());
    }

    #[test]
    fn test_exception_take_clears() {
        let mut sc = ctx();
        sc.set_exception(JsValue::Int32(1));
        assert!(sc.has_exception());
        assert!(sc.get_and_clear_exception().is_some());
        assert!(!sc.has_exception());
        assert!(sc.get_and_clear_exception().is_none());
    }

    #[test]
    fn test_restore_context_advances_cursor() {
        let mut tc = ThreadContext::new();
        tc.restore_context(5);
        assert!(tc.context(5).is_ok());
        let next = tc.create_context();
        assert_eq!(next, 6);
    }

    #[test]
    fn test_thread_context_lifecycle() {
        let mut tc = ThreadContext::new();
        let a = tc.create_context();
        let b = tc.create_context();
        assert_ne!(a, b);
        tc.set_active(a).unwrap();
        assert_eq!(tc.active_id(), Some(a));
        tc.destroy_context(a).unwrap();
        assert_eq!(tc.active_id(), None);
        assert!(tc.context(a).is_err());
        assert!(tc.context(b).is_ok());
    }
}

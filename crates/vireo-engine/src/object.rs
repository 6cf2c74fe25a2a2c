//! Object model
//!
//! Heap objects live in per-script-context tables keyed by `ObjectId`.
//! Ids are assigned monotonically per context, which makes them stable
//! across record/replay: replaying the same allocation sequence yields the
//! same ids, so logged references resolve without pointer translation.

use crate::property::PropertyId;
use crate::value::JsValue;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Stable heap object identifier, monotonic per script context
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ObjectId(pub u64);

/// Error constructor families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Plain `Error`
    Error,
    /// `TypeError`
    Type,
    /// `RangeError`
    Range,
    /// `SyntaxError`
    Syntax,
    /// `ReferenceError`
    Reference,
    /// `URIError`
    Uri,
}

/// What kind of heap object this is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Ordinary object
    Plain,
    /// Array with dense element storage
    Array,
    /// ArrayBuffer backed by engine-owned bytes
    ArrayBuffer,
    /// ArrayBuffer whose bytes are owned by the host
    ExternalArrayBuffer,
    /// Host-provided external object (opaque payload)
    External,
    /// Function object referencing a function body artifact
    Function {
        /// Id of the function body this closure executes
        body_id: u64,
    },
    /// Error object
    Error(ErrorKind),
}

/// View of a typed array: which buffer it aliases and how
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedArrayInfo {
    /// Backing buffer object
    pub buffer: ObjectId,
    /// Offset of the view into the buffer, in bytes
    pub byte_offset: u32,
    /// View length in elements
    pub length: u32,
    /// Element width in bytes
    pub element_size: u8,
}

/// One heap object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsObject {
    /// Object kind
    pub kind: ObjectKind,
    /// Prototype link
    pub prototype: Option<ObjectId>,
    /// Named properties
    pub properties: FxHashMap<PropertyId, JsValue>,
    /// Dense indexed elements (arrays)
    pub elements: Vec<JsValue>,
    /// Raw bytes (array buffers)
    pub buffer: Vec<u8>,
    /// Typed-array view descriptor, when this object is a view
    pub typed_array: Option<TypedArrayInfo>,
    /// Non-extensible flag set by `Object.preventExtensions`
    pub prevent_extensions: bool,
}

impl JsObject {
    /// New object of the given kind with no prototype
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            prototype: None,
            properties: FxHashMap::default(),
            elements: Vec::new(),
            buffer: Vec::new(),
            typed_array: None,
            prevent_extensions: false,
        }
    }

    /// New array with `len` undefined elements
    pub fn new_array(len: usize) -> Self {
        let mut obj = Self::new(ObjectKind::Array);
        obj.elements = vec![JsValue::Undefined; len];
        obj
    }

    /// New array buffer of `len` zeroed bytes
    pub fn new_array_buffer(len: usize) -> Self {
        let mut obj = Self::new(ObjectKind::ArrayBuffer);
        obj.buffer = vec![0u8; len];
        obj
    }

    /// True when this object is callable
    pub fn is_function(&self) -> bool {
        matches!(self.kind, ObjectKind::Function { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_array_prefills_undefined() {
        let arr = JsObject::new_array(3);
        assert_eq!(arr.elements.len(), 3);
        assert!(arr.elements.iter().all(|v| v.is_undefined()));
    }

    #[test]
    fn test_array_buffer_zeroed() {
        let buf = JsObject::new_array_buffer(16);
        assert_eq!(buf.buffer.len(), 16);
        assert!(buf.buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_function_kind() {
        let f = JsObject::new(ObjectKind::Function { body_id: 9 });
        assert!(f.is_function());
        assert!(!JsObject::new(ObjectKind::Plain).is_function());
    }
}

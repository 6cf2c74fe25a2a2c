//! Tagged runtime values
//!
//! `JsValue` is the engine's boxed value representation. Heap references are
//! carried as `ObjectId`s (monotonic per script context) rather than raw
//! pointers, so values remain meaningful after a snapshot/inflate cycle.

use crate::object::ObjectId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A runtime value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JsValue {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit integer fast path
    Int32(i32),
    /// Double-precision number
    Double(f64),
    /// Interned or heap string
    String(
        #[serde(
            serialize_with = "ser_arc_str",
            deserialize_with = "de_arc_str"
        )]
        Arc<str>,
    ),
    /// Symbol, identified by its interned property record
    Symbol(u32),
    /// Heap object reference
    Object(ObjectId),
}

fn ser_arc_str<S: serde::Serializer>(s: &Arc<str>, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(s)
}

fn de_arc_str<'de, D: serde::Deserializer<'de>>(de: D) -> Result<Arc<str>, D::Error> {
    let s = String::deserialize(de)?;
    Ok(Arc::from(s.as_str()))
}

impl JsValue {
    /// Construct a string value from any string-ish input
    pub fn string(s: impl AsRef<str>) -> Self {
        JsValue::String(Arc::from(s.as_ref()))
    }

    /// True for `undefined`
    pub fn is_undefined(&self) -> bool {
        matches!(self, JsValue::Undefined)
    }

    /// True for any heap object reference
    pub fn is_object(&self) -> bool {
        matches!(self, JsValue::Object(_))
    }

    /// The referenced object id, if this is an object value
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            JsValue::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Numeric coercion for the fast paths the runtime actually takes:
    /// ints widen to doubles, booleans map to 0/1, everything else is NaN.
    pub fn to_number(&self) -> f64 {
        match self {
            JsValue::Int32(i) => *i as f64,
            JsValue::Double(d) => *d,
            JsValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            JsValue::Null => 0.0,
            JsValue::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    /// Boolean coercion
    pub fn to_bool(&self) -> bool {
        match self {
            JsValue::Undefined | JsValue::Null => false,
            JsValue::Bool(b) => *b,
            JsValue::Int32(i) => *i != 0,
            JsValue::Double(d) => *d != 0.0 && !d.is_nan(),
            JsValue::String(s) => !s.is_empty(),
            JsValue::Symbol(_) | JsValue::Object(_) => true,
        }
    }

    /// String coercion for primitives; objects render as `[object]`
    pub fn to_display_string(&self) -> String {
        match self {
            JsValue::Undefined => "undefined".to_string(),
            JsValue::Null => "null".to_string(),
            JsValue::Bool(b) => b.to_string(),
            JsValue::Int32(i) => i.to_string(),
            JsValue::Double(d) => {
                if d.fract() == 0.0 && d.is_finite() && d.abs() < 1e15 {
                    format!("{}", *d as i64)
                } else {
                    d.to_string()
                }
            }
            JsValue::String(s) => s.to_string(),
            JsValue::Symbol(id) => format!("Symbol({})", id),
            JsValue::Object(_) => "[object]".to_string(),
        }
    }

    /// Loose structural equality: scalar kinds compare by coerced value,
    /// objects compare by identity.
    pub fn loose_equals(&self, other: &JsValue) -> bool {
        match (self, other) {
            (JsValue::Undefined, JsValue::Undefined)
            | (JsValue::Null, JsValue::Null)
            | (JsValue::Undefined, JsValue::Null)
            | (JsValue::Null, JsValue::Undefined) => true,
            (JsValue::String(a), JsValue::String(b)) => a == b,
            (JsValue::Symbol(a), JsValue::Symbol(b)) => a == b,
            (JsValue::Object(a), JsValue::Object(b)) => a == b,
            (a, b) if a.is_numeric_like() && b.is_numeric_like() => {
                let (x, y) = (a.to_number(), b.to_number());
                x == y
            }
            _ => false,
        }
    }

    /// Strict equality: same kind, same value; objects by identity.
    pub fn strict_equals(&self, other: &JsValue) -> bool {
        match (self, other) {
            (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
            (JsValue::Bool(a), JsValue::Bool(b)) => a == b,
            (JsValue::String(a), JsValue::String(b)) => a == b,
            (JsValue::Symbol(a), JsValue::Symbol(b)) => a == b,
            (JsValue::Object(a), JsValue::Object(b)) => a == b,
            (JsValue::Int32(a), JsValue::Int32(b)) => a == b,
            (JsValue::Double(a), JsValue::Double(b)) => a == b,
            (JsValue::Int32(a), JsValue::Double(b)) | (JsValue::Double(b), JsValue::Int32(a)) => {
                (*a as f64) == *b
            }
            _ => false,
        }
    }

    fn is_numeric_like(&self) -> bool {
        matches!(
            self,
            JsValue::Int32(_) | JsValue::Double(_) | JsValue::Bool(_) | JsValue::String(_)
        )
    }
}

impl Default for JsValue {
    fn default() -> Self {
        JsValue::Undefined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_number_coercions() {
        assert_eq!(JsValue::Int32(42).to_number(), 42.0);
        assert_eq!(JsValue::Bool(true).to_number(), 1.0);
        assert_eq!(JsValue::string("3.5").to_number(), 3.5);
        assert!(JsValue::Undefined.to_number().is_nan());
    }

    #[test]
    fn test_strict_vs_loose_equality() {
        assert!(JsValue::Int32(1).loose_equals(&JsValue::string("1")));
        assert!(!JsValue::Int32(1).strict_equals(&JsValue::string("1")));
        assert!(JsValue::Int32(1).strict_equals(&JsValue::Double(1.0)));
        assert!(JsValue::Undefined.loose_equals(&JsValue::Null));
        assert!(!JsValue::Undefined.strict_equals(&JsValue::Null));
    }

    #[test]
    fn test_object_identity() {
        let a = JsValue::Object(ObjectId(7));
        let b = JsValue::Object(ObjectId(7));
        let c = JsValue::Object(ObjectId(8));
        assert!(a.strict_equals(&b));
        assert!(!a.strict_equals(&c));
    }

    #[test]
    fn test_value_serde_roundtrip() {
        let v = JsValue::string("hello");
        let json = serde_json::to_string(&v).unwrap();
        let back: JsValue = serde_json::from_str(&json).unwrap();
        assert!(v.strict_equals(&back));
    }
}

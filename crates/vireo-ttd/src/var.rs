//! Log-stable indirect values
//!
//! Entries never hold engine pointers or `JsValue`s directly: scalars are
//! carried inline and heap references become the object's log-stable id.
//! Replaying the same allocation sequence reproduces the same ids, so a
//! `TtdVar` written during recording resolves during replay without any
//! translation table.

use vireo_engine::{JsValue, ObjectId};

/// A value as the log stores it
#[derive(Debug, Clone, PartialEq)]
pub enum TtdVar {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean scalar
    Bool(bool),
    /// Integer scalar (widened from the engine's 32-bit fast path)
    Int(i64),
    /// Double scalar
    Double(f64),
    /// String contents, deep-copied into the entry
    String(Box<str>),
    /// Symbol by its interned property record id
    Symbol(u32),
    /// Heap reference by log-stable object id
    LogObject(u64),
}

impl TtdVar {
    /// Capture an engine value into its log representation
    pub fn from_value(value: &JsValue) -> Self {
        match value {
            JsValue::Undefined => TtdVar::Undefined,
            JsValue::Null => TtdVar::Null,
            JsValue::Bool(b) => TtdVar::Bool(*b),
            JsValue::Int32(i) => TtdVar::Int(*i as i64),
            JsValue::Double(d) => TtdVar::Double(*d),
            JsValue::String(s) => TtdVar::String(Box::from(&**s)),
            JsValue::Symbol(id) => TtdVar::Symbol(*id),
            JsValue::Object(id) => TtdVar::LogObject(id.0),
        }
    }

    /// Reconstruct the engine value this entry recorded
    pub fn to_value(&self) -> JsValue {
        match self {
            TtdVar::Undefined => JsValue::Undefined,
            TtdVar::Null => JsValue::Null,
            TtdVar::Bool(b) => JsValue::Bool(*b),
            TtdVar::Int(i) => {
                if let Ok(narrow) = i32::try_from(*i) {
                    JsValue::Int32(narrow)
                } else {
                    JsValue::Double(*i as f64)
                }
            }
            TtdVar::Double(d) => JsValue::Double(*d),
            TtdVar::String(s) => JsValue::string(s),
            TtdVar::Symbol(id) => JsValue::Symbol(*id),
            TtdVar::LogObject(id) => JsValue::Object(ObjectId(*id)),
        }
    }

    /// The log object id, when this is a heap reference
    pub fn as_log_object(&self) -> Option<u64> {
        match self {
            TtdVar::LogObject(id) => Some(*id),
            _ => None,
        }
    }

    /// True for heap references
    pub fn is_log_object(&self) -> bool {
        matches!(self, TtdVar::LogObject(_))
    }

    /// True when the engine value would record as exactly this var.
    /// Replay uses this as its divergence check.
    pub fn matches_value(&self, value: &JsValue) -> bool {
        *self == TtdVar::from_value(value)
    }
}

impl Default for TtdVar {
    fn default() -> Self {
        TtdVar::Undefined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_becomes_log_id() {
        let v = JsValue::Object(ObjectId(42));
        let var = TtdVar::from_value(&v);
        assert_eq!(var, TtdVar::LogObject(42));
        assert!(var.matches_value(&v));
        assert!(!var.matches_value(&JsValue::Object(ObjectId(43))));
    }

    #[test]
    fn test_scalar_roundtrip() {
        for v in [
            JsValue::Undefined,
            JsValue::Null,
            JsValue::Bool(true),
            JsValue::Int32(-7),
            JsValue::Double(1.25),
            JsValue::string("hi"),
            JsValue::Symbol(3),
        ] {
            let var = TtdVar::from_value(&v);
            assert!(var.matches_value(&v));
            assert!(v.strict_equals(&var.to_value()));
        }
    }

    #[test]
    fn test_wide_int_widens_to_double() {
        let var = TtdVar::Int(i64::from(i32::MAX) + 1);
        match var.to_value() {
            JsValue::Double(d) => assert_eq!(d, (i64::from(i32::MAX) + 1) as f64),
            other => panic!("expected Double, got {:?}", other),
        }
    }
}

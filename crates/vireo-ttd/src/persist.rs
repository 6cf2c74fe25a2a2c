//! Binary log persistence
//!
//! A persisted log is one stream: a little-endian payload followed by a
//! 32-byte SHA-256 digest of everything before it. The payload starts with
//! a header (magic, format version, recording arch and platform, the
//! diagnostics flag, and memory counters), then the entries, the property
//! table, and the three top-level script tables.
//!
//! Object ids, property ids, and body ids are written as their raw numeric
//! values; they are only meaningful relative to the entries in the same
//! stream, which is why the property and script tables travel with the log.
//! Parsing fails fast on magic, version, arch, or diagnostics-flag
//! mismatches; the platform string and memory counters are informational.

use crate::events::{ActionStatus, EventLogEntry, EventPayload};
use crate::list::BLOCK_CAPACITY;
use crate::log::EventLog;
use crate::snapshot::{ContextSnapshot, HeapSnapshot};
use crate::var::TtdVar;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use std::io::Read;
use thiserror::Error;
use vireo_engine::{
    EngineError, ErrorKind, FunctionSource, JsObject, JsValue, ObjectId, ObjectKind,
    PropertyRecord, PropertyTable, SourceOrigin, StreamProvider, TypedArrayInfo,
};

const MAGIC: [u8; 4] = *b"VTTL";
const FORMAT_VERSION: u32 = 1;
const DIGEST_LEN: usize = 32;

/// Why a persisted log could not be written or read back
#[derive(Debug, Error)]
pub enum LogFormatError {
    /// Underlying stream failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Stream provider failed
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The stream does not start with the log magic
    #[error("not a log stream (bad magic)")]
    BadMagic,
    /// The stream was written by an incompatible format version
    #[error("unsupported log format version {0}")]
    UnsupportedVersion(u32),
    /// The log was recorded on a different architecture
    #[error("log was recorded on '{recorded}', this host is '{host}'")]
    ArchMismatch {
        /// Architecture the recording host reported
        recorded: String,
        /// Architecture of the parsing host
        host: String,
    },
    /// The log's diagnostics flag does not match what the caller expects
    #[error("log diagnostics flag does not match the requested mode")]
    DiagMismatch,
    /// The trailing digest does not match the payload
    #[error("log checksum mismatch; the stream is corrupt")]
    ChecksumMismatch,
    /// The stream ends before the payload does
    #[error("log stream is truncated")]
    Truncated,
    /// The payload violates the format in some other way
    #[error("malformed log: {0}")]
    Malformed(String),
    /// An enum tag byte is outside its known range
    #[error("unknown {what} tag {tag}")]
    UnknownTag {
        /// Which enum the tag belongs to
        what: &'static str,
        /// The offending byte
        tag: u8,
    },
}

/// Parsed header of a persisted log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHeader {
    /// Format version the stream was written with
    pub version: u32,
    /// Architecture of the recording host
    pub arch: String,
    /// Platform of the recording host
    pub platform: String,
    /// True when the log was recorded with diagnostics on
    pub diagnostics: bool,
    /// Bytes the encoded entries occupy in the payload
    pub used_payload_bytes: u64,
    /// Bytes the in-memory event list had reserved at emit time
    pub reserved_payload_bytes: u64,
}

/// Everything a persisted log contains, decoded
#[derive(Debug)]
pub struct ParsedLog {
    /// Stream header
    pub header: LogHeader,
    /// Recorded entries in event-time order
    pub entries: Vec<EventLogEntry>,
    /// Property table at emit time, in id order
    pub properties: Vec<PropertyRecord>,
    /// Top-level bodies from host script loads
    pub loaded_scripts: Vec<FunctionSource>,
    /// Top-level bodies from `new Function`
    pub new_function_scripts: Vec<FunctionSource>,
    /// Top-level bodies from `eval`
    pub eval_scripts: Vec<FunctionSource>,
}

// -- little-endian primitives --

fn put_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_bits().to_le_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, b: &[u8]) {
    put_u32(buf, b.len() as u32);
    buf.extend_from_slice(b);
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_bytes(buf, s.as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], LogFormatError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or(LogFormatError::Truncated)?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, LogFormatError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, LogFormatError> {
        let mut a = [0u8; 4];
        a.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(a))
    }

    fn i32(&mut self) -> Result<i32, LogFormatError> {
        let mut a = [0u8; 4];
        a.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(a))
    }

    fn u64(&mut self) -> Result<u64, LogFormatError> {
        let mut a = [0u8; 8];
        a.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(a))
    }

    fn i64(&mut self) -> Result<i64, LogFormatError> {
        let mut a = [0u8; 8];
        a.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(a))
    }

    fn f64(&mut self) -> Result<f64, LogFormatError> {
        Ok(f64::from_bits(self.u64()?))
    }

    fn byte_slice(&mut self) -> Result<&'a [u8], LogFormatError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, LogFormatError> {
        let bytes = self.byte_slice()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| LogFormatError::Malformed("non-utf8 string".to_string()))
    }
}

// -- values --

fn encode_var(buf: &mut Vec<u8>, var: &TtdVar) {
    match var {
        TtdVar::Undefined => put_u8(buf, 0),
        TtdVar::Null => put_u8(buf, 1),
        TtdVar::Bool(b) => {
            put_u8(buf, 2);
            put_u8(buf, *b as u8);
        }
        TtdVar::Int(i) => {
            put_u8(buf, 3);
            put_i64(buf, *i);
        }
        TtdVar::Double(d) => {
            put_u8(buf, 4);
            put_f64(buf, *d);
        }
        TtdVar::String(s) => {
            put_u8(buf, 5);
            put_str(buf, s);
        }
        TtdVar::Symbol(id) => {
            put_u8(buf, 6);
            put_u32(buf, *id);
        }
        TtdVar::LogObject(id) => {
            put_u8(buf, 7);
            put_u64(buf, *id);
        }
    }
}

fn decode_var(r: &mut Reader<'_>) -> Result<TtdVar, LogFormatError> {
    Ok(match r.u8()? {
        0 => TtdVar::Undefined,
        1 => TtdVar::Null,
        2 => TtdVar::Bool(r.u8()? != 0),
        3 => TtdVar::Int(r.i64()?),
        4 => TtdVar::Double(r.f64()?),
        5 => TtdVar::String(r.string()?.into_boxed_str()),
        6 => TtdVar::Symbol(r.u32()?),
        7 => TtdVar::LogObject(r.u64()?),
        tag => return Err(LogFormatError::UnknownTag { what: "value", tag }),
    })
}

fn encode_vars(buf: &mut Vec<u8>, vars: &[TtdVar]) {
    put_u32(buf, vars.len() as u32);
    for v in vars {
        encode_var(buf, v);
    }
}

fn decode_vars(r: &mut Reader<'_>) -> Result<Vec<TtdVar>, LogFormatError> {
    let count = r.u32()?;
    let mut vars = Vec::new();
    for _ in 0..count {
        vars.push(decode_var(r)?);
    }
    Ok(vars)
}

fn encode_value(buf: &mut Vec<u8>, value: &JsValue) {
    match value {
        JsValue::Undefined => put_u8(buf, 0),
        JsValue::Null => put_u8(buf, 1),
        JsValue::Bool(b) => {
            put_u8(buf, 2);
            put_u8(buf, *b as u8);
        }
        JsValue::Int32(i) => {
            put_u8(buf, 3);
            put_i32(buf, *i);
        }
        JsValue::Double(d) => {
            put_u8(buf, 4);
            put_f64(buf, *d);
        }
        JsValue::String(s) => {
            put_u8(buf, 5);
            put_str(buf, s);
        }
        JsValue::Symbol(id) => {
            put_u8(buf, 6);
            put_u32(buf, *id);
        }
        JsValue::Object(id) => {
            put_u8(buf, 7);
            put_u64(buf, id.0);
        }
    }
}

fn decode_value(r: &mut Reader<'_>) -> Result<JsValue, LogFormatError> {
    Ok(match r.u8()? {
        0 => JsValue::Undefined,
        1 => JsValue::Null,
        2 => JsValue::Bool(r.u8()? != 0),
        3 => JsValue::Int32(r.i32()?),
        4 => JsValue::Double(r.f64()?),
        5 => JsValue::string(r.string()?),
        6 => JsValue::Symbol(r.u32()?),
        7 => JsValue::Object(ObjectId(r.u64()?)),
        tag => return Err(LogFormatError::UnknownTag { what: "engine value", tag }),
    })
}

// -- enum tags --

fn error_kind_tag(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Error => 0,
        ErrorKind::Type => 1,
        ErrorKind::Range => 2,
        ErrorKind::Syntax => 3,
        ErrorKind::Reference => 4,
        ErrorKind::Uri => 5,
    }
}

fn decode_error_kind(r: &mut Reader<'_>) -> Result<ErrorKind, LogFormatError> {
    Ok(match r.u8()? {
        0 => ErrorKind::Error,
        1 => ErrorKind::Type,
        2 => ErrorKind::Range,
        3 => ErrorKind::Syntax,
        4 => ErrorKind::Reference,
        5 => ErrorKind::Uri,
        tag => return Err(LogFormatError::UnknownTag { what: "error kind", tag }),
    })
}

fn origin_tag(origin: SourceOrigin) -> u8 {
    match origin {
        SourceOrigin::Load => 0,
        SourceOrigin::NewFunction => 1,
        SourceOrigin::Eval => 2,
    }
}

fn decode_origin(r: &mut Reader<'_>) -> Result<SourceOrigin, LogFormatError> {
    Ok(match r.u8()? {
        0 => SourceOrigin::Load,
        1 => SourceOrigin::NewFunction,
        2 => SourceOrigin::Eval,
        tag => return Err(LogFormatError::UnknownTag { what: "source origin", tag }),
    })
}

// -- heap objects and snapshots --

fn encode_object(buf: &mut Vec<u8>, obj: &JsObject) {
    match &obj.kind {
        ObjectKind::Plain => put_u8(buf, 0),
        ObjectKind::Array => put_u8(buf, 1),
        ObjectKind::ArrayBuffer => put_u8(buf, 2),
        ObjectKind::ExternalArrayBuffer => put_u8(buf, 3),
        ObjectKind::External => put_u8(buf, 4),
        ObjectKind::Function { body_id } => {
            put_u8(buf, 5);
            put_u64(buf, *body_id);
        }
        ObjectKind::Error(kind) => {
            put_u8(buf, 6);
            put_u8(buf, error_kind_tag(*kind));
        }
    }
    match obj.prototype {
        Some(p) => {
            put_u8(buf, 1);
            put_u64(buf, p.0);
        }
        None => put_u8(buf, 0),
    }
    let mut props: Vec<(u32, &JsValue)> =
        obj.properties.iter().map(|(k, v)| (*k, v)).collect();
    props.sort_by_key(|(k, _)| *k);
    put_u32(buf, props.len() as u32);
    for (prop, value) in props {
        put_u32(buf, prop);
        encode_value(buf, value);
    }
    put_u32(buf, obj.elements.len() as u32);
    for elem in &obj.elements {
        encode_value(buf, elem);
    }
    put_bytes(buf, &obj.buffer);
    match obj.typed_array {
        Some(view) => {
            put_u8(buf, 1);
            put_u64(buf, view.buffer.0);
            put_u32(buf, view.byte_offset);
            put_u32(buf, view.length);
            put_u8(buf, view.element_size);
        }
        None => put_u8(buf, 0),
    }
    put_u8(buf, obj.prevent_extensions as u8);
}

fn decode_object(r: &mut Reader<'_>) -> Result<JsObject, LogFormatError> {
    let kind = match r.u8()? {
        0 => ObjectKind::Plain,
        1 => ObjectKind::Array,
        2 => ObjectKind::ArrayBuffer,
        3 => ObjectKind::ExternalArrayBuffer,
        4 => ObjectKind::External,
        5 => ObjectKind::Function { body_id: r.u64()? },
        6 => ObjectKind::Error(decode_error_kind(r)?),
        tag => return Err(LogFormatError::UnknownTag { what: "object kind", tag }),
    };
    let prototype = match r.u8()? {
        0 => None,
        _ => Some(ObjectId(r.u64()?)),
    };
    let prop_count = r.u32()?;
    let mut properties = FxHashMap::default();
    for _ in 0..prop_count {
        let prop = r.u32()?;
        properties.insert(prop, decode_value(r)?);
    }
    let elem_count = r.u32()?;
    let mut elements = Vec::new();
    for _ in 0..elem_count {
        elements.push(decode_value(r)?);
    }
    let buffer = r.byte_slice()?.to_vec();
    let typed_array = match r.u8()? {
        0 => None,
        _ => Some(TypedArrayInfo {
            buffer: ObjectId(r.u64()?),
            byte_offset: r.u32()?,
            length: r.u32()?,
            element_size: r.u8()?,
        }),
    };
    let prevent_extensions = r.u8()? != 0;
    Ok(JsObject {
        kind,
        prototype,
        properties,
        elements,
        buffer,
        typed_array,
        prevent_extensions,
    })
}

fn encode_snapshot(buf: &mut Vec<u8>, snap: &HeapSnapshot) {
    put_i64(buf, snap.restore_time);
    match snap.active_context {
        Some(id) => {
            put_u8(buf, 1);
            put_u32(buf, id);
        }
        None => put_u8(buf, 0),
    }
    put_u32(buf, snap.contexts.len() as u32);
    for image in &snap.contexts {
        put_u32(buf, image.context_id);
        put_u64(buf, image.global.0);
        put_u64(buf, image.next_object_id);
        put_u32(buf, image.roots.len() as u32);
        for root in &image.roots {
            put_u64(buf, root.0);
        }
        put_u32(buf, image.objects.len() as u32);
        for (id, obj) in &image.objects {
            put_u64(buf, id.0);
            encode_object(buf, obj);
        }
    }
}

fn decode_snapshot(r: &mut Reader<'_>) -> Result<HeapSnapshot, LogFormatError> {
    let restore_time = r.i64()?;
    let active_context = match r.u8()? {
        0 => None,
        _ => Some(r.u32()?),
    };
    let ctx_count = r.u32()?;
    let mut contexts = Vec::new();
    for _ in 0..ctx_count {
        let context_id = r.u32()?;
        let global = ObjectId(r.u64()?);
        let next_object_id = r.u64()?;
        let root_count = r.u32()?;
        let mut roots = Vec::new();
        for _ in 0..root_count {
            roots.push(ObjectId(r.u64()?));
        }
        let obj_count = r.u32()?;
        let mut objects = Vec::new();
        for _ in 0..obj_count {
            let id = ObjectId(r.u64()?);
            objects.push((id, decode_object(r)?));
        }
        contexts.push(ContextSnapshot {
            context_id,
            global,
            next_object_id,
            objects,
            roots,
        });
    }
    Ok(HeapSnapshot {
        restore_time,
        active_context,
        contexts,
    })
}

// -- payloads --

fn encode_payload(buf: &mut Vec<u8>, payload: &EventPayload) {
    match payload {
        EventPayload::SnapshotMarker { snapshot } => {
            put_u8(buf, 0);
            encode_snapshot(buf, snapshot);
        }
        EventPayload::EventLoopYieldPoint => put_u8(buf, 1),
        EventPayload::TopLevelCodeLoad { body_id } => {
            put_u8(buf, 2);
            put_u64(buf, *body_id);
        }
        EventPayload::Telemetry { message, print } => {
            put_u8(buf, 3);
            put_str(buf, message);
            put_u8(buf, *print as u8);
        }
        EventPayload::ExplicitLogWrite => put_u8(buf, 4),
        EventPayload::DoubleValue { value } => {
            put_u8(buf, 5);
            put_f64(buf, *value);
        }
        EventPayload::StringValue { value } => {
            put_u8(buf, 6);
            put_str(buf, value);
        }
        EventPayload::RandomSeed { seed0, seed1 } => {
            put_u8(buf, 7);
            put_u64(buf, *seed0);
            put_u64(buf, *seed1);
        }
        EventPayload::PropertyEnumStep {
            returned,
            property_id,
            name,
        } => {
            put_u8(buf, 8);
            put_u8(buf, *returned as u8);
            put_u32(buf, *property_id);
            match name {
                Some(n) => {
                    put_u8(buf, 1);
                    put_str(buf, n);
                }
                None => put_u8(buf, 0),
            }
        }
        EventPayload::SymbolCreation { property_id } => {
            put_u8(buf, 9);
            put_u32(buf, *property_id);
        }
        EventPayload::ExternalCbRegister { callback_id } => {
            put_u8(buf, 10);
            put_i64(buf, *callback_id);
        }
        EventPayload::ExternalCall {
            function,
            args,
            nesting_depth,
        } => {
            put_u8(buf, 11);
            encode_var(buf, function);
            encode_vars(buf, args);
            put_u32(buf, *nesting_depth);
        }
        EventPayload::CallbackOp {
            create,
            cancel,
            repeating,
            callback_id,
        } => {
            put_u8(buf, 12);
            put_u8(buf, *create as u8);
            put_u8(buf, *cancel as u8);
            put_u8(buf, *repeating as u8);
            put_i64(buf, *callback_id);
        }
        EventPayload::CreateScriptContext => put_u8(buf, 13),
        EventPayload::SetActiveScriptContext { context_id } => {
            put_u8(buf, 14);
            put_u32(buf, *context_id);
        }
        EventPayload::DeadScriptContext { context_id } => {
            put_u8(buf, 15);
            put_u32(buf, *context_id);
        }
        EventPayload::HostProcessExit { exit_code } => {
            put_u8(buf, 16);
            put_i32(buf, *exit_code);
        }
        EventPayload::CreateInteger { value } => {
            put_u8(buf, 17);
            put_i32(buf, *value);
        }
        EventPayload::CreateNumber { value } => {
            put_u8(buf, 18);
            put_f64(buf, *value);
        }
        EventPayload::CreateBoolean { value } => {
            put_u8(buf, 19);
            put_u8(buf, *value as u8);
        }
        EventPayload::CreateString { value } => {
            put_u8(buf, 20);
            put_str(buf, value);
        }
        EventPayload::CreateSymbol { description } => {
            put_u8(buf, 21);
            put_str(buf, description);
        }
        EventPayload::CreateError { kind, message } => {
            put_u8(buf, 22);
            put_u8(buf, error_kind_tag(*kind));
            encode_var(buf, message);
        }
        EventPayload::VarToNumber { input } => {
            put_u8(buf, 23);
            encode_var(buf, input);
        }
        EventPayload::VarToBool { input } => {
            put_u8(buf, 24);
            encode_var(buf, input);
        }
        EventPayload::VarToString { input } => {
            put_u8(buf, 25);
            encode_var(buf, input);
        }
        EventPayload::VarToObject { input } => {
            put_u8(buf, 26);
            encode_var(buf, input);
        }
        EventPayload::AddRootRef { object } => {
            put_u8(buf, 27);
            put_u64(buf, *object);
        }
        EventPayload::RemoveRootRef { object } => {
            put_u8(buf, 28);
            put_u64(buf, *object);
        }
        EventPayload::AllocateObject => put_u8(buf, 29),
        EventPayload::AllocateExternalObject => put_u8(buf, 30),
        EventPayload::AllocateArray { length } => {
            put_u8(buf, 31);
            put_u32(buf, *length);
        }
        EventPayload::AllocateArrayBuffer { byte_length } => {
            put_u8(buf, 32);
            put_u32(buf, *byte_length);
        }
        EventPayload::AllocateExternalArrayBuffer { contents } => {
            put_u8(buf, 33);
            put_bytes(buf, contents);
        }
        EventPayload::AllocateFunction { body_id } => {
            put_u8(buf, 34);
            put_u64(buf, *body_id);
        }
        EventPayload::GetAndClearException => put_u8(buf, 35),
        EventPayload::SetException { value } => {
            put_u8(buf, 36);
            encode_var(buf, value);
        }
        EventPayload::HasProperty { object, property } => {
            put_u8(buf, 37);
            put_u64(buf, *object);
            put_u32(buf, *property);
        }
        EventPayload::InstanceOf { value, constructor } => {
            put_u8(buf, 38);
            encode_var(buf, value);
            put_u64(buf, *constructor);
        }
        EventPayload::Equals {
            left,
            right,
            strict,
        } => {
            put_u8(buf, 39);
            encode_var(buf, left);
            encode_var(buf, right);
            put_u8(buf, *strict as u8);
        }
        EventPayload::PropertyIdFromSymbol { symbol } => {
            put_u8(buf, 40);
            encode_var(buf, symbol);
        }
        EventPayload::GetPrototype { object } => {
            put_u8(buf, 41);
            put_u64(buf, *object);
        }
        EventPayload::GetProperty { object, property } => {
            put_u8(buf, 42);
            put_u64(buf, *object);
            put_u32(buf, *property);
        }
        EventPayload::GetIndex { object, index } => {
            put_u8(buf, 43);
            put_u64(buf, *object);
            put_u32(buf, *index);
        }
        EventPayload::GetOwnPropertyInfo { object, property } => {
            put_u8(buf, 44);
            put_u64(buf, *object);
            put_u32(buf, *property);
        }
        EventPayload::GetOwnPropertyNames { object } => {
            put_u8(buf, 45);
            put_u64(buf, *object);
        }
        EventPayload::GetOwnPropertySymbols { object } => {
            put_u8(buf, 46);
            put_u64(buf, *object);
        }
        EventPayload::GetTypedArrayInfo { object } => {
            put_u8(buf, 47);
            put_u64(buf, *object);
        }
        EventPayload::DefineProperty {
            object,
            property,
            value,
        } => {
            put_u8(buf, 48);
            put_u64(buf, *object);
            put_u32(buf, *property);
            encode_var(buf, value);
        }
        EventPayload::DeleteProperty { object, property } => {
            put_u8(buf, 49);
            put_u64(buf, *object);
            put_u32(buf, *property);
        }
        EventPayload::SetPrototype { object, prototype } => {
            put_u8(buf, 50);
            put_u64(buf, *object);
            encode_var(buf, prototype);
        }
        EventPayload::SetProperty {
            object,
            property,
            value,
        } => {
            put_u8(buf, 51);
            put_u64(buf, *object);
            put_u32(buf, *property);
            encode_var(buf, value);
        }
        EventPayload::SetIndex {
            object,
            index,
            value,
        } => {
            put_u8(buf, 52);
            put_u64(buf, *object);
            put_u32(buf, *index);
            encode_var(buf, value);
        }
        EventPayload::RawBufferCopy {
            dst,
            dst_offset,
            src,
            src_offset,
            length,
        } => {
            put_u8(buf, 53);
            put_u64(buf, *dst);
            put_u32(buf, *dst_offset);
            put_u64(buf, *src);
            put_u32(buf, *src_offset);
            put_u32(buf, *length);
        }
        EventPayload::RawBufferModify {
            object,
            offset,
            bytes,
        } => {
            put_u8(buf, 54);
            put_u64(buf, *object);
            put_u32(buf, *offset);
            put_bytes(buf, bytes);
        }
        EventPayload::RawBufferAsyncRegister {
            object,
            initial_pos,
        } => {
            put_u8(buf, 55);
            put_u64(buf, *object);
            put_u32(buf, *initial_pos);
        }
        EventPayload::RawBufferAsyncComplete {
            object,
            final_modification_pos,
        } => {
            put_u8(buf, 56);
            put_u64(buf, *object);
            put_u32(buf, *final_modification_pos);
        }
        EventPayload::ConstructCall { function, args } => {
            put_u8(buf, 57);
            put_u64(buf, *function);
            encode_vars(buf, args);
        }
        EventPayload::CodeParse { body_id, origin } => {
            put_u8(buf, 58);
            put_u64(buf, *body_id);
            put_u8(buf, origin_tag(*origin));
        }
        EventPayload::CallExistingFunction {
            function,
            args,
            nesting_depth,
            host_callback_id,
            rtr_snapshot,
        } => {
            put_u8(buf, 59);
            put_u64(buf, *function);
            encode_vars(buf, args);
            put_u32(buf, *nesting_depth);
            put_i64(buf, *host_callback_id);
            match rtr_snapshot {
                Some(snap) => {
                    put_u8(buf, 1);
                    encode_snapshot(buf, snap);
                }
                None => put_u8(buf, 0),
            }
        }
    }
}

fn decode_payload(r: &mut Reader<'_>) -> Result<EventPayload, LogFormatError> {
    Ok(match r.u8()? {
        0 => EventPayload::SnapshotMarker {
            snapshot: Box::new(decode_snapshot(r)?),
        },
        1 => EventPayload::EventLoopYieldPoint,
        2 => EventPayload::TopLevelCodeLoad { body_id: r.u64()? },
        3 => EventPayload::Telemetry {
            message: r.string()?,
            print: r.u8()? != 0,
        },
        4 => EventPayload::ExplicitLogWrite,
        5 => EventPayload::DoubleValue { value: r.f64()? },
        6 => EventPayload::StringValue { value: r.string()? },
        7 => EventPayload::RandomSeed {
            seed0: r.u64()?,
            seed1: r.u64()?,
        },
        8 => EventPayload::PropertyEnumStep {
            returned: r.u8()? != 0,
            property_id: r.u32()?,
            name: match r.u8()? {
                0 => None,
                _ => Some(r.string()?),
            },
        },
        9 => EventPayload::SymbolCreation {
            property_id: r.u32()?,
        },
        10 => EventPayload::ExternalCbRegister {
            callback_id: r.i64()?,
        },
        11 => EventPayload::ExternalCall {
            function: decode_var(r)?,
            args: decode_vars(r)?,
            nesting_depth: r.u32()?,
        },
        12 => EventPayload::CallbackOp {
            create: r.u8()? != 0,
            cancel: r.u8()? != 0,
            repeating: r.u8()? != 0,
            callback_id: r.i64()?,
        },
        13 => EventPayload::CreateScriptContext,
        14 => EventPayload::SetActiveScriptContext {
            context_id: r.u32()?,
        },
        15 => EventPayload::DeadScriptContext {
            context_id: r.u32()?,
        },
        16 => EventPayload::HostProcessExit {
            exit_code: r.i32()?,
        },
        17 => EventPayload::CreateInteger { value: r.i32()? },
        18 => EventPayload::CreateNumber { value: r.f64()? },
        19 => EventPayload::CreateBoolean { value: r.u8()? != 0 },
        20 => EventPayload::CreateString { value: r.string()? },
        21 => EventPayload::CreateSymbol {
            description: r.string()?,
        },
        22 => EventPayload::CreateError {
            kind: decode_error_kind(r)?,
            message: decode_var(r)?,
        },
        23 => EventPayload::VarToNumber {
            input: decode_var(r)?,
        },
        24 => EventPayload::VarToBool {
            input: decode_var(r)?,
        },
        25 => EventPayload::VarToString {
            input: decode_var(r)?,
        },
        26 => EventPayload::VarToObject {
            input: decode_var(r)?,
        },
        27 => EventPayload::AddRootRef { object: r.u64()? },
        28 => EventPayload::RemoveRootRef { object: r.u64()? },
        29 => EventPayload::AllocateObject,
        30 => EventPayload::AllocateExternalObject,
        31 => EventPayload::AllocateArray { length: r.u32()? },
        32 => EventPayload::AllocateArrayBuffer {
            byte_length: r.u32()?,
        },
        33 => EventPayload::AllocateExternalArrayBuffer {
            contents: r.byte_slice()?.to_vec(),
        },
        34 => EventPayload::AllocateFunction { body_id: r.u64()? },
        35 => EventPayload::GetAndClearException,
        36 => EventPayload::SetException {
            value: decode_var(r)?,
        },
        37 => EventPayload::HasProperty {
            object: r.u64()?,
            property: r.u32()?,
        },
        38 => EventPayload::InstanceOf {
            value: decode_var(r)?,
            constructor: r.u64()?,
        },
        39 => EventPayload::Equals {
            left: decode_var(r)?,
            right: decode_var(r)?,
            strict: r.u8()? != 0,
        },
        40 => EventPayload::PropertyIdFromSymbol {
            symbol: decode_var(r)?,
        },
        41 => EventPayload::GetPrototype { object: r.u64()? },
        42 => EventPayload::GetProperty {
            object: r.u64()?,
            property: r.u32()?,
        },
        43 => EventPayload::GetIndex {
            object: r.u64()?,
            index: r.u32()?,
        },
        44 => EventPayload::GetOwnPropertyInfo {
            object: r.u64()?,
            property: r.u32()?,
        },
        45 => EventPayload::GetOwnPropertyNames { object: r.u64()? },
        46 => EventPayload::GetOwnPropertySymbols { object: r.u64()? },
        47 => EventPayload::GetTypedArrayInfo { object: r.u64()? },
        48 => EventPayload::DefineProperty {
            object: r.u64()?,
            property: r.u32()?,
            value: decode_var(r)?,
        },
        49 => EventPayload::DeleteProperty {
            object: r.u64()?,
            property: r.u32()?,
        },
        50 => EventPayload::SetPrototype {
            object: r.u64()?,
            prototype: decode_var(r)?,
        },
        51 => EventPayload::SetProperty {
            object: r.u64()?,
            property: r.u32()?,
            value: decode_var(r)?,
        },
        52 => EventPayload::SetIndex {
            object: r.u64()?,
            index: r.u32()?,
            value: decode_var(r)?,
        },
        53 => EventPayload::RawBufferCopy {
            dst: r.u64()?,
            dst_offset: r.u32()?,
            src: r.u64()?,
            src_offset: r.u32()?,
            length: r.u32()?,
        },
        54 => EventPayload::RawBufferModify {
            object: r.u64()?,
            offset: r.u32()?,
            bytes: r.byte_slice()?.to_vec(),
        },
        55 => EventPayload::RawBufferAsyncRegister {
            object: r.u64()?,
            initial_pos: r.u32()?,
        },
        56 => EventPayload::RawBufferAsyncComplete {
            object: r.u64()?,
            final_modification_pos: r.u32()?,
        },
        57 => EventPayload::ConstructCall {
            function: r.u64()?,
            args: decode_vars(r)?,
        },
        58 => EventPayload::CodeParse {
            body_id: r.u64()?,
            origin: decode_origin(r)?,
        },
        59 => EventPayload::CallExistingFunction {
            function: r.u64()?,
            args: decode_vars(r)?,
            nesting_depth: r.u32()?,
            host_callback_id: r.i64()?,
            rtr_snapshot: match r.u8()? {
                0 => None,
                _ => Some(Box::new(decode_snapshot(r)?)),
            },
        },
        tag => return Err(LogFormatError::UnknownTag { what: "payload", tag }),
    })
}

// -- entries and tables --

fn encode_entry(buf: &mut Vec<u8>, entry: &EventLogEntry) {
    put_i64(buf, entry.event_time);
    let status = match entry.status {
        ActionStatus::NotCompleted => 0,
        ActionStatus::Completed => 1,
        ActionStatus::CompletedWithException => 2,
    };
    put_u8(buf, status);
    encode_var(buf, &entry.result);
    encode_payload(buf, &entry.payload);
}

fn decode_entry(r: &mut Reader<'_>) -> Result<EventLogEntry, LogFormatError> {
    let event_time = r.i64()?;
    let status = match r.u8()? {
        0 => ActionStatus::NotCompleted,
        1 => ActionStatus::Completed,
        2 => ActionStatus::CompletedWithException,
        tag => return Err(LogFormatError::UnknownTag { what: "action status", tag }),
    };
    let result = decode_var(r)?;
    let payload = decode_payload(r)?;
    Ok(EventLogEntry {
        event_time,
        status,
        result,
        payload,
    })
}

fn encode_scripts(buf: &mut Vec<u8>, scripts: &[FunctionSource]) {
    put_u32(buf, scripts.len() as u32);
    for s in scripts {
        put_u64(buf, s.body_id);
        put_u64(buf, s.source_context);
        put_u8(buf, origin_tag(s.origin));
        put_str(buf, &s.uri);
        put_str(buf, &s.text);
        put_u32(buf, s.line);
        put_u32(buf, s.column);
        put_u8(buf, s.is_strict as u8);
    }
}

fn decode_scripts(r: &mut Reader<'_>) -> Result<Vec<FunctionSource>, LogFormatError> {
    let count = r.u32()?;
    let mut scripts = Vec::new();
    for _ in 0..count {
        scripts.push(FunctionSource {
            body_id: r.u64()?,
            source_context: r.u64()?,
            origin: decode_origin(r)?,
            uri: r.string()?,
            text: r.string()?,
            line: r.u32()?,
            column: r.u32()?,
            is_strict: r.u8()? != 0,
        });
    }
    Ok(scripts)
}

// -- emit and parse --

/// Write the log to `uri` through the host stream provider. The full
/// property table is persisted, not only the ids entries reference, so the
/// parsed log can resolve any id a debugger front end asks about.
pub fn emit_log(
    log: &EventLog,
    properties: &PropertyTable,
    provider: &dyn StreamProvider,
    uri: &str,
    diagnostics: bool,
) -> Result<(), LogFormatError> {
    // entries first, so the header carries their exact byte usage
    let mut entries_buf = Vec::new();
    let mut count: u64 = 0;
    for entry in log.events().iter() {
        let mut one = Vec::new();
        encode_entry(&mut one, entry);
        put_bytes(&mut entries_buf, &one);
        count += 1;
    }
    let used = entries_buf.len() as u64;
    let slot_size = std::mem::size_of::<Option<EventLogEntry>>();
    let reserved = (log.events().block_count() * BLOCK_CAPACITY * slot_size) as u64;

    let mut payload = Vec::new();
    payload.extend_from_slice(&MAGIC);
    put_u32(&mut payload, FORMAT_VERSION);
    put_str(&mut payload, std::env::consts::ARCH);
    put_str(&mut payload, std::env::consts::OS);
    put_u8(&mut payload, diagnostics as u8);
    put_u64(&mut payload, used);
    put_u64(&mut payload, reserved);
    put_u64(&mut payload, count);
    payload.extend_from_slice(&entries_buf);

    let records = properties.records_sorted();
    put_u32(&mut payload, records.len() as u32);
    for record in records {
        put_u32(&mut payload, record.id);
        put_u8(&mut payload, record.is_symbol as u8);
        put_u8(&mut payload, record.is_numeric as u8);
        put_str(&mut payload, &record.name);
    }
    encode_scripts(&mut payload, log.loaded_scripts());
    encode_scripts(&mut payload, log.new_function_scripts());
    encode_scripts(&mut payload, log.eval_scripts());

    let digest = Sha256::digest(&payload);
    let mut writer = provider.open_write(uri)?;
    writer.write_all(&payload)?;
    writer.write_all(&digest)?;
    writer.flush_and_close()?;
    Ok(())
}

/// Read a persisted log back from `uri`. Verifies the digest, magic,
/// version, architecture, and diagnostics flag before decoding anything.
pub fn parse_log(
    provider: &dyn StreamProvider,
    uri: &str,
    expect_diagnostics: bool,
) -> Result<ParsedLog, LogFormatError> {
    let mut reader = provider.open_read(uri)?;
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    if raw.len() < MAGIC.len() + DIGEST_LEN {
        return Err(LogFormatError::Truncated);
    }
    let (payload, trailer) = raw.split_at(raw.len() - DIGEST_LEN);
    let digest = Sha256::digest(payload);
    if digest.as_slice() != trailer {
        return Err(LogFormatError::ChecksumMismatch);
    }

    let mut r = Reader::new(payload);
    if r.take(4)? != MAGIC {
        return Err(LogFormatError::BadMagic);
    }
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(LogFormatError::UnsupportedVersion(version));
    }
    let arch = r.string()?;
    if arch != std::env::consts::ARCH {
        return Err(LogFormatError::ArchMismatch {
            recorded: arch,
            host: std::env::consts::ARCH.to_string(),
        });
    }
    let platform = r.string()?;
    let diagnostics = r.u8()? != 0;
    if diagnostics != expect_diagnostics {
        return Err(LogFormatError::DiagMismatch);
    }
    let used_payload_bytes = r.u64()?;
    let reserved_payload_bytes = r.u64()?;

    let count = r.u64()?;
    let mut entries = Vec::new();
    for _ in 0..count {
        let bytes = r.byte_slice()?;
        let mut er = Reader::new(bytes);
        entries.push(decode_entry(&mut er)?);
    }

    let record_count = r.u32()?;
    let mut properties = Vec::new();
    for _ in 0..record_count {
        let id = r.u32()?;
        let is_symbol = r.u8()? != 0;
        let is_numeric = r.u8()? != 0;
        let name = r.string()?;
        properties.push(PropertyRecord {
            id,
            name,
            is_symbol,
            is_numeric,
        });
    }

    let loaded_scripts = decode_scripts(&mut r)?;
    let new_function_scripts = decode_scripts(&mut r)?;
    let eval_scripts = decode_scripts(&mut r)?;

    Ok(ParsedLog {
        header: LogHeader {
            version,
            arch,
            platform,
            diagnostics,
            used_payload_bytes,
            reserved_payload_bytes,
        },
        entries,
        properties,
        loaded_scripts,
        new_function_scripts,
        eval_scripts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::BaseMode;
    use vireo_engine::{MemoryStreamProvider, ThreadContext};

    fn sample_log() -> (EventLog, ThreadContext) {
        let mut log = EventLog::new(BaseMode::Record);
        let mut tc = ThreadContext::new();

        let token = log.record_create_script_context();
        let cid = tc.create_context();
        log.complete_action(token, TtdVar::Int(i64::from(cid)));
        log.record_set_active_script_context(cid);
        tc.set_active(cid).unwrap();

        let prop = tc.properties.intern("answer");
        let token = log.record_allocate_object();
        let obj = tc.active_context_mut().unwrap().allocate_object();
        log.complete_action(token, TtdVar::LogObject(obj.0));
        log.record_set_property(obj.0, prop, TtdVar::Int(42));
        tc.active_context_mut()
            .unwrap()
            .set_property(obj, prop, JsValue::Int32(42))
            .unwrap();

        log.record_top_level_code_load(FunctionSource::loaded(1, "app.js", "var a = 42;"));
        log.record_snapshot(&tc).unwrap();
        log.record_telemetry("checkpoint", true);
        (log, tc)
    }

    #[test]
    fn test_emit_parse_roundtrip() {
        let (log, tc) = sample_log();
        let provider = MemoryStreamProvider::new();
        emit_log(&log, &tc.properties, &provider, "app.ttdlog", false).unwrap();

        let parsed = parse_log(&provider, "app.ttdlog", false).unwrap();
        assert_eq!(parsed.header.version, FORMAT_VERSION);
        assert_eq!(parsed.header.arch, std::env::consts::ARCH);
        assert!(!parsed.header.diagnostics);
        assert!(parsed.header.used_payload_bytes > 0);

        assert_eq!(parsed.entries.len(), log.events().len());
        for (got, want) in parsed.entries.iter().zip(log.events().iter()) {
            assert_eq!(got.event_time, want.event_time);
            assert_eq!(got.status, want.status);
            assert_eq!(got.result, want.result);
            assert_eq!(got.payload.kind_name(), want.payload.kind_name());
        }
        assert!(parsed
            .properties
            .iter()
            .any(|r| r.name == "answer" && !r.is_symbol));
        assert_eq!(parsed.loaded_scripts.len(), 1);
        assert_eq!(parsed.loaded_scripts[0].text, "var a = 42;");
        assert!(parsed.new_function_scripts.is_empty());
        assert!(parsed.eval_scripts.is_empty());
    }

    #[test]
    fn test_snapshot_survives_persistence() {
        let (log, tc) = sample_log();
        let provider = MemoryStreamProvider::new();
        emit_log(&log, &tc.properties, &provider, "snap.ttdlog", false).unwrap();

        let parsed = parse_log(&provider, "snap.ttdlog", false).unwrap();
        let snap = parsed
            .entries
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::SnapshotMarker { snapshot } => Some(snapshot),
                _ => None,
            })
            .unwrap();
        assert_eq!(snap.contexts.len(), 1);
        // global plus the one allocation
        assert_eq!(snap.object_count(), 2);
        assert_eq!(snap.restore_time, e_time_of_snapshot(&log));
    }

    fn e_time_of_snapshot(log: &EventLog) -> i64 {
        log.events()
            .iter()
            .find(|e| e.is_snapshot())
            .map(|e| e.event_time)
            .unwrap()
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let (log, tc) = sample_log();
        let provider = MemoryStreamProvider::new();
        emit_log(&log, &tc.properties, &provider, "log.ttdlog", false).unwrap();

        let mut bytes = provider.contents("log.ttdlog").unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        let mut w = provider.open_write("log.ttdlog").unwrap();
        w.write_all(&bytes).unwrap();
        w.flush_and_close().unwrap();

        let err = parse_log(&provider, "log.ttdlog", false).unwrap_err();
        assert!(matches!(err, LogFormatError::ChecksumMismatch));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let provider = MemoryStreamProvider::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(b"NOPE");
        put_u32(&mut payload, FORMAT_VERSION);
        let digest = Sha256::digest(&payload);
        let mut w = provider.open_write("bogus.ttdlog").unwrap();
        w.write_all(&payload).unwrap();
        w.write_all(&digest).unwrap();
        w.flush_and_close().unwrap();

        let err = parse_log(&provider, "bogus.ttdlog", false).unwrap_err();
        assert!(matches!(err, LogFormatError::BadMagic));
    }

    #[test]
    fn test_diagnostics_flag_must_match() {
        let (log, tc) = sample_log();
        let provider = MemoryStreamProvider::new();
        emit_log(&log, &tc.properties, &provider, "diag.ttdlog", true).unwrap();

        let err = parse_log(&provider, "diag.ttdlog", false).unwrap_err();
        assert!(matches!(err, LogFormatError::DiagMismatch));
        assert!(parse_log(&provider, "diag.ttdlog", true).is_ok());
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let provider = MemoryStreamProvider::new();
        let mut w = provider.open_write("short.ttdlog").unwrap();
        w.write_all(b"VTTL\x01\x00").unwrap();
        w.flush_and_close().unwrap();

        let err = parse_log(&provider, "short.ttdlog", false).unwrap_err();
        assert!(matches!(err, LogFormatError::Truncated));
    }
}

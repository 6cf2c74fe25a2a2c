//! Event log entries
//!
//! Every host-visible action becomes one `EventLogEntry` with a tagged
//! payload. Dispatch on the payload is a plain `match`; there is no
//! per-kind vtable. Result-bearing actions are recorded in two steps: the
//! entry starts `NotCompleted` and the caller completes it through the
//! `ActionToken` once the result is known. An abandoned token leaves the
//! incomplete marker in the log, which replay refuses to cross.

use crate::snapshot::HeapSnapshot;
use crate::var::TtdVar;
use vireo_engine::{ErrorKind, PropertyId, ScriptContextId, SourceOrigin};

/// Completion status of a result-bearing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// Recorded but the result has not been filled in yet
    NotCompleted,
    /// Completed normally
    Completed,
    /// Completed by throwing; the result is the thrown value
    CompletedWithException,
}

/// Receipt for a result-bearing entry awaiting completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "an uncompleted action leaves an incomplete entry that replay refuses to cross"]
pub struct ActionToken {
    /// Event time of the entry to complete
    pub event_time: i64,
}

/// What one log entry records
#[derive(Debug, Clone)]
pub enum EventPayload {
    // -- infrastructure events --
    /// Full heap image pinned into the log
    SnapshotMarker {
        /// The extracted image
        snapshot: Box<HeapSnapshot>,
    },
    /// Host event loop returned to idle
    EventLoopYieldPoint,
    /// A top-level body was registered (see the script tables for source)
    TopLevelCodeLoad {
        /// Body registered by the load
        body_id: u64,
    },
    /// Host telemetry message routed through the log
    Telemetry {
        /// Message text
        message: String,
        /// True when the host also printed it
        print: bool,
    },
    /// Explicit host request to flush the log to stable storage
    ExplicitLogWrite,

    // -- environment value events --
    /// A nondeterministic double the host observed (date/time reads)
    DoubleValue {
        /// Observed value
        value: f64,
    },
    /// A nondeterministic string the host observed (locale date strings)
    StringValue {
        /// Observed value
        value: String,
    },
    /// PRNG seed material recorded at seeding time
    RandomSeed {
        /// First seed word
        seed0: u64,
        /// Second seed word
        seed1: u64,
    },
    /// One step of a property enumeration
    PropertyEnumStep {
        /// False once the enumerator is exhausted
        returned: bool,
        /// Property yielded by this step
        property_id: PropertyId,
        /// Name snapshot, captured when diagnostics are on
        name: Option<String>,
    },
    /// A fresh symbol was created
    SymbolCreation {
        /// Record id the symbol interned to
        property_id: PropertyId,
    },

    // -- external call events --
    /// Host registered an external callback function
    ExternalCbRegister {
        /// Host id for the callback
        callback_id: i64,
    },
    /// Engine called out into host code
    ExternalCall {
        /// Callee as the log saw it
        function: TtdVar,
        /// Arguments as the log saw them
        args: Vec<TtdVar>,
        /// Re-entrancy depth at call time
        nesting_depth: u32,
    },
    /// Host enqueued, cancelled, or invoked a scheduled callback
    CallbackOp {
        /// True for enqueue
        create: bool,
        /// True for cancel
        cancel: bool,
        /// True when the callback repeats
        repeating: bool,
        /// Host id for the callback
        callback_id: i64,
    },

    // -- context lifecycle --
    /// Host created a realm; the completed result carries its id
    CreateScriptContext,
    /// Host selected the realm subsequent operations target
    SetActiveScriptContext {
        /// Realm selected
        context_id: ScriptContextId,
    },
    /// Host released a realm
    DeadScriptContext {
        /// Realm destroyed
        context_id: ScriptContextId,
    },
    /// Host asked the engine to exit
    HostProcessExit {
        /// Exit code the host requested
        exit_code: i32,
    },

    // -- value creation --
    /// Host created an integer value
    CreateInteger {
        /// Requested value
        value: i32,
    },
    /// Host created a number value
    CreateNumber {
        /// Requested value
        value: f64,
    },
    /// Host created a boolean value
    CreateBoolean {
        /// Requested value
        value: bool,
    },
    /// Host created a string value
    CreateString {
        /// Requested contents
        value: String,
    },
    /// Host created a symbol
    CreateSymbol {
        /// Symbol description
        description: String,
    },
    /// Host created an error object
    CreateError {
        /// Constructor family
        kind: ErrorKind,
        /// Error message value
        message: TtdVar,
    },

    // -- value conversions --
    /// Host coerced a value to number
    VarToNumber {
        /// Input value
        input: TtdVar,
    },
    /// Host coerced a value to boolean
    VarToBool {
        /// Input value
        input: TtdVar,
    },
    /// Host coerced a value to string
    VarToString {
        /// Input value
        input: TtdVar,
    },
    /// Host coerced a value to object
    VarToObject {
        /// Input value
        input: TtdVar,
    },

    // -- root lifetime --
    /// Host pinned an object as a GC root
    AddRootRef {
        /// Pinned object
        object: u64,
    },
    /// Host unpinned an object
    RemoveRootRef {
        /// Unpinned object
        object: u64,
    },

    // -- allocation --
    /// Host allocated a plain object
    AllocateObject,
    /// Host allocated an external (host-owned) object
    AllocateExternalObject,
    /// Host allocated an array
    AllocateArray {
        /// Initial length
        length: u32,
    },
    /// Host allocated an array buffer
    AllocateArrayBuffer {
        /// Buffer size in bytes
        byte_length: u32,
    },
    /// Host allocated an array buffer over host-supplied bytes
    AllocateExternalArrayBuffer {
        /// Initial contents, deep-copied into the entry
        contents: Vec<u8>,
    },
    /// Host created a function object over a registered body
    AllocateFunction {
        /// Body the closure executes
        body_id: u64,
    },

    // -- exceptions --
    /// Host took (and cleared) the pending exception
    GetAndClearException,
    /// Host installed a pending exception
    SetException {
        /// Thrown value
        value: TtdVar,
    },

    // -- queries --
    /// `prop in obj` query
    HasProperty {
        /// Queried object
        object: u64,
        /// Queried property
        property: PropertyId,
    },
    /// `value instanceof ctor` query
    InstanceOf {
        /// Left-hand value
        value: TtdVar,
        /// Constructor object
        constructor: u64,
    },
    /// Equality comparison
    Equals {
        /// Left operand
        left: TtdVar,
        /// Right operand
        right: TtdVar,
        /// True for strict equality
        strict: bool,
    },
    /// Host asked for the property id behind a symbol value
    PropertyIdFromSymbol {
        /// Symbol value
        symbol: TtdVar,
    },
    /// Prototype read
    GetPrototype {
        /// Queried object
        object: u64,
    },
    /// Property read (walks the prototype chain)
    GetProperty {
        /// Queried object
        object: u64,
        /// Queried property
        property: PropertyId,
    },
    /// Indexed element read
    GetIndex {
        /// Queried object
        object: u64,
        /// Element index
        index: u32,
    },
    /// Own-property read (no chain walk)
    GetOwnPropertyInfo {
        /// Queried object
        object: u64,
        /// Queried property
        property: PropertyId,
    },
    /// Own string-keyed property names; result is a fresh array
    GetOwnPropertyNames {
        /// Queried object
        object: u64,
    },
    /// Own symbol-keyed properties; result is a fresh array
    GetOwnPropertySymbols {
        /// Queried object
        object: u64,
    },
    /// Typed-array view descriptor read
    GetTypedArrayInfo {
        /// Queried object
        object: u64,
    },

    // -- mutation --
    /// `defineProperty` (ignores extensibility)
    DefineProperty {
        /// Target object
        object: u64,
        /// Defined property
        property: PropertyId,
        /// Defined value
        value: TtdVar,
    },
    /// Property delete
    DeleteProperty {
        /// Target object
        object: u64,
        /// Deleted property
        property: PropertyId,
    },
    /// Prototype write
    SetPrototype {
        /// Target object
        object: u64,
        /// New prototype (null clears)
        prototype: TtdVar,
    },
    /// Property write
    SetProperty {
        /// Target object
        object: u64,
        /// Written property
        property: PropertyId,
        /// Written value
        value: TtdVar,
    },
    /// Indexed element write
    SetIndex {
        /// Target object
        object: u64,
        /// Element index
        index: u32,
        /// Written value
        value: TtdVar,
    },

    // -- raw buffers --
    /// Byte copy between array buffers
    RawBufferCopy {
        /// Destination buffer
        dst: u64,
        /// Destination offset in bytes
        dst_offset: u32,
        /// Source buffer
        src: u64,
        /// Source offset in bytes
        src_offset: u32,
        /// Bytes copied
        length: u32,
    },
    /// Byte-range overwrite of an array buffer
    RawBufferModify {
        /// Target buffer
        object: u64,
        /// Offset in bytes
        offset: u32,
        /// New contents, deep-copied into the entry
        bytes: Vec<u8>,
    },
    /// Host began an async modification of a buffer region
    RawBufferAsyncRegister {
        /// Target buffer
        object: u64,
        /// Position the async writer starts at
        initial_pos: u32,
    },
    /// Host finished an async modification of a buffer region
    RawBufferAsyncComplete {
        /// Target buffer
        object: u64,
        /// Position the async writer stopped at
        final_modification_pos: u32,
    },

    // -- calls and code --
    /// Host invoked a constructor
    ConstructCall {
        /// Constructor object
        function: u64,
        /// Arguments as the log saw them
        args: Vec<TtdVar>,
    },
    /// Host parsed script text into a body
    CodeParse {
        /// Body produced by the parse
        body_id: u64,
        /// How the body entered the engine
        origin: SourceOrigin,
    },
    /// Host invoked an existing function object (root of a callback turn)
    CallExistingFunction {
        /// Callee object
        function: u64,
        /// Arguments as the log saw them
        args: Vec<TtdVar>,
        /// Re-entrancy depth at call time
        nesting_depth: u32,
        /// Host callback id driving this turn (-1 when none)
        host_callback_id: i64,
        /// Replay-time snapshot attached to this root call, when one exists
        rtr_snapshot: Option<Box<HeapSnapshot>>,
    },
}

impl EventPayload {
    /// Stable name for diagnostics and log dumps
    pub fn kind_name(&self) -> &'static str {
        match self {
            EventPayload::SnapshotMarker { .. } => "snapshot",
            EventPayload::EventLoopYieldPoint => "yield-point",
            EventPayload::TopLevelCodeLoad { .. } => "top-level-code-load",
            EventPayload::Telemetry { .. } => "telemetry",
            EventPayload::ExplicitLogWrite => "explicit-log-write",
            EventPayload::DoubleValue { .. } => "double-value",
            EventPayload::StringValue { .. } => "string-value",
            EventPayload::RandomSeed { .. } => "random-seed",
            EventPayload::PropertyEnumStep { .. } => "property-enum-step",
            EventPayload::SymbolCreation { .. } => "symbol-creation",
            EventPayload::ExternalCbRegister { .. } => "external-cb-register",
            EventPayload::ExternalCall { .. } => "external-call",
            EventPayload::CallbackOp { .. } => "callback-op",
            EventPayload::CreateScriptContext => "create-script-context",
            EventPayload::SetActiveScriptContext { .. } => "set-active-script-context",
            EventPayload::DeadScriptContext { .. } => "dead-script-context",
            EventPayload::HostProcessExit { .. } => "host-process-exit",
            EventPayload::CreateInteger { .. } => "create-integer",
            EventPayload::CreateNumber { .. } => "create-number",
            EventPayload::CreateBoolean { .. } => "create-boolean",
            EventPayload::CreateString { .. } => "create-string",
            EventPayload::CreateSymbol { .. } => "create-symbol",
            EventPayload::CreateError { .. } => "create-error",
            EventPayload::VarToNumber { .. } => "var-to-number",
            EventPayload::VarToBool { .. } => "var-to-bool",
            EventPayload::VarToString { .. } => "var-to-string",
            EventPayload::VarToObject { .. } => "var-to-object",
            EventPayload::AddRootRef { .. } => "add-root-ref",
            EventPayload::RemoveRootRef { .. } => "remove-root-ref",
            EventPayload::AllocateObject => "allocate-object",
            EventPayload::AllocateExternalObject => "allocate-external-object",
            EventPayload::AllocateArray { .. } => "allocate-array",
            EventPayload::AllocateArrayBuffer { .. } => "allocate-array-buffer",
            EventPayload::AllocateExternalArrayBuffer { .. } => {
                "allocate-external-array-buffer"
            }
            EventPayload::AllocateFunction { .. } => "allocate-function",
            EventPayload::GetAndClearException => "get-and-clear-exception",
            EventPayload::SetException { .. } => "set-exception",
            EventPayload::HasProperty { .. } => "has-property",
            EventPayload::InstanceOf { .. } => "instance-of",
            EventPayload::Equals { .. } => "equals",
            EventPayload::PropertyIdFromSymbol { .. } => "property-id-from-symbol",
            EventPayload::GetPrototype { .. } => "get-prototype",
            EventPayload::GetProperty { .. } => "get-property",
            EventPayload::GetIndex { .. } => "get-index",
            EventPayload::GetOwnPropertyInfo { .. } => "get-own-property-info",
            EventPayload::GetOwnPropertyNames { .. } => "get-own-property-names",
            EventPayload::GetOwnPropertySymbols { .. } => "get-own-property-symbols",
            EventPayload::GetTypedArrayInfo { .. } => "get-typed-array-info",
            EventPayload::DefineProperty { .. } => "define-property",
            EventPayload::DeleteProperty { .. } => "delete-property",
            EventPayload::SetPrototype { .. } => "set-prototype",
            EventPayload::SetProperty { .. } => "set-property",
            EventPayload::SetIndex { .. } => "set-index",
            EventPayload::RawBufferCopy { .. } => "raw-buffer-copy",
            EventPayload::RawBufferModify { .. } => "raw-buffer-modify",
            EventPayload::RawBufferAsyncRegister { .. } => "raw-buffer-async-register",
            EventPayload::RawBufferAsyncComplete { .. } => "raw-buffer-async-complete",
            EventPayload::ConstructCall { .. } => "construct-call",
            EventPayload::CodeParse { .. } => "code-parse",
            EventPayload::CallExistingFunction { .. } => "call-existing-function",
        }
    }

    /// True for kinds whose entries carry a completion result
    pub fn is_result_bearing(&self) -> bool {
        matches!(
            self,
            EventPayload::ExternalCall { .. }
                | EventPayload::CreateScriptContext
                | EventPayload::CreateInteger { .. }
                | EventPayload::CreateNumber { .. }
                | EventPayload::CreateBoolean { .. }
                | EventPayload::CreateString { .. }
                | EventPayload::CreateSymbol { .. }
                | EventPayload::CreateError { .. }
                | EventPayload::VarToNumber { .. }
                | EventPayload::VarToBool { .. }
                | EventPayload::VarToString { .. }
                | EventPayload::VarToObject { .. }
                | EventPayload::AllocateObject
                | EventPayload::AllocateExternalObject
                | EventPayload::AllocateArray { .. }
                | EventPayload::AllocateArrayBuffer { .. }
                | EventPayload::AllocateExternalArrayBuffer { .. }
                | EventPayload::AllocateFunction { .. }
                | EventPayload::GetAndClearException
                | EventPayload::HasProperty { .. }
                | EventPayload::InstanceOf { .. }
                | EventPayload::Equals { .. }
                | EventPayload::PropertyIdFromSymbol { .. }
                | EventPayload::GetPrototype { .. }
                | EventPayload::GetProperty { .. }
                | EventPayload::GetIndex { .. }
                | EventPayload::GetOwnPropertyInfo { .. }
                | EventPayload::GetOwnPropertyNames { .. }
                | EventPayload::GetOwnPropertySymbols { .. }
                | EventPayload::GetTypedArrayInfo { .. }
                | EventPayload::DeleteProperty { .. }
                | EventPayload::ConstructCall { .. }
                | EventPayload::CallExistingFunction { .. }
        )
    }
}

/// One recorded action
#[derive(Debug, Clone)]
pub struct EventLogEntry {
    /// Position in the global event-time order
    pub event_time: i64,
    /// Completion status
    pub status: ActionStatus,
    /// Completion result (undefined until completed)
    pub result: TtdVar,
    /// What happened
    pub payload: EventPayload,
}

impl EventLogEntry {
    /// Entry that needs no completion step
    pub fn completed(event_time: i64, payload: EventPayload) -> Self {
        Self {
            event_time,
            status: ActionStatus::Completed,
            result: TtdVar::Undefined,
            payload,
        }
    }

    /// Entry awaiting completion through its token
    pub fn pending(event_time: i64, payload: EventPayload) -> Self {
        Self {
            event_time,
            status: ActionStatus::NotCompleted,
            result: TtdVar::Undefined,
            payload,
        }
    }

    /// True for snapshot markers
    pub fn is_snapshot(&self) -> bool {
        matches!(self.payload, EventPayload::SnapshotMarker { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_entries_start_incomplete() {
        let e = EventLogEntry::pending(3, EventPayload::AllocateObject);
        assert_eq!(e.status, ActionStatus::NotCompleted);
        assert!(e.payload.is_result_bearing());
        assert_eq!(e.result, TtdVar::Undefined);
    }

    #[test]
    fn test_infrastructure_kinds_bear_no_result() {
        assert!(!EventPayload::EventLoopYieldPoint.is_result_bearing());
        assert!(!EventPayload::ExplicitLogWrite.is_result_bearing());
        assert!(!EventPayload::RandomSeed { seed0: 1, seed1: 2 }.is_result_bearing());
    }

    #[test]
    fn test_kind_names_are_distinct_for_neighbors() {
        let a = EventPayload::GetProperty {
            object: 1,
            property: 2,
        };
        let b = EventPayload::GetOwnPropertyInfo {
            object: 1,
            property: 2,
        };
        assert_ne!(a.kind_name(), b.kind_name());
    }
}

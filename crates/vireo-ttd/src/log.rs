//! The event log
//!
//! One `EventLog` per thread context, strictly single-threaded. Recording
//! appends entries in event-time order; result-bearing actions return an
//! `ActionToken` and are filled in by `complete_action`. The host is
//! responsible for consulting [`ModeStack::should_record`] before calling
//! `record_*`; excluded execution never reaches the log.

use crate::breakpoints::{BreakpointManager, SkippedHit};
use crate::callstack::CallStackShadow;
use crate::events::{ActionStatus, ActionToken, EventLogEntry, EventPayload};
use crate::list::TtEventList;
use crate::mode::{BaseMode, ModeStack};
use crate::snapshot::HeapSnapshot;
use crate::var::TtdVar;
use rustc_hash::FxHashSet;
use vireo_engine::{
    EngineResult, ErrorKind, FunctionSource, PropertyId, ScriptContextId, SourceOrigin,
    ThreadContext, TraceLogger,
};

/// Default wall-clock execution time between snapshots
pub const DEFAULT_SNAPSHOT_INTERVAL_MICROS: u64 = 2_000_000;

/// Record/replay event log for one thread context
#[derive(Debug)]
pub struct EventLog {
    mode: ModeStack,
    events: TtEventList,
    next_event_time: i64,
    callstack: CallStackShadow,
    breakpoints: BreakpointManager,
    top_level_callback_time: i64,
    host_callback_id: i64,
    snapshot_interval_micros: u64,
    elapsed_micros: u64,
    loaded_scripts: Vec<FunctionSource>,
    new_function_scripts: Vec<FunctionSource>,
    eval_scripts: Vec<FunctionSource>,
    pinned_properties: FxHashSet<PropertyId>,
    trace: TraceLogger,
}

impl EventLog {
    /// Empty log in the given base mode
    pub fn new(base: BaseMode) -> Self {
        Self {
            mode: ModeStack::new(base),
            events: TtEventList::new(),
            next_event_time: 1,
            callstack: CallStackShadow::new(),
            breakpoints: BreakpointManager::new(),
            top_level_callback_time: -1,
            host_callback_id: -1,
            snapshot_interval_micros: DEFAULT_SNAPSHOT_INTERVAL_MICROS,
            elapsed_micros: 0,
            loaded_scripts: Vec::new(),
            new_function_scripts: Vec::new(),
            eval_scripts: Vec::new(),
            pinned_properties: FxHashSet::default(),
            trace: TraceLogger::disabled(),
        }
    }

    /// Rebuild a log from parsed parts, ready for replay
    pub fn from_parts(
        entries: Vec<EventLogEntry>,
        loaded_scripts: Vec<FunctionSource>,
        new_function_scripts: Vec<FunctionSource>,
        eval_scripts: Vec<FunctionSource>,
    ) -> Self {
        let mut log = Self::new(BaseMode::Replay);
        for entry in entries {
            log.next_event_time = log.next_event_time.max(entry.event_time + 1);
            log.events.push(entry);
        }
        log.loaded_scripts = loaded_scripts;
        log.new_function_scripts = new_function_scripts;
        log.eval_scripts = eval_scripts;
        log
    }

    // -- state access --

    /// Mode stack
    pub fn mode(&self) -> &ModeStack {
        &self.mode
    }

    /// Mutable mode stack (push/pop flags, switch base)
    pub fn mode_mut(&mut self) -> &mut ModeStack {
        &mut self.mode
    }

    /// Call-stack shadow
    pub fn callstack(&self) -> &CallStackShadow {
        &self.callstack
    }

    /// Mutable call-stack shadow (entry/exit/statement updates)
    pub fn callstack_mut(&mut self) -> &mut CallStackShadow {
        &mut self.callstack
    }

    /// Breakpoint manager
    pub fn breakpoints(&self) -> &BreakpointManager {
        &self.breakpoints
    }

    /// Mutable breakpoint manager
    pub fn breakpoints_mut(&mut self) -> &mut BreakpointManager {
        &mut self.breakpoints
    }

    // -- execution notifications --

    /// Note a function entry
    pub fn on_function_enter(&mut self, body_id: u64) {
        self.callstack.push_call(body_id);
    }

    /// Note a normal function return
    pub fn on_function_return(&mut self) {
        self.callstack.pop_call();
    }

    /// Note a return by exception unwind
    pub fn on_function_unwind(&mut self) {
        self.callstack.pop_call_on_exception();
    }

    /// Note a loop back-edge in the current frame
    pub fn on_loop_back_edge(&mut self) {
        self.callstack.update_loop();
    }

    /// Note that the current frame reached a new statement. Returns the
    /// breakpoint id to trap on. Breakpoints only fire under debugger
    /// control; suppressed hits become reverse-step candidates and
    /// log-breakpoints hits go to the trace instead of trapping.
    pub fn on_statement(&mut self, statement: i64) -> Option<u32> {
        self.callstack.update_statement(statement);
        if !self.mode.is_debugging() {
            return None;
        }
        let frame = *self.callstack.current_frame()?;
        let suppress = self.mode.suppress_breakpoints();
        let hit = self.breakpoints.check(&frame, suppress)?;
        if self.mode.log_breakpoints() {
            let line = format!(
                "breakpoint {} at body {} stmt {}",
                hit, frame.function, frame.current_stmt
            );
            self.trace.write_line(&line);
            return None;
        }
        Some(hit)
    }

    /// Resolve a finished reverse-step scan: the last suppressed hit is the
    /// previous real breakpoint. Clears the candidates for the next scan.
    pub fn reverse_step_target(&mut self) -> Option<SkippedHit> {
        let target = self.breakpoints.last_skipped().copied();
        self.breakpoints.clear_skipped();
        target
    }

    /// Attach a diagnostics trace; replay writes one line per dispatched
    /// entry through it
    pub fn set_trace(&mut self, trace: TraceLogger) {
        self.trace = trace;
    }

    /// Diagnostics trace
    pub fn trace_mut(&mut self) -> &mut TraceLogger {
        &mut self.trace
    }

    /// Recorded entries
    pub fn events(&self) -> &TtEventList {
        &self.events
    }

    pub(crate) fn events_mut(&mut self) -> &mut TtEventList {
        &mut self.events
    }

    pub(crate) fn set_turn_state(&mut self, time: i64, callback_id: i64) {
        self.top_level_callback_time = time;
        self.host_callback_id = callback_id;
    }

    /// Event time of the oldest live entry
    pub fn first_event_time(&self) -> Option<i64> {
        self.events.front().map(|e| e.event_time)
    }

    /// Event time of the newest entry
    pub fn last_event_time(&self) -> Option<i64> {
        self.events.back().map(|e| e.event_time)
    }

    /// Event time of the root call of the current callback turn (-1 outside
    /// a turn)
    pub fn top_level_callback_time(&self) -> i64 {
        self.top_level_callback_time
    }

    /// Host callback id driving the current turn (-1 when none)
    pub fn host_callback_id(&self) -> i64 {
        self.host_callback_id
    }

    /// Property ids referenced by recorded entries, in id order
    pub fn pinned_properties(&self) -> Vec<PropertyId> {
        let mut ids: Vec<PropertyId> = self.pinned_properties.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Top-level bodies from host script loads
    pub fn loaded_scripts(&self) -> &[FunctionSource] {
        &self.loaded_scripts
    }

    /// Top-level bodies from `new Function`
    pub fn new_function_scripts(&self) -> &[FunctionSource] {
        &self.new_function_scripts
    }

    /// Top-level bodies from `eval`
    pub fn eval_scripts(&self) -> &[FunctionSource] {
        &self.eval_scripts
    }

    /// Find a registered top-level body across all three tables
    pub fn find_script(&self, body_id: u64) -> Option<&FunctionSource> {
        self.loaded_scripts
            .iter()
            .chain(&self.new_function_scripts)
            .chain(&self.eval_scripts)
            .find(|s| s.body_id == body_id)
    }

    // -- recording plumbing --

    fn advance_time(&mut self) -> i64 {
        let t = self.next_event_time;
        self.next_event_time += 1;
        t
    }

    fn append(&mut self, payload: EventPayload) -> i64 {
        let t = self.advance_time();
        self.events.push(EventLogEntry::completed(t, payload));
        t
    }

    fn append_pending(&mut self, payload: EventPayload) -> ActionToken {
        let t = self.advance_time();
        self.events.push(EventLogEntry::pending(t, payload));
        ActionToken { event_time: t }
    }

    fn pin_property(&mut self, id: PropertyId) {
        self.pinned_properties.insert(id);
    }

    /// Fill in the result of a pending entry; false when the token does not
    /// resolve to a live entry
    pub fn complete_action(&mut self, token: ActionToken, result: TtdVar) -> bool {
        self.complete_with(token, result, ActionStatus::Completed)
    }

    /// Complete a pending entry whose action threw
    pub fn complete_action_with_exception(
        &mut self,
        token: ActionToken,
        thrown: TtdVar,
    ) -> bool {
        self.complete_with(token, thrown, ActionStatus::CompletedWithException)
    }

    fn complete_with(&mut self, token: ActionToken, result: TtdVar, status: ActionStatus) -> bool {
        match self
            .events
            .rfind_mut(|e| e.event_time == token.event_time)
        {
            Some(entry) => {
                entry.status = status;
                entry.result = result;
                true
            }
            None => false,
        }
    }

    // -- snapshot cadence --

    /// Accumulate wall-clock execution time toward the snapshot interval
    pub fn note_execution_time(&mut self, micros: u64) {
        self.elapsed_micros = self.elapsed_micros.saturating_add(micros);
    }

    /// True once enough execution time has accumulated for a snapshot
    pub fn snapshot_due(&self) -> bool {
        self.elapsed_micros >= self.snapshot_interval_micros
    }

    /// Override the snapshot interval
    pub fn set_snapshot_interval_micros(&mut self, micros: u64) {
        self.snapshot_interval_micros = micros;
    }

    /// Extract and pin a heap snapshot now
    pub fn record_snapshot(&mut self, tc: &ThreadContext) -> EngineResult<i64> {
        let t = self.advance_time();
        let snapshot = HeapSnapshot::extract(tc, t)?;
        self.events.push(EventLogEntry::completed(
            t,
            EventPayload::SnapshotMarker {
                snapshot: Box::new(snapshot),
            },
        ));
        self.elapsed_micros = 0;
        Ok(t)
    }

    /// Record an event-loop yield point. Snapshots are only ever taken
    /// here, so a single over-long callback yields one larger-than-interval
    /// gap rather than a mid-callback snapshot.
    pub fn record_event_loop_yield_point(
        &mut self,
        tc: &ThreadContext,
    ) -> EngineResult<i64> {
        let t = self.append(EventPayload::EventLoopYieldPoint);
        if self.snapshot_due() {
            self.record_snapshot(tc)?;
        }
        Ok(t)
    }

    // -- infrastructure events --

    /// Record a top-level body registration and remember its source
    pub fn record_top_level_code_load(&mut self, source: FunctionSource) -> i64 {
        let t = self.append(EventPayload::TopLevelCodeLoad {
            body_id: source.body_id,
        });
        match source.origin {
            SourceOrigin::Load => self.loaded_scripts.push(source),
            SourceOrigin::NewFunction => self.new_function_scripts.push(source),
            SourceOrigin::Eval => self.eval_scripts.push(source),
        }
        t
    }

    /// Record a host telemetry message
    pub fn record_telemetry(&mut self, message: impl Into<String>, print: bool) -> i64 {
        self.append(EventPayload::Telemetry {
            message: message.into(),
            print,
        })
    }

    /// Record an explicit host flush request
    pub fn record_explicit_log_write(&mut self) -> i64 {
        self.append(EventPayload::ExplicitLogWrite)
    }

    // -- environment value events --

    /// Record a nondeterministic double (date/time reads)
    pub fn record_double_value(&mut self, value: f64) -> i64 {
        self.append(EventPayload::DoubleValue { value })
    }

    /// Record a nondeterministic string (locale date strings)
    pub fn record_string_value(&mut self, value: impl Into<String>) -> i64 {
        self.append(EventPayload::StringValue {
            value: value.into(),
        })
    }

    /// Record PRNG seed material
    pub fn record_random_seed(&mut self, seed0: u64, seed1: u64) -> i64 {
        self.append(EventPayload::RandomSeed { seed0, seed1 })
    }

    /// Draw fresh seed material, record it, and hand it back for seeding
    pub fn record_fresh_random_seed(&mut self) -> (u64, u64) {
        let seed0: u64 = rand::random();
        let seed1: u64 = rand::random();
        self.record_random_seed(seed0, seed1);
        (seed0, seed1)
    }

    /// Record one property enumeration step
    pub fn record_property_enum_step(
        &mut self,
        returned: bool,
        property_id: PropertyId,
        name: Option<String>,
    ) -> i64 {
        self.pin_property(property_id);
        self.append(EventPayload::PropertyEnumStep {
            returned,
            property_id,
            name,
        })
    }

    /// Record a fresh symbol interning
    pub fn record_symbol_creation(&mut self, property_id: PropertyId) -> i64 {
        self.pin_property(property_id);
        self.append(EventPayload::SymbolCreation { property_id })
    }

    // -- external call events --

    /// Record an external callback registration
    pub fn record_external_cb_register(&mut self, callback_id: i64) -> i64 {
        self.append(EventPayload::ExternalCbRegister { callback_id })
    }

    /// Record a call out into host code
    pub fn record_external_call(
        &mut self,
        function: TtdVar,
        args: Vec<TtdVar>,
        nesting_depth: u32,
    ) -> ActionToken {
        self.append_pending(EventPayload::ExternalCall {
            function,
            args,
            nesting_depth,
        })
    }

    /// Record a scheduled-callback operation
    pub fn record_callback_op(
        &mut self,
        create: bool,
        cancel: bool,
        repeating: bool,
        callback_id: i64,
    ) -> i64 {
        self.append(EventPayload::CallbackOp {
            create,
            cancel,
            repeating,
            callback_id,
        })
    }

    // -- context lifecycle --

    /// Record a realm creation; complete with the created id
    pub fn record_create_script_context(&mut self) -> ActionToken {
        self.append_pending(EventPayload::CreateScriptContext)
    }

    /// Record the active-realm switch
    pub fn record_set_active_script_context(&mut self, context_id: ScriptContextId) -> i64 {
        self.append(EventPayload::SetActiveScriptContext { context_id })
    }

    /// Record a realm teardown
    pub fn record_dead_script_context(&mut self, context_id: ScriptContextId) -> i64 {
        self.append(EventPayload::DeadScriptContext { context_id })
    }

    /// Record a host-requested exit
    pub fn record_host_process_exit(&mut self, exit_code: i32) -> i64 {
        self.append(EventPayload::HostProcessExit { exit_code })
    }

    // -- value creation --

    /// Record an integer creation
    pub fn record_create_integer(&mut self, value: i32) -> ActionToken {
        self.append_pending(EventPayload::CreateInteger { value })
    }

    /// Record a number creation
    pub fn record_create_number(&mut self, value: f64) -> ActionToken {
        self.append_pending(EventPayload::CreateNumber { value })
    }

    /// Record a boolean creation
    pub fn record_create_boolean(&mut self, value: bool) -> ActionToken {
        self.append_pending(EventPayload::CreateBoolean { value })
    }

    /// Record a string creation
    pub fn record_create_string(&mut self, value: impl Into<String>) -> ActionToken {
        self.append_pending(EventPayload::CreateString {
            value: value.into(),
        })
    }

    /// Record a symbol creation request
    pub fn record_create_symbol(&mut self, description: impl Into<String>) -> ActionToken {
        self.append_pending(EventPayload::CreateSymbol {
            description: description.into(),
        })
    }

    /// Record an error-object creation
    pub fn record_create_error(&mut self, kind: ErrorKind, message: TtdVar) -> ActionToken {
        self.append_pending(EventPayload::CreateError { kind, message })
    }

    // -- value conversions --

    /// Record a to-number coercion
    pub fn record_var_to_number(&mut self, input: TtdVar) -> ActionToken {
        self.append_pending(EventPayload::VarToNumber { input })
    }

    /// Record a to-boolean coercion
    pub fn record_var_to_bool(&mut self, input: TtdVar) -> ActionToken {
        self.append_pending(EventPayload::VarToBool { input })
    }

    /// Record a to-string coercion
    pub fn record_var_to_string(&mut self, input: TtdVar) -> ActionToken {
        self.append_pending(EventPayload::VarToString { input })
    }

    /// Record a to-object coercion
    pub fn record_var_to_object(&mut self, input: TtdVar) -> ActionToken {
        self.append_pending(EventPayload::VarToObject { input })
    }

    // -- root lifetime --

    /// Record a root pin
    pub fn record_add_root_ref(&mut self, object: u64) -> i64 {
        self.append(EventPayload::AddRootRef { object })
    }

    /// Record a root unpin
    pub fn record_remove_root_ref(&mut self, object: u64) -> i64 {
        self.append(EventPayload::RemoveRootRef { object })
    }

    // -- allocation --

    /// Record a plain-object allocation
    pub fn record_allocate_object(&mut self) -> ActionToken {
        self.append_pending(EventPayload::AllocateObject)
    }

    /// Record an external-object allocation
    pub fn record_allocate_external_object(&mut self) -> ActionToken {
        self.append_pending(EventPayload::AllocateExternalObject)
    }

    /// Record an array allocation
    pub fn record_allocate_array(&mut self, length: u32) -> ActionToken {
        self.append_pending(EventPayload::AllocateArray { length })
    }

    /// Record an array-buffer allocation
    pub fn record_allocate_array_buffer(&mut self, byte_length: u32) -> ActionToken {
        self.append_pending(EventPayload::AllocateArrayBuffer { byte_length })
    }

    /// Record an external array-buffer allocation; contents are deep-copied
    pub fn record_allocate_external_array_buffer(
        &mut self,
        contents: Vec<u8>,
    ) -> ActionToken {
        self.append_pending(EventPayload::AllocateExternalArrayBuffer { contents })
    }

    /// Record a function-object allocation
    pub fn record_allocate_function(&mut self, body_id: u64) -> ActionToken {
        self.append_pending(EventPayload::AllocateFunction { body_id })
    }

    // -- exceptions --

    /// Record taking the pending exception
    pub fn record_get_and_clear_exception(&mut self) -> ActionToken {
        self.append_pending(EventPayload::GetAndClearException)
    }

    /// Record installing a pending exception
    pub fn record_set_exception(&mut self, value: TtdVar) -> i64 {
        self.append(EventPayload::SetException { value })
    }

    // -- queries --

    /// Record a `has`-property query
    pub fn record_has_property(&mut self, object: u64, property: PropertyId) -> ActionToken {
        self.pin_property(property);
        self.append_pending(EventPayload::HasProperty { object, property })
    }

    /// Record an `instanceof` query
    pub fn record_instance_of(&mut self, value: TtdVar, constructor: u64) -> ActionToken {
        self.append_pending(EventPayload::InstanceOf { value, constructor })
    }

    /// Record an equality comparison
    pub fn record_equals(&mut self, left: TtdVar, right: TtdVar, strict: bool) -> ActionToken {
        self.append_pending(EventPayload::Equals {
            left,
            right,
            strict,
        })
    }

    /// Record a symbol-to-property-id lookup
    pub fn record_property_id_from_symbol(&mut self, symbol: TtdVar) -> ActionToken {
        self.append_pending(EventPayload::PropertyIdFromSymbol { symbol })
    }

    /// Record a prototype read
    pub fn record_get_prototype(&mut self, object: u64) -> ActionToken {
        self.append_pending(EventPayload::GetPrototype { object })
    }

    /// Record a property read
    pub fn record_get_property(&mut self, object: u64, property: PropertyId) -> ActionToken {
        self.pin_property(property);
        self.append_pending(EventPayload::GetProperty { object, property })
    }

    /// Record an indexed read
    pub fn record_get_index(&mut self, object: u64, index: u32) -> ActionToken {
        self.append_pending(EventPayload::GetIndex { object, index })
    }

    /// Record an own-property read
    pub fn record_get_own_property_info(
        &mut self,
        object: u64,
        property: PropertyId,
    ) -> ActionToken {
        self.pin_property(property);
        self.append_pending(EventPayload::GetOwnPropertyInfo { object, property })
    }

    /// Record an own-property-names query
    pub fn record_get_own_property_names(&mut self, object: u64) -> ActionToken {
        self.append_pending(EventPayload::GetOwnPropertyNames { object })
    }

    /// Record an own-property-symbols query
    pub fn record_get_own_property_symbols(&mut self, object: u64) -> ActionToken {
        self.append_pending(EventPayload::GetOwnPropertySymbols { object })
    }

    /// Record a typed-array descriptor read
    pub fn record_get_typed_array_info(&mut self, object: u64) -> ActionToken {
        self.append_pending(EventPayload::GetTypedArrayInfo { object })
    }

    // -- mutation --

    /// Record a `defineProperty`
    pub fn record_define_property(
        &mut self,
        object: u64,
        property: PropertyId,
        value: TtdVar,
    ) -> i64 {
        self.pin_property(property);
        self.append(EventPayload::DefineProperty {
            object,
            property,
            value,
        })
    }

    /// Record a property delete
    pub fn record_delete_property(&mut self, object: u64, property: PropertyId) -> ActionToken {
        self.pin_property(property);
        self.append_pending(EventPayload::DeleteProperty { object, property })
    }

    /// Record a prototype write
    pub fn record_set_prototype(&mut self, object: u64, prototype: TtdVar) -> i64 {
        self.append(EventPayload::SetPrototype { object, prototype })
    }

    /// Record a property write
    pub fn record_set_property(
        &mut self,
        object: u64,
        property: PropertyId,
        value: TtdVar,
    ) -> i64 {
        self.pin_property(property);
        self.append(EventPayload::SetProperty {
            object,
            property,
            value,
        })
    }

    /// Record an indexed write
    pub fn record_set_index(&mut self, object: u64, index: u32, value: TtdVar) -> i64 {
        self.append(EventPayload::SetIndex {
            object,
            index,
            value,
        })
    }

    // -- raw buffers --

    /// Record a buffer-to-buffer copy
    pub fn record_raw_buffer_copy(
        &mut self,
        dst: u64,
        dst_offset: u32,
        src: u64,
        src_offset: u32,
        length: u32,
    ) -> i64 {
        self.append(EventPayload::RawBufferCopy {
            dst,
            dst_offset,
            src,
            src_offset,
            length,
        })
    }

    /// Record a buffer overwrite; bytes are deep-copied
    pub fn record_raw_buffer_modify(&mut self, object: u64, offset: u32, bytes: Vec<u8>) -> i64 {
        self.append(EventPayload::RawBufferModify {
            object,
            offset,
            bytes,
        })
    }

    /// Record the start of an async buffer modification
    pub fn record_raw_buffer_async_register(&mut self, object: u64, initial_pos: u32) -> i64 {
        self.append(EventPayload::RawBufferAsyncRegister {
            object,
            initial_pos,
        })
    }

    /// Record the completion of an async buffer modification
    pub fn record_raw_buffer_async_complete(
        &mut self,
        object: u64,
        final_modification_pos: u32,
    ) -> i64 {
        self.append(EventPayload::RawBufferAsyncComplete {
            object,
            final_modification_pos,
        })
    }

    // -- calls and code --

    /// Record a constructor invocation
    pub fn record_construct_call(&mut self, function: u64, args: Vec<TtdVar>) -> ActionToken {
        self.append_pending(EventPayload::ConstructCall { function, args })
    }

    /// Record a script parse
    pub fn record_code_parse(&mut self, body_id: u64, origin: SourceOrigin) -> i64 {
        self.append(EventPayload::CodeParse { body_id, origin })
    }

    /// Record the root call of a callback turn. Depth-zero calls become the
    /// turn's top-level action and adopt the host callback id.
    pub fn record_call_existing_function(
        &mut self,
        function: u64,
        args: Vec<TtdVar>,
        nesting_depth: u32,
        host_callback_id: i64,
    ) -> ActionToken {
        let token = self.append_pending(EventPayload::CallExistingFunction {
            function,
            args,
            nesting_depth,
            host_callback_id,
            rtr_snapshot: None,
        });
        if nesting_depth == 0 {
            self.top_level_callback_time = token.event_time;
            self.host_callback_id = host_callback_id;
        }
        token
    }

    // -- pruning --

    /// Drop oldest entries so at most `retention` snapshot markers remain.
    /// The most recent snapshot is always kept; everything from the first
    /// retained marker onward survives.
    pub fn prune_log_length(&mut self, retention: usize) {
        let retention = retention.max(1);
        let snapshot_times: Vec<i64> = self
            .events
            .iter()
            .filter(|e| e.is_snapshot())
            .map(|e| e.event_time)
            .collect();
        if snapshot_times.len() <= retention {
            return;
        }
        let first_retained = snapshot_times[snapshot_times.len() - retention];
        while self
            .events
            .front()
            .map(|e| e.event_time < first_retained)
            .unwrap_or(false)
        {
            self.events.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeFlag;

    fn recording() -> EventLog {
        EventLog::new(BaseMode::Record)
    }

    fn tc_with_context() -> ThreadContext {
        let mut tc = ThreadContext::new();
        let id = tc.create_context();
        tc.set_active(id).unwrap();
        tc
    }

    #[test]
    fn test_event_times_are_monotonic() {
        let mut log = recording();
        let a = log.record_telemetry("one", false);
        let b = log.record_add_root_ref(5);
        let token = log.record_allocate_object();
        assert!(a < b && b < token.event_time);
        assert_eq!(log.last_event_time(), Some(token.event_time));
        assert!(log.complete_action(token, TtdVar::LogObject(2)));
    }

    #[test]
    fn test_completion_fills_result() {
        let mut log = recording();
        let token = log.record_create_integer(41);
        log.complete_action(token, TtdVar::Int(41));
        let entry = log.events().back().unwrap();
        assert_eq!(entry.status, ActionStatus::Completed);
        assert_eq!(entry.result, TtdVar::Int(41));
    }

    #[test]
    fn test_abandoned_token_stays_incomplete() {
        let mut log = recording();
        let token = log.record_allocate_array(3);
        let _ = token; // dropped without completing
        let entry = log.events().back().unwrap();
        assert_eq!(entry.status, ActionStatus::NotCompleted);
    }

    #[test]
    fn test_completion_with_exception() {
        let mut log = recording();
        let token = log.record_construct_call(4, vec![]);
        log.complete_action_with_exception(token, TtdVar::String("boom".into()));
        let entry = log.events().back().unwrap();
        assert_eq!(entry.status, ActionStatus::CompletedWithException);
    }

    #[test]
    fn test_stale_token_rejected() {
        let mut log = recording();
        let token = ActionToken { event_time: 99 };
        assert!(!log.complete_action(token, TtdVar::Null));
    }

    #[test]
    fn test_snapshot_only_at_yield_points() {
        let tc = tc_with_context();
        let mut log = recording();
        log.set_snapshot_interval_micros(1_000);

        log.note_execution_time(5_000);
        assert!(log.snapshot_due());
        // no snapshot until the loop yields
        log.record_telemetry("busy", false);
        assert!(log.events().iter().all(|e| !e.is_snapshot()));

        log.record_event_loop_yield_point(&tc).unwrap();
        assert!(log.events().iter().any(|e| e.is_snapshot()));
        assert!(!log.snapshot_due());
    }

    #[test]
    fn test_prune_keeps_newest_snapshots() {
        let tc = tc_with_context();
        let mut log = recording();
        for round in 0..3 {
            log.record_telemetry(format!("round {}", round), false);
            log.record_snapshot(&tc).unwrap();
        }
        let last_snap = log.last_event_time().unwrap();

        log.prune_log_length(1);
        let snapshots: Vec<i64> = log
            .events()
            .iter()
            .filter(|e| e.is_snapshot())
            .map(|e| e.event_time)
            .collect();
        assert_eq!(snapshots, vec![last_snap]);
        assert_eq!(log.first_event_time(), Some(last_snap));
    }

    #[test]
    fn test_prune_retention_clamps_to_one() {
        let tc = tc_with_context();
        let mut log = recording();
        log.record_snapshot(&tc).unwrap();
        log.record_snapshot(&tc).unwrap();
        log.prune_log_length(0);
        assert_eq!(
            log.events().iter().filter(|e| e.is_snapshot()).count(),
            1
        );
    }

    #[test]
    fn test_script_tables_partition_by_origin() {
        let mut log = recording();
        let mut loaded = FunctionSource::loaded(1, "app.js", "var x;");
        loaded.body_id = 1;
        let mut evaled = FunctionSource::eval(1, "x + 1", false);
        evaled.body_id = 2;
        log.record_top_level_code_load(loaded);
        log.record_top_level_code_load(evaled);

        assert_eq!(log.loaded_scripts().len(), 1);
        assert_eq!(log.eval_scripts().len(), 1);
        assert!(log.new_function_scripts().is_empty());
        assert_eq!(log.find_script(2).unwrap().text, "x + 1");
        assert!(log.find_script(3).is_none());
    }

    #[test]
    fn test_root_call_sets_turn_state() {
        let mut log = recording();
        assert_eq!(log.top_level_callback_time(), -1);
        let token = log.record_call_existing_function(7, vec![], 0, 42);
        assert_eq!(log.top_level_callback_time(), token.event_time);
        assert_eq!(log.host_callback_id(), 42);
        log.complete_action(token, TtdVar::Undefined);

        // nested calls leave the turn state alone
        let nested = log.record_call_existing_function(8, vec![], 1, -1);
        assert_eq!(log.top_level_callback_time(), token.event_time);
        log.complete_action(nested, TtdVar::Undefined);
    }

    #[test]
    fn test_pinned_properties_accumulate() {
        let mut log = recording();
        let t1 = log.record_set_property(1, 20, TtdVar::Int(1));
        let t2 = log.record_get_property(1, 18);
        let _ = (t1, t2);
        assert_eq!(log.pinned_properties(), vec![18, 20]);
    }

    #[test]
    fn test_breakpoints_fire_only_under_debugger() {
        let mut log = EventLog::new(BaseMode::Replay);
        let id = log.breakpoints_mut().set(7, 2, -1, -1);
        log.on_function_enter(7);

        assert_eq!(log.on_statement(2), None);
        log.mode_mut().set_base(BaseMode::ReplayDebugger);
        assert_eq!(log.on_statement(2), Some(id));
        assert_eq!(log.on_statement(3), None);
    }

    #[test]
    fn test_reverse_step_scan_resolves_last_hit() {
        let mut log = EventLog::new(BaseMode::ReplayDebugger);
        log.breakpoints_mut().set(7, 2, -1, -1);
        log.mode_mut().push_flag(ModeFlag::SuppressBreakpoints);

        // two invocations cross the breakpoint without trapping
        log.on_function_enter(7);
        assert_eq!(log.on_statement(2), None);
        log.on_function_return();
        log.on_function_enter(7);
        assert_eq!(log.on_statement(2), None);
        log.on_function_return();
        log.mode_mut().pop_flag();

        let target = log.reverse_step_target().unwrap();
        assert_eq!(target.frame.function_time, 2);
        assert!(log.reverse_step_target().is_none());
    }

    #[test]
    fn test_statement_updates_track_location() {
        let mut log = recording();
        log.on_function_enter(3);
        log.on_statement(0);
        log.on_loop_back_edge();
        log.on_statement(1);
        let frame = log.callstack().current_frame().unwrap();
        assert_eq!(frame.current_stmt, 1);
        assert_eq!(frame.last_stmt, 0);
        assert_eq!(frame.loop_time, 1);

        log.on_function_unwind();
        assert!(log.callstack().last_return_location().unwrap().unwound);
    }
}

//! Call-stack shadow
//!
//! During execution the log maintains a shadow of the real call stack: one
//! counter frame per live invocation, carrying the body id, the global
//! function-invocation count at entry, a per-frame loop-iteration counter,
//! and the current/previous statement indices. Breakpoint predicates and
//! "what location corresponds to event time T" queries both read this.

use rustc_hash::FxHashMap;

/// One shadow frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleCallCounter {
    /// Body the frame executes
    pub function: u64,
    /// Global invocation count when this frame was entered
    pub function_time: i64,
    /// Loop iterations taken inside this frame so far
    pub loop_time: i64,
    /// Statement currently executing (-1 before the first statement)
    pub current_stmt: i64,
    /// Statement executed before the current one (-1 when none)
    pub last_stmt: i64,
}

/// Location execution last returned to, kept after frames pop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnLocation {
    /// Body of the popped frame
    pub body_id: u64,
    /// Statement that was executing when the frame popped
    pub statement: i64,
    /// Invocation count of the popped frame
    pub function_time: i64,
    /// Loop counter of the popped frame
    pub loop_time: i64,
    /// True when the frame popped by exception unwind
    pub unwound: bool,
}

/// Shadow of the engine call stack
#[derive(Debug, Default)]
pub struct CallStackShadow {
    frames: Vec<SingleCallCounter>,
    invocations: i64,
    per_body_invocations: FxHashMap<u64, i64>,
    last_return: Option<ReturnLocation>,
}

impl CallStackShadow {
    /// Empty shadow
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame on function entry
    pub fn push_call(&mut self, body_id: u64) {
        self.invocations += 1;
        *self.per_body_invocations.entry(body_id).or_insert(0) += 1;
        self.frames.push(SingleCallCounter {
            function: body_id,
            function_time: self.invocations,
            loop_time: 0,
            current_stmt: -1,
            last_stmt: -1,
        });
    }

    /// Pop a frame on normal return
    pub fn pop_call(&mut self) -> Option<SingleCallCounter> {
        self.pop_inner(false)
    }

    /// Pop a frame on exception unwind
    pub fn pop_call_on_exception(&mut self) -> Option<SingleCallCounter> {
        self.pop_inner(true)
    }

    fn pop_inner(&mut self, unwound: bool) -> Option<SingleCallCounter> {
        let frame = self.frames.pop()?;
        self.last_return = Some(ReturnLocation {
            body_id: frame.function,
            statement: frame.current_stmt,
            function_time: frame.function_time,
            loop_time: frame.loop_time,
            unwound,
        });
        Some(frame)
    }

    /// Record that the top frame moved to a new statement
    pub fn update_statement(&mut self, statement: i64) {
        if let Some(frame) = self.frames.last_mut() {
            frame.last_stmt = frame.current_stmt;
            frame.current_stmt = statement;
        }
    }

    /// Record a loop back-edge in the top frame
    pub fn update_loop(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.loop_time += 1;
        }
    }

    /// Current innermost frame
    pub fn current_frame(&self) -> Option<&SingleCallCounter> {
        self.frames.last()
    }

    /// Live frame count
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Total function invocations observed
    pub fn invocation_count(&self) -> i64 {
        self.invocations
    }

    /// Invocations of one body
    pub fn invocations_of(&self, body_id: u64) -> i64 {
        self.per_body_invocations.get(&body_id).copied().unwrap_or(0)
    }

    /// Where execution last returned to
    pub fn last_return_location(&self) -> Option<&ReturnLocation> {
        self.last_return.as_ref()
    }

    /// Drop all frames (top-level turn finished)
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

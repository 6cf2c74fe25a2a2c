//! Breakpoints
//!
//! A breakpoint is three independent predicates over the shadow frame at a
//! statement boundary: source location (body + statement), function
//! invocation count, and loop iteration count. A predicate set to -1 is
//! "don't care". Under suppression the manager does not trap but remembers
//! every hit it skipped; reverse-step resolves "the previous real
//! breakpoint" from those skip candidates.

use crate::callstack::SingleCallCounter;

/// One registered breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    /// Manager-assigned id
    pub id: u32,
    /// Body predicate (-1 matches any body)
    pub body_id: i64,
    /// Statement predicate (-1 matches any statement)
    pub statement: i64,
    /// Invocation-count predicate (-1 matches any invocation)
    pub function_time: i64,
    /// Loop-iteration predicate (-1 matches any iteration)
    pub loop_time: i64,
}

impl Breakpoint {
    /// True when every set predicate matches the frame
    pub fn matches(&self, frame: &SingleCallCounter) -> bool {
        (self.body_id == -1 || self.body_id == frame.function as i64)
            && (self.statement == -1 || self.statement == frame.current_stmt)
            && (self.function_time == -1 || self.function_time == frame.function_time)
            && (self.loop_time == -1 || self.loop_time == frame.loop_time)
    }
}

/// A breakpoint hit skipped while suppression was active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedHit {
    /// Breakpoint that would have fired
    pub breakpoint_id: u32,
    /// Frame state at the skipped statement boundary
    pub frame: SingleCallCounter,
}

/// Registered breakpoints plus the suppression skip list
#[derive(Debug, Default)]
pub struct BreakpointManager {
    next_id: u32,
    active: Vec<Breakpoint>,
    preserved: Vec<Breakpoint>,
    skipped: Vec<SkippedHit>,
}

impl BreakpointManager {
    /// Empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a breakpoint; -1 in any predicate means "don't care"
    pub fn set(
        &mut self,
        body_id: i64,
        statement: i64,
        function_time: i64,
        loop_time: i64,
    ) -> u32 {
        self.next_id += 1;
        let id = self.next_id;
        self.active.push(Breakpoint {
            id,
            body_id,
            statement,
            function_time,
            loop_time,
        });
        id
    }

    /// Remove a breakpoint; false when the id is unknown
    pub fn clear(&mut self, id: u32) -> bool {
        let before = self.active.len();
        self.active.retain(|bp| bp.id != id);
        self.active.len() != before
    }

    /// Registered breakpoints
    pub fn active(&self) -> &[Breakpoint] {
        &self.active
    }

    /// Check the frame at a statement boundary. Returns the id to trap on,
    /// or records a skip candidate when `suppress` is set.
    pub fn check(&mut self, frame: &SingleCallCounter, suppress: bool) -> Option<u32> {
        let hit = self.active.iter().find(|bp| bp.matches(frame))?;
        if suppress {
            self.skipped.push(SkippedHit {
                breakpoint_id: hit.id,
                frame: *frame,
            });
            return None;
        }
        Some(hit.id)
    }

    /// Most recent skipped hit (the reverse-step target)
    pub fn last_skipped(&self) -> Option<&SkippedHit> {
        self.skipped.last()
    }

    /// Forget accumulated skip candidates (scan finished)
    pub fn clear_skipped(&mut self) {
        self.skipped.clear();
    }

    /// Stash the active set aside (snapshot inflate rebuilds engine state
    /// underneath; breakpoints survive it here)
    pub fn preserve(&mut self) {
        self.preserved.append(&mut self.active);
    }

    /// Bring the stashed set back
    pub fn restore_preserved(&mut self) {
        self.active.append(&mut self.preserved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(function: u64, stmt: i64, ftime: i64, ltime: i64) -> SingleCallCounter {
        SingleCallCounter {
            function,
            function_time: ftime,
            loop_time: ltime,
            current_stmt: stmt,
            last_stmt: -1,
        }
    }

    #[test]
    fn test_dont_care_predicates() {
        let mut mgr = BreakpointManager::new();
        let id = mgr.set(3, 7, -1, -1);
        assert_eq!(mgr.check(&frame(3, 7, 100, 50), false), Some(id));
        assert_eq!(mgr.check(&frame(3, 8, 100, 50), false), None);
        assert_eq!(mgr.check(&frame(4, 7, 100, 50), false), None);
    }

    #[test]
    fn test_count_predicates() {
        let mut mgr = BreakpointManager::new();
        let id = mgr.set(-1, -1, 5, 2);
        assert_eq!(mgr.check(&frame(1, 0, 5, 2), false), Some(id));
        assert_eq!(mgr.check(&frame(1, 0, 5, 3), false), None);
        assert_eq!(mgr.check(&frame(1, 0, 6, 2), false), None);
    }

    #[test]
    fn test_suppression_records_skip_candidates() {
        let mut mgr = BreakpointManager::new();
        let id = mgr.set(1, 2, -1, -1);
        assert_eq!(mgr.check(&frame(1, 2, 10, 0), true), None);
        assert_eq!(mgr.check(&frame(1, 2, 11, 0), true), None);
        let last = mgr.last_skipped().unwrap();
        assert_eq!(last.breakpoint_id, id);
        assert_eq!(last.frame.function_time, 11);
        mgr.clear_skipped();
        assert!(mgr.last_skipped().is_none());
    }

    #[test]
    fn test_clear_and_preserve() {
        let mut mgr = BreakpointManager::new();
        let a = mgr.set(1, 1, -1, -1);
        let b = mgr.set(2, 2, -1, -1);
        assert!(mgr.clear(a));
        assert!(!mgr.clear(a));

        mgr.preserve();
        assert!(mgr.active().is_empty());
        mgr.restore_preserved();
        assert_eq!(mgr.active().len(), 1);
        assert_eq!(mgr.active()[0].id, b);
    }
}

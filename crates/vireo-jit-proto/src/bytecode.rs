//! Portable JIT bytecode
//!
//! The function-body artifact carried inside a work item: a small stack
//! machine over numbers and property slots. The client's bytecode emitter
//! produces this; the server's backends consume it. It is deliberately
//! self-contained so the server never has to read client memory to compile.

use serde::{Deserialize, Serialize};

/// One stack-machine operation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum JitOp {
    /// Push a constant from the body's constant pool
    ConstNum(u16),
    /// Push an immediate 32-bit integer
    ConstInt(i32),
    /// Push a constant from the work item's number page segment
    PageConst(u16),
    /// Push argument `n`
    LoadArg(u8),
    /// Push the recorded global-`this` address as a number
    LoadGlobalThis,
    /// Pop two, push sum
    Add,
    /// Pop two, push difference
    Sub,
    /// Pop two, push product
    Mul,
    /// Pop two, push quotient
    Div,
    /// Pop one, push negation
    Neg,
    /// Pop two, push 1.0/0.0 equality
    Eq,
    /// Pop two, push 1.0/0.0 less-than
    Lt,
    /// Pop two, push 1.0/0.0 less-or-equal
    Le,
    /// Unconditional relative jump (in ops)
    Jump(i32),
    /// Pop one; jump when it is 0.0
    JumpIfFalse(i32),
    /// Property load through inline cache `n`
    LoadProperty(u16),
    /// Pop one; property store through inline cache `n`
    StoreProperty(u16),
    /// Pop one, return it
    Return,
}

/// Errors found while validating a body before compilation
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BodyError {
    /// Body contains no operations
    #[error("Empty body")]
    Empty,
    /// Constant index out of range
    #[error("Constant index {0} out of range")]
    BadConstIndex(u16),
    /// Jump target lands outside the body
    #[error("Jump at op {0} lands outside the body")]
    BadJumpTarget(usize),
    /// Inline cache index not described by the work item
    #[error("Inline cache index {0} not described")]
    BadCacheIndex(u16),
    /// Page-segment constant referenced but no segment supplied
    #[error("Page constant {0} referenced without a number page segment")]
    MissingPageSegment(u16),
}

/// A function body pending compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JitBody {
    /// Client-side function body id
    pub body_id: u64,
    /// Display name for diagnostics
    pub name: String,
    /// Number of arguments the function takes
    pub arg_count: u8,
    /// Constant pool
    pub consts: Vec<f64>,
    /// Operations
    pub ops: Vec<JitOp>,
}

impl JitBody {
    /// Validate indices and jump targets.
    ///
    /// `cache_count` is the number of inline caches the surrounding work
    /// item describes; `page_const_count` the number of page-segment
    /// constants available (zero when no segment was supplied).
    pub fn validate(&self, cache_count: u16, page_const_count: u16) -> Result<(), BodyError> {
        if self.ops.is_empty() {
            return Err(BodyError::Empty);
        }
        for (i, op) in self.ops.iter().enumerate() {
            match *op {
                JitOp::ConstNum(idx) => {
                    if idx as usize >= self.consts.len() {
                        return Err(BodyError::BadConstIndex(idx));
                    }
                }
                JitOp::PageConst(idx) => {
                    if idx >= page_const_count {
                        return Err(BodyError::MissingPageSegment(idx));
                    }
                }
                JitOp::LoadProperty(idx) | JitOp::StoreProperty(idx) => {
                    if idx >= cache_count {
                        return Err(BodyError::BadCacheIndex(idx));
                    }
                }
                JitOp::Jump(delta) | JitOp::JumpIfFalse(delta) => {
                    let target = i as i64 + 1 + delta as i64;
                    if target < 0 || target > self.ops.len() as i64 {
                        return Err(BodyError::BadJumpTarget(i));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

//! Function-body artifacts
//!
//! A `FunctionSource` carries enough source text and scope metadata to
//! rebuild a function body without re-reading the original file. The TTD
//! log persists these in its top-level script tables; the JIT work item
//! references bodies by id.

use serde::{Deserialize, Serialize};

/// Host-assigned id grouping bodies that came from the same script load
pub type SourceContextId = u64;

/// How a top-level body entered the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceOrigin {
    /// Loaded from a host-provided script (file, network)
    Load,
    /// Constructed via `new Function`
    NewFunction,
    /// Constructed via `eval`
    Eval,
}

/// One function body's source and scope metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSource {
    /// Stable body id within the thread context
    pub body_id: u64,
    /// Host source-context id (groups bodies from one load)
    pub source_context: SourceContextId,
    /// How the body entered the engine
    pub origin: SourceOrigin,
    /// URI the host reported for the script
    pub uri: String,
    /// Full source text
    pub text: String,
    /// 0-based line of the body start
    pub line: u32,
    /// 0-based column of the body start
    pub column: u32,
    /// Strict-mode body
    pub is_strict: bool,
}

impl FunctionSource {
    /// Body loaded from a host script
    pub fn loaded(source_context: SourceContextId, uri: &str, text: &str) -> Self {
        Self {
            body_id: 0,
            source_context,
            origin: SourceOrigin::Load,
            uri: uri.to_string(),
            text: text.to_string(),
            line: 0,
            column: 0,
            is_strict: false,
        }
    }

    /// Body constructed via `new Function`
    pub fn new_function(source_context: SourceContextId, text: &str) -> Self {
        Self {
            body_id: 0,
            source_context,
            origin: SourceOrigin::NewFunction,
            uri: String::new(),
            text: text.to_string(),
            line: 0,
            column: 0,
            is_strict: false,
        }
    }

    /// Body constructed via `eval`
    pub fn eval(source_context: SourceContextId, text: &str, is_strict: bool) -> Self {
        Self {
            body_id: 0,
            source_context,
            origin: SourceOrigin::Eval,
            uri: String::new(),
            text: text.to_string(),
            line: 0,
            column: 0,
            is_strict,
        }
    }
}

//! Generation-checked context handles
//!
//! Server objects are referenced by an arena index plus a generation
//! counter instead of obfuscated pointers. The server validates both on
//! every call, so a stale handle (slot reused after cleanup) fails with
//! `Status::InvalidArg` instead of touching the wrong object.

use serde::{Deserialize, Serialize};

/// Arena slot reference: index + generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawHandle {
    /// Slot index in the server-side arena
    pub index: u32,
    /// Slot generation at issue time; zero is never issued
    pub generation: u32,
}

impl RawHandle {
    /// Build a handle from its parts
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// True for the never-issued generation
    pub fn is_null(&self) -> bool {
        self.generation == 0
    }
}

impl std::fmt::Display for RawHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

/// Handle to a server-side thread context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadContextHandle(pub RawHandle);

/// Handle to a server-side script context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptContextHandle(pub RawHandle);

impl std::fmt::Display for ThreadContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tc/{}", self.0)
    }
}

impl std::fmt::Display for ScriptContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sc/{}", self.0)
    }
}

//! RPC result status codes
//!
//! The server's call guard converts every failure inside a call body into
//! exactly one of these codes. A misbehaving client must never be able to
//! crash the server, so nothing past the guard propagates as a fault.

use serde::{Deserialize, Serialize};

/// Result of one RPC operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Operation completed
    Ok,
    /// Null, stale, or out-of-range handle; malformed argument
    InvalidArg,
    /// Context was closed before or during the call
    AccessDenied,
    /// Allocation failure inside the call body
    OutOfMemory,
    /// Stack exhaustion sentinel inside the call body
    OutOfStack,
    /// Operation was aborted server-side
    Aborted,
    /// Any other failure
    Fail,
}

impl Status {
    /// True only for `Ok`
    pub fn is_success(self) -> bool {
        self == Status::Ok
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::InvalidArg => "invalid-argument",
            Status::AccessDenied => "access-denied",
            Status::OutOfMemory => "out-of-memory",
            Status::OutOfStack => "out-of-stack",
            Status::Aborted => "aborted",
            Status::Fail => "fail",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_ok_is_success() {
        assert!(Status::Ok.is_success());
        for s in [
            Status::InvalidArg,
            Status::AccessDenied,
            Status::OutOfMemory,
            Status::OutOfStack,
            Status::Aborted,
            Status::Fail,
        ] {
            assert!(!s.is_success(), "{} must not be success", s);
        }
    }
}

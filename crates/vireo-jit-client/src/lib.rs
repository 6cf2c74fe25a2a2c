//! Vireo JIT Client
//!
//! Engine-process half of the out-of-process JIT split. The client owns
//! the connection to the JIT server, issues typed calls for each RPC
//! operation, and surfaces failed statuses as errors instead of letting
//! zeroed payloads propagate into the engine.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod transport;

pub use client::{JitClient, ThreadContextInfo};
pub use transport::{JitTransport, LocalTransport, SocketTransport};

use vireo_jit_proto::framing::TransportError;
use vireo_jit_proto::Status;

/// Client-side call failure
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The connection itself failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server completed the call with a failing status
    #[error("Call failed: {status}")]
    Call {
        /// Status the server reported
        status: Status,
    },

    /// The server answered with the wrong response shape
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl ClientError {
    /// The failing status, when the server reported one
    pub fn status(&self) -> Option<Status> {
        match self {
            ClientError::Call { status } => Some(*status),
            _ => None,
        }
    }
}

/// Result alias for client calls
pub type ClientResult<T> = Result<T, ClientError>;

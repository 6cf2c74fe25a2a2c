//! Wire framing
//!
//! Each message travels as a 4-byte little-endian length followed by a
//! JSON payload. The length cap bounds what a hostile peer can make the
//! server buffer.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Largest frame either side will accept
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Transport-layer failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket or pipe failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload failed to encode or decode
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Peer announced a frame above the cap
    #[error("Frame length {0} exceeds cap {MAX_FRAME_LEN}")]
    FrameTooLarge(u32),

    /// Peer closed the connection at a frame boundary
    #[error("Connection closed")]
    Closed,
}

/// Write one length-prefixed frame
pub fn write_frame<T: Serialize>(w: &mut impl Write, msg: &T) -> Result<(), TransportError> {
    let payload = serde_json::to_vec(msg)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&payload)?;
    w.flush()?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// A clean EOF before the length prefix maps to `Closed`; EOF mid-frame is
/// an I/O error.
pub fn read_frame<T: DeserializeOwned>(r: &mut impl Read) -> Result<T, TransportError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match r.read(&mut len_buf[filled..])? {
            0 if filled == 0 => return Err(TransportError::Closed),
            0 => {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof inside frame length",
                )))
            }
            n => filled += n,
        }
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(serde_json::from_slice(&payload)?)
}

//! Frame building.
//!
//! A frame is `[u32 big-endian length][compressed envelope bytes]`. The
//! prefix counts only the compressed payload, so the receiver can find
//! frame boundaries regardless of how TCP splits or coalesces writes.

use crate::codec::{CodecError, JsonZlibCodec};
use crate::error::Result;
use crate::protocol::Envelope;

/// Length prefix size in bytes (fixed, exactly 4).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum compressed payload size (16 MiB).
///
/// A prefix above this is treated as stream corruption, not as a frame to
/// wait for.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encode one envelope as a complete self-delimited frame.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>> {
    let payload = JsonZlibCodec::encode(envelope)?;

    if payload.len() > DEFAULT_MAX_FRAME_SIZE {
        return Err(CodecError::Oversized {
            size: payload.len(),
            max: DEFAULT_MAX_FRAME_SIZE,
        }
        .into());
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

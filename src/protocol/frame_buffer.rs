//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management and a two-state machine:
//! - `WaitingForLength`: need the 4-byte prefix
//! - `WaitingForPayload`: prefix parsed, need N more payload bytes
//!
//! A single `push` may yield zero, one, or many envelopes, because TCP
//! coalesces and splits application writes arbitrarily. Incomplete data is
//! never an error; only a complete frame that fails to decode is.

use bytes::BytesMut;

use crate::codec::{CodecError, JsonZlibCodec};
use crate::error::{Result, SimbusError};
use crate::protocol::frame::{DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use crate::protocol::Envelope;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the 4-byte length prefix.
    WaitingForLength,
    /// Prefix parsed, waiting for the compressed payload.
    WaitingForPayload { remaining: usize },
}

/// Buffer that turns an ordered byte stream back into envelopes.
///
/// The frame size cap is [`DEFAULT_MAX_FRAME_SIZE`] on both the encode and
/// decode side; a single protocol-wide limit keeps the two ends symmetric.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
}

impl FrameBuffer {
    /// Create an empty frame buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForLength,
        }
    }

    /// Push newly arrived bytes and extract all complete envelopes.
    ///
    /// Returns the envelopes in the order they were framed by the sender.
    /// Partial trailing data stays buffered for the next push.
    ///
    /// # Errors
    ///
    /// Returns an error when a length prefix exceeds the maximum, when a
    /// zero-length frame arrives, or when a complete payload fails to
    /// decompress/deserialize. After any of these the stream must be
    /// considered corrupt.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Envelope>> {
        self.buffer.extend_from_slice(data);

        let mut envelopes = Vec::new();
        while let Some(envelope) = self.try_extract_one()? {
            envelopes.push(envelope);
        }
        Ok(envelopes)
    }

    /// Try to extract a single envelope from the buffer.
    ///
    /// `Ok(None)` means more data is needed - never an error.
    fn try_extract_one(&mut self) -> Result<Option<Envelope>> {
        match self.state {
            State::WaitingForLength => {
                if self.buffer.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }

                let length = u32::from_be_bytes([
                    self.buffer[0],
                    self.buffer[1],
                    self.buffer[2],
                    self.buffer[3],
                ]) as usize;

                if length > DEFAULT_MAX_FRAME_SIZE {
                    return Err(CodecError::Oversized {
                        size: length,
                        max: DEFAULT_MAX_FRAME_SIZE,
                    }
                    .into());
                }
                if length == 0 {
                    // zlib output is never empty; a zero prefix means the
                    // stream is out of sync.
                    return Err(SimbusError::Protocol("zero-length frame".to_string()));
                }

                let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);
                self.state = State::WaitingForPayload { remaining: length };

                // The payload may already be buffered.
                self.try_extract_one()
            }

            State::WaitingForPayload { remaining } => {
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(remaining);
                self.state = State::WaitingForLength;

                let envelope: Envelope = JsonZlibCodec::decode(&payload)?;
                Ok(Some(envelope))
            }
        }
    }

    /// Number of buffered, not-yet-consumed bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard all buffered bytes and reset the state machine.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

//! Protocol module - envelope type, frame building, and frame reassembly.
//!
//! The wire carries length-delimited frames:
//! - 4-byte big-endian length prefix
//! - that many bytes of zlib-compressed JSON (one [`Envelope`])
//!
//! [`FrameBuffer`] accumulates partial reads and yields complete envelopes
//! in arrival order.

mod envelope;
mod frame;
mod frame_buffer;

pub use envelope::Envelope;
pub use frame::{encode_frame, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
pub use frame_buffer::FrameBuffer;

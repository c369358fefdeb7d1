//! JSON + zlib codec using `serde_json` and `flate2`.
//!
//! Encoding pipeline: serialize to compact JSON, then zlib-compress the
//! resulting bytes. Decoding reverses the two steps. Framing (the length
//! prefix) is layered on top by the `protocol` module, so a codec failure
//! here always means a *complete but corrupt* payload, never a partial one.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

/// Failure in the serialize/compress/decompress/deserialize pipeline.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Value could not be serialized to JSON.
    #[error("JSON serialize error: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Decompressed bytes are not valid JSON for the requested type.
    #[error("JSON deserialize error: {0}")]
    Deserialize(#[source] serde_json::Error),

    /// zlib compression failed.
    #[error("compression error: {0}")]
    Compress(#[source] std::io::Error),

    /// zlib decompression failed (corrupt or truncated payload).
    #[error("decompression error: {0}")]
    Decompress(#[source] std::io::Error),

    /// A frame length prefix exceeded the configured maximum.
    #[error("frame of {size} bytes exceeds maximum {max}")]
    Oversized {
        /// Claimed payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// JSON + zlib codec for structured data.
///
/// Implemented as a marker struct with static methods, so callers pick the
/// codec at compile time.
pub struct JsonZlibCodec;

impl JsonZlibCodec {
    /// Encode a value: compact JSON, then zlib compression.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialize`] if the value cannot be represented
    /// as JSON, or [`CodecError::Compress`] if zlib fails.
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
        let serialized = serde_json::to_vec(value).map_err(CodecError::Serialize)?;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&serialized)
            .map_err(CodecError::Compress)?;
        encoder.finish().map_err(CodecError::Compress)
    }

    /// Decode a value: zlib decompression, then JSON deserialization.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decompress`] on corrupt or truncated zlib data,
    /// or [`CodecError::Deserialize`] if the decompressed bytes do not parse
    /// as JSON for type `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
        let mut decoder = ZlibDecoder::new(bytes);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(CodecError::Decompress)?;

        serde_json::from_slice(&decompressed).map_err(CodecError::Deserialize)
    }
}

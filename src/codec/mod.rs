//! Codec module - serialization and compression for envelope payloads.
//!
//! One canonical wire format: compact JSON, zlib-compressed. The payload
//! value type is [`serde_json::Value`], which confines deserialization to
//! the JSON value grammar (maps, sequences, strings, numbers, booleans,
//! null). Untrusted bytes can never instantiate arbitrary types.
//!
//! # Example
//!
//! ```
//! use simbus::codec::JsonZlibCodec;
//!
//! let encoded = JsonZlibCodec::encode(&"hello").unwrap();
//! let decoded: String = JsonZlibCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;

pub use json::{CodecError, JsonZlibCodec};

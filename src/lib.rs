//! # simbus
//!
//! Channel-multiplexed messaging over framed byte streams.
//!
//! A server [`Listener`] accepts TCP connections and tracks the live set;
//! a client [`Gateway`] owns one outward [`Connection`] plus a
//! [`ChannelRouter`] that demultiplexes inbound envelopes to subscriber
//! callbacks. Every message travels as an [`Envelope`] (channel name, JSON
//! payload, optional `reply_to`), zlib-compressed and length-prefixed on
//! the wire.
//!
//! ## Wire format
//!
//! ```text
//! [u32 big-endian length][zlib-compressed compact JSON of the envelope]
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use simbus::{Gateway, Listener, Scope, DEFAULT_PORT};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> simbus::Result<()> {
//!     let (listener, mut incoming) = Listener::start(DEFAULT_PORT, Scope::Local).await?;
//!
//!     let gateway = Gateway::connect("127.0.0.1", listener.local_addr().port()).await?;
//!     gateway.subscribe("general.chat", |_conn, envelope| {
//!         println!("chat: {}", envelope.payload);
//!     })?;
//!     gateway.send("general.chat", json!({"msg": "hello"}), None).await?;
//!
//!     let _server_side = incoming.recv().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod listener;
pub mod protocol;
pub mod router;

mod writer;

pub use codec::{CodecError, JsonZlibCodec};
pub use config::{Scope, CH_CORE_SCENARIO_TITLES, CH_SCENARIO_PREVIEW, DEFAULT_PORT};
pub use connection::{Connection, ConnectionErrorKind, ConnectionEvent, ConnectionId};
pub use error::{Result, SimbusError};
pub use gateway::Gateway;
pub use listener::{Incoming, Listener};
pub use protocol::{Envelope, FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
pub use router::{ChannelRouter, SubscriberFn};

//! Gateway - the client role facade.
//!
//! Owns exactly one outward [`Connection`] and an internal
//! [`ChannelRouter`] bound to it. A background pump task feeds the
//! connection's events into router dispatch, so subscriber callbacks never
//! race with each other.
//!
//! The gateway is an explicitly constructed value: create one, pass it to
//! the consumers that need it, and `disconnect()` when done. There is no
//! process-wide instance.
//!
//! # Example
//!
//! ```ignore
//! use simbus::{Gateway, DEFAULT_PORT};
//! use serde_json::json;
//!
//! let gateway = Gateway::connect("127.0.0.1", DEFAULT_PORT).await?;
//! gateway.request(
//!     "general.core.scenarios.titles",
//!     json!(null),
//!     |_conn, envelope| println!("titles: {}", envelope.payload),
//! ).await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection::{Connection, ConnectionEvent};
use crate::error::{Result, SimbusError};
use crate::protocol::Envelope;
use crate::router::ChannelRouter;

type SharedRouter = Arc<Mutex<ChannelRouter>>;

/// Hook invoked when the gateway's connection goes down.
type DisconnectHook = Arc<dyn Fn() + Send + Sync>;
type SharedHooks = Arc<Mutex<Vec<DisconnectHook>>>;

/// Client-side endpoint: one connection plus its channel router.
pub struct Gateway {
    connection: Connection,
    router: SharedRouter,
    disconnect_hooks: SharedHooks,
    pump_task: JoinHandle<()>,
    reply_counter: AtomicU64,
}

impl Gateway {
    /// Establish the outward TCP connection to a listener.
    pub async fn connect(host: &str, port: u16) -> Result<Gateway> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self::from_stream(stream))
    }

    /// Build a gateway over an already-established byte stream.
    ///
    /// Lets tests drive a gateway over `tokio::io::duplex` without real
    /// networking.
    pub fn from_stream<S>(stream: S) -> Gateway
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (connection, events) = Connection::open(stream);
        let router: SharedRouter = Arc::new(Mutex::new(ChannelRouter::new()));
        let disconnect_hooks: SharedHooks = Arc::new(Mutex::new(Vec::new()));

        let pump_task = tokio::spawn(pump_events(
            events,
            connection.clone(),
            router.clone(),
            disconnect_hooks.clone(),
        ));

        Gateway {
            connection,
            router,
            disconnect_hooks,
            pump_task,
            reply_counter: AtomicU64::new(0),
        }
    }

    /// Whether the underlying connection is still up.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    /// Cumulative bytes written on the underlying connection.
    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.connection.bytes_written()
    }

    /// Send a payload on a channel, optionally asking for a reply.
    pub async fn send(&self, channel: &str, payload: Value, reply_to: Option<&str>) -> Result<()> {
        if channel.is_empty() {
            return Err(SimbusError::Protocol("empty channel name".to_string()));
        }
        let envelope = match reply_to {
            Some(reply_to) => Envelope::with_reply_to(channel, payload, reply_to),
            None => Envelope::new(channel, payload),
        };
        self.connection.send(&envelope).await
    }

    /// Register a callback for every envelope arriving on `channel`.
    ///
    /// Callbacks run on the gateway's pump task with no router lock held,
    /// so they may call back into this gateway (subscribe, unsubscribe,
    /// queue a follow-up send).
    pub fn subscribe<F>(&self, channel: &str, callback: F) -> Result<()>
    where
        F: Fn(&Connection, &Envelope) + Send + Sync + 'static,
    {
        lock(&self.router).subscribe(channel, callback)
    }

    /// Register a callback removed automatically after its first dispatch.
    pub fn subscribe_once<F>(&self, channel: &str, callback: F) -> Result<()>
    where
        F: Fn(&Connection, &Envelope) + Send + Sync + 'static,
    {
        lock(&self.router).subscribe_once(channel, callback)
    }

    /// Register a hook invoked when the connection goes down, whether by
    /// peer disconnect, stream error, or a local [`disconnect`](Self::disconnect).
    pub fn on_disconnect<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.disconnect_hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(hook));
    }

    /// Remove all callbacks for `channel`.
    ///
    /// See [`ChannelRouter::unsubscribe`] for the `ignore_missing`
    /// semantics.
    pub fn unsubscribe(&self, channel: &str, ignore_missing: bool) -> Result<()> {
        lock(&self.router).unsubscribe(channel, ignore_missing)
    }

    /// Send a request and register `handler` for its single reply.
    ///
    /// Generates an ephemeral reply channel name, registers the handler
    /// single-shot there, and sends `payload` on `channel` with `reply_to`
    /// set. Returns the generated reply channel name.
    pub async fn request<F>(&self, channel: &str, payload: Value, handler: F) -> Result<String>
    where
        F: Fn(&Connection, &Envelope) + Send + Sync + 'static,
    {
        let reply_channel = format!(
            "reply.{}",
            self.reply_counter.fetch_add(1, Ordering::Relaxed)
        );

        lock(&self.router).subscribe_once(&reply_channel, handler)?;

        if let Err(e) = self.send(channel, payload, Some(&reply_channel)).await {
            // The reply can never arrive; take the registration back out.
            lock(&self.router).unsubscribe(&reply_channel, true)?;
            return Err(e);
        }
        Ok(reply_channel)
    }

    /// Tear down the connection and clear all channel subscriptions.
    ///
    /// A full reset, not per-channel cleanup. Idempotent.
    pub fn disconnect(&self) {
        lock(&self.router).clear();
        self.connection.close();
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.pump_task.abort();
        self.connection.close();
    }
}

fn lock(router: &SharedRouter) -> MutexGuard<'_, ChannelRouter> {
    router
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Feed connection events into router dispatch until disconnection.
///
/// Callbacks and hooks are invoked with no lock held: the router hands out
/// a snapshot of the matching subscribers, so a callback re-entering the
/// gateway cannot deadlock the pump.
async fn pump_events(
    mut events: mpsc::Receiver<ConnectionEvent>,
    connection: Connection,
    router: SharedRouter,
    disconnect_hooks: SharedHooks,
) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Connected => {
                tracing::debug!(connection = %connection.id(), "gateway connected");
            }
            ConnectionEvent::Message(envelope) => {
                let callbacks = lock(&router).dispatch_set(&envelope.channel);
                for callback in callbacks {
                    callback(&connection, &envelope);
                }
            }
            ConnectionEvent::Error(kind) => {
                tracing::warn!(connection = %connection.id(), ?kind, "gateway connection error");
            }
            ConnectionEvent::Disconnected => {
                tracing::debug!(connection = %connection.id(), "gateway disconnected");
                let hooks = disconnect_hooks
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone();
                for hook in hooks {
                    hook();
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::time::timeout;

    /// Gateway on one end of a duplex, plain Connection as the peer.
    fn gateway_and_peer() -> (Gateway, Connection, mpsc::Receiver<ConnectionEvent>) {
        let (near, far) = duplex(64 * 1024);
        let gateway = Gateway::from_stream(near);
        let (peer, peer_events) = Connection::open(far);
        (gateway, peer, peer_events)
    }

    async fn next_message(events: &mut mpsc::Receiver<ConnectionEvent>) -> Envelope {
        loop {
            let event = timeout(Duration::from_secs(1), events.recv())
                .await
                .expect("timed out")
                .expect("event channel closed");
            match event {
                ConnectionEvent::Message(envelope) => return envelope,
                ConnectionEvent::Connected => continue,
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    async fn wait_until(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (gateway, _peer, mut peer_events) = gateway_and_peer();

        gateway
            .send("general.chat", json!({"msg": "hello"}), None)
            .await
            .unwrap();

        let envelope = next_message(&mut peer_events).await;
        assert_eq!(envelope.channel, "general.chat");
        assert_eq!(envelope.payload, json!({"msg": "hello"}));
        assert_eq!(envelope.reply_to, None);
    }

    #[tokio::test]
    async fn test_send_carries_reply_to() {
        let (gateway, _peer, mut peer_events) = gateway_and_peer();

        gateway
            .send("req", json!(null), Some("tmp.1"))
            .await
            .unwrap();

        let envelope = next_message(&mut peer_events).await;
        assert_eq!(envelope.reply_to.as_deref(), Some("tmp.1"));
    }

    #[tokio::test]
    async fn test_send_rejects_empty_channel() {
        let (gateway, _peer, _peer_events) = gateway_and_peer();
        let result = gateway.send("", json!(null), None).await;
        assert!(matches!(result, Err(SimbusError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_subscriber_receives_inbound_envelope() {
        let (gateway, peer, _peer_events) = gateway_and_peer();

        let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        gateway
            .subscribe("news", move |_conn, envelope| {
                received_clone.lock().unwrap().push(envelope.payload.clone());
            })
            .unwrap();

        peer.send(&Envelope::new("news", json!("extra extra")))
            .await
            .unwrap();

        wait_until(|| !received.lock().unwrap().is_empty()).await;
        assert_eq!(*received.lock().unwrap(), vec![json!("extra extra")]);
    }

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let (gateway, peer, mut peer_events) = gateway_and_peer();

        let replies: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let replies_clone = replies.clone();
        let reply_channel = gateway
            .request("req", json!({"q": 7}), move |_conn, envelope| {
                replies_clone.lock().unwrap().push(envelope.payload.clone());
            })
            .await
            .unwrap();

        // Peer acts as the responder.
        let request = next_message(&mut peer_events).await;
        assert_eq!(request.channel, "req");
        let reply_to = request.reply_to.expect("request must carry reply_to");
        assert_eq!(reply_to, reply_channel);

        peer.send(&Envelope::new(&reply_to, json!({"a": 42})))
            .await
            .unwrap();

        wait_until(|| !replies.lock().unwrap().is_empty()).await;
        assert_eq!(*replies.lock().unwrap(), vec![json!({"a": 42})]);

        // A second reply on the same ephemeral channel is dropped: the
        // registration was single-shot.
        peer.send(&Envelope::new(&reply_to, json!({"a": 43})))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(replies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_callback_may_subscribe_from_within_dispatch() {
        let (gateway, peer, _peer_events) = gateway_and_peer();
        let gateway = Arc::new(gateway);

        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let log_clone = log.clone();
        gateway
            .subscribe("other", move |_conn, _env| {
                log_clone.lock().unwrap().push("other".to_string());
            })
            .unwrap();

        // Handler that registers a new channel from inside dispatch, the
        // way a chained conversation does.
        let gw = gateway.clone();
        let log_clone = log.clone();
        gateway
            .subscribe("titles", move |_conn, _env| {
                log_clone.lock().unwrap().push("titles".to_string());
                let log_inner = log_clone.clone();
                gw.subscribe("preview", move |_conn, _env| {
                    log_inner.lock().unwrap().push("preview".to_string());
                })
                .unwrap();
            })
            .unwrap();

        peer.send(&Envelope::new("titles", json!(null))).await.unwrap();
        wait_until(|| log.lock().unwrap().contains(&"titles".to_string())).await;

        // The pump must keep dispatching after the re-entrant subscribe.
        peer.send(&Envelope::new("other", json!(null))).await.unwrap();
        wait_until(|| log.lock().unwrap().contains(&"other".to_string())).await;

        // And the channel registered from within a callback is live.
        peer.send(&Envelope::new("preview", json!(null))).await.unwrap();
        wait_until(|| log.lock().unwrap().contains(&"preview".to_string())).await;
    }

    #[tokio::test]
    async fn test_callback_may_unsubscribe_itself() {
        let (gateway, peer, _peer_events) = gateway_and_peer();
        let gateway = Arc::new(gateway);

        let count: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
        let count_clone = count.clone();
        let gw = gateway.clone();
        gateway
            .subscribe("once.by.hand", move |_conn, _env| {
                *count_clone.lock().unwrap() += 1;
                gw.unsubscribe("once.by.hand", true).unwrap();
            })
            .unwrap();

        peer.send(&Envelope::new("once.by.hand", json!(1))).await.unwrap();
        wait_until(|| *count.lock().unwrap() == 1).await;

        peer.send(&Envelope::new("once.by.hand", json!(2))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_on_disconnect_fires_when_peer_goes_away() {
        let (gateway, peer, _peer_events) = gateway_and_peer();

        let fired: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
        let fired_clone = fired.clone();
        gateway.on_disconnect(move || {
            *fired_clone.lock().unwrap() += 1;
        });

        peer.close();
        wait_until(|| *fired.lock().unwrap() == 1).await;
        assert!(!gateway.is_connected());
    }

    #[tokio::test]
    async fn test_on_disconnect_fires_on_local_disconnect() {
        let (gateway, _peer, _peer_events) = gateway_and_peer();

        let fired: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
        let fired_clone = fired.clone();
        gateway.on_disconnect(move || {
            *fired_clone.lock().unwrap() += 1;
        });

        gateway.disconnect();
        wait_until(|| *fired.lock().unwrap() == 1).await;
    }

    #[tokio::test]
    async fn test_request_generates_distinct_reply_channels() {
        let (gateway, _peer, _peer_events) = gateway_and_peer();

        let c1 = gateway
            .request("req", json!(1), |_conn, _env| {})
            .await
            .unwrap();
        let c2 = gateway
            .request("req", json!(2), |_conn, _env| {})
            .await
            .unwrap();
        assert_ne!(c1, c2);
    }

    #[tokio::test]
    async fn test_unsubscribe_semantics_pass_through() {
        let (gateway, _peer, _peer_events) = gateway_and_peer();

        assert!(matches!(
            gateway.unsubscribe("never-subscribed", false),
            Err(SimbusError::UnknownChannel(_))
        ));
        gateway.unsubscribe("never-subscribed", true).unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_is_a_full_reset() {
        let (gateway, _peer, _peer_events) = gateway_and_peer();

        gateway.subscribe("x", |_conn, _env| {}).unwrap();
        gateway.subscribe("y", |_conn, _env| {}).unwrap();

        gateway.disconnect();

        assert!(!gateway.is_connected());
        // All subscriptions are gone, not just some.
        assert!(matches!(
            gateway.unsubscribe("x", false),
            Err(SimbusError::UnknownChannel(_))
        ));
        assert!(matches!(
            gateway.unsubscribe("y", false),
            Err(SimbusError::UnknownChannel(_))
        ));

        let result = gateway.send("x", json!(null), None).await;
        assert!(matches!(result, Err(SimbusError::ConnectionClosed)));
    }
}

//! Channel router - the pub/sub layer above one connection.
//!
//! Demultiplexes inbound envelopes by their `channel` field to registered
//! subscriber callbacks. Multiple subscribers per channel are allowed and
//! are invoked synchronously in registration order. Envelopes for channels
//! nobody subscribed to are dropped, not queued: a transient race between
//! unsubscribe and an in-flight reply is expected, not fatal.
//!
//! # Request/reply convention
//!
//! A requester sends on a request channel with `reply_to` naming an
//! ephemeral channel, and registers a handler there with
//! [`subscribe_once`](ChannelRouter::subscribe_once). The responder reads
//! `reply_to` from the envelope and publishes its result on it. Single-shot
//! registration removes the entry after the first dispatch, so forgetting
//! to unsubscribe cannot leak registry entries.

use std::collections::HashMap;
use std::sync::Arc;

use crate::connection::Connection;
use crate::error::{Result, SimbusError};
use crate::protocol::Envelope;

/// Subscriber callback: receives the originating connection and the full
/// envelope, so handlers can read `reply_to`.
///
/// Shared (`Arc`) so a dispatch pass can snapshot the callbacks and invoke
/// them without holding a lock on the router itself.
pub type SubscriberFn = Arc<dyn Fn(&Connection, &Envelope) + Send + Sync>;

struct Subscriber {
    callback: SubscriberFn,
    /// Removed after the first dispatch.
    once: bool,
}

/// Mapping from channel name to its ordered subscribers.
///
/// Mutated only by its owner (the Gateway's pump task or the server-side
/// driver); share behind a mutex when subscribe/dispatch come from
/// different tasks.
pub struct ChannelRouter {
    channels: HashMap<String, Vec<Subscriber>>,
}

impl ChannelRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register a callback for every envelope on `channel`.
    ///
    /// Repeated calls on the same channel append; earlier subscribers are
    /// invoked first.
    pub fn subscribe<F>(&mut self, channel: &str, callback: F) -> Result<()>
    where
        F: Fn(&Connection, &Envelope) + Send + Sync + 'static,
    {
        self.add(channel, callback, false)
    }

    /// Register a callback that is removed after its first dispatch.
    ///
    /// This is the intended registration for ephemeral reply channels.
    pub fn subscribe_once<F>(&mut self, channel: &str, callback: F) -> Result<()>
    where
        F: Fn(&Connection, &Envelope) + Send + Sync + 'static,
    {
        self.add(channel, callback, true)
    }

    fn add<F>(&mut self, channel: &str, callback: F, once: bool) -> Result<()>
    where
        F: Fn(&Connection, &Envelope) + Send + Sync + 'static,
    {
        if channel.is_empty() {
            return Err(SimbusError::Protocol("empty channel name".to_string()));
        }
        self.channels
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber {
                callback: Arc::new(callback),
                once,
            });
        Ok(())
    }

    /// Remove **all** callbacks registered for `channel`.
    ///
    /// With `ignore_missing` the absence of any registration is a silent
    /// no-op; otherwise it is [`SimbusError::UnknownChannel`]. Teardown
    /// code unsubscribes channels it may never have subscribed, so it
    /// passes `ignore_missing = true`.
    pub fn unsubscribe(&mut self, channel: &str, ignore_missing: bool) -> Result<()> {
        match self.channels.remove(channel) {
            Some(_) => Ok(()),
            None if ignore_missing => Ok(()),
            None => Err(SimbusError::UnknownChannel(channel.to_string())),
        }
    }

    /// Drop every registration (Gateway disconnect does a full reset).
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Number of callbacks currently registered for `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, Vec::len)
    }

    /// Whether any channel has a registration.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Deliver one inbound envelope.
    ///
    /// Invokes every subscriber of the exact channel name, in registration
    /// order, then drops the single-shot entries that just fired. Unknown
    /// channels are dropped silently.
    pub fn dispatch(&mut self, connection: &Connection, envelope: &Envelope) {
        for callback in self.dispatch_set(&envelope.channel) {
            callback(connection, envelope);
        }
    }

    /// Collect the callbacks to invoke for one envelope on `channel` and
    /// drop the single-shot entries among them.
    ///
    /// Separating collection from invocation lets a caller that shares the
    /// router behind a mutex release the guard before running callbacks, so
    /// a callback may re-enter the router (subscribe, unsubscribe, issue a
    /// follow-up request) without deadlocking. Registrations made by a
    /// callback take effect from the next envelope on.
    pub fn dispatch_set(&mut self, channel: &str) -> Vec<SubscriberFn> {
        if channel.is_empty() {
            tracing::warn!("dropping envelope with empty channel name");
            return Vec::new();
        }

        let Some(subscribers) = self.channels.get_mut(channel) else {
            tracing::debug!(%channel, "no subscriber, dropping envelope");
            return Vec::new();
        };

        let callbacks: Vec<SubscriberFn> =
            subscribers.iter().map(|s| s.callback.clone()).collect();

        subscribers.retain(|s| !s.once);
        if subscribers.is_empty() {
            self.channels.remove(channel);
        }
        callbacks
    }
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::duplex;

    fn test_connection() -> Connection {
        let (near, _far) = duplex(4096);
        let (connection, _events) = Connection::open(near);
        connection
    }

    type BoxedSubscriber = Box<dyn Fn(&Connection, &Envelope) + Send + Sync>;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> BoxedSubscriber) {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |tag: &str| -> BoxedSubscriber {
            let log = log_clone.clone();
            let tag = tag.to_string();
            Box::new(move |_conn, _env| log.lock().unwrap().push(tag.clone()))
        };
        (log, make)
    }

    #[tokio::test]
    async fn test_channel_isolation() {
        let connection = test_connection();
        let (log, make) = recorder();

        let mut router = ChannelRouter::new();
        router.subscribe("x", make("a")).unwrap();
        router.subscribe("y", make("b")).unwrap();

        router.dispatch(&connection, &Envelope::new("x", json!(null)));

        assert_eq!(*log.lock().unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_in_registration_order() {
        let connection = test_connection();
        let (log, make) = recorder();

        let mut router = ChannelRouter::new();
        router.subscribe("x", make("first")).unwrap();
        router.subscribe("x", make("second")).unwrap();
        router.subscribe("x", make("third")).unwrap();

        router.dispatch(&connection, &Envelope::new("x", json!(null)));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first".to_string(), "second".to_string(), "third".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unknown_channel_is_dropped_silently() {
        let connection = test_connection();
        let mut router = ChannelRouter::new();
        // Must not panic or error.
        router.dispatch(&connection, &Envelope::new("nobody.home", json!(1)));
    }

    #[tokio::test]
    async fn test_subscribe_once_fires_exactly_once() {
        let connection = test_connection();
        let (log, make) = recorder();

        let mut router = ChannelRouter::new();
        router.subscribe_once("reply.1", make("once")).unwrap();
        assert_eq!(router.subscriber_count("reply.1"), 1);

        router.dispatch(&connection, &Envelope::new("reply.1", json!("first")));
        router.dispatch(&connection, &Envelope::new("reply.1", json!("second")));

        assert_eq!(*log.lock().unwrap(), vec!["once".to_string()]);
        assert_eq!(router.subscriber_count("reply.1"), 0);
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn test_once_and_persistent_mix() {
        let connection = test_connection();
        let (log, make) = recorder();

        let mut router = ChannelRouter::new();
        router.subscribe("x", make("keep")).unwrap();
        router.subscribe_once("x", make("drop")).unwrap();

        router.dispatch(&connection, &Envelope::new("x", json!(1)));
        router.dispatch(&connection, &Envelope::new("x", json!(2)));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["keep".to_string(), "drop".to_string(), "keep".to_string()]
        );
        assert_eq!(router.subscriber_count("x"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_all() {
        let (_log, make) = recorder();

        let mut router = ChannelRouter::new();
        router.subscribe("x", make("a")).unwrap();
        router.subscribe("x", make("b")).unwrap();

        router.unsubscribe("x", false).unwrap();
        assert_eq!(router.subscriber_count("x"), 0);
    }

    #[test]
    fn test_unsubscribe_missing_channel() {
        let mut router = ChannelRouter::new();

        let result = router.unsubscribe("never-subscribed", false);
        assert!(matches!(result, Err(SimbusError::UnknownChannel(name)) if name == "never-subscribed"));

        // Same call with ignore_missing succeeds silently.
        router.unsubscribe("never-subscribed", true).unwrap();
    }

    #[test]
    fn test_dispatch_set_prunes_single_shots_before_invocation() {
        let (log, make) = recorder();

        let mut router = ChannelRouter::new();
        router.subscribe_once("reply.9", make("once")).unwrap();

        let callbacks = router.dispatch_set("reply.9");
        assert_eq!(callbacks.len(), 1);
        // The entry is gone even though nothing has been invoked yet.
        assert_eq!(router.subscriber_count("reply.9"), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_channel_name_rejected() {
        let mut router = ChannelRouter::new();
        let result = router.subscribe("", |_conn, _env| {});
        assert!(matches!(result, Err(SimbusError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_handler_sees_reply_to() {
        let connection = test_connection();
        let seen: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();

        let mut router = ChannelRouter::new();
        router
            .subscribe("req", move |_conn, envelope| {
                *seen_clone.lock().unwrap() = envelope.reply_to.clone();
            })
            .unwrap();

        let request = Envelope::with_reply_to("req", json!({"q": 1}), "tmp.1");
        router.dispatch(&connection, &request);

        assert_eq!(seen.lock().unwrap().as_deref(), Some("tmp.1"));
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let (_log, make) = recorder();

        let mut router = ChannelRouter::new();
        router.subscribe("x", make("a")).unwrap();
        router.subscribe("y", make("b")).unwrap();

        router.clear();
        assert!(router.is_empty());
        assert!(matches!(
            router.unsubscribe("x", false),
            Err(SimbusError::UnknownChannel(_))
        ));
    }
}

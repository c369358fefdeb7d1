//! Listener - the server role.
//!
//! Binds a TCP endpoint at a given [`Scope`] and port, wraps each accepted
//! socket in a [`Connection`], and keeps the set of live connections. A
//! connection leaves the set only when it disconnects or errors; `stop()`
//! merely ceases accepting and leaves accepted connections untouched.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Scope;
use crate::connection::{Connection, ConnectionEvent, ConnectionId};
use crate::error::{Result, SimbusError};

/// Capacity of the incoming-connection channel handed to the owner.
const INCOMING_CHANNEL_CAPACITY: usize = 16;

type LiveSet = Arc<Mutex<HashMap<ConnectionId, Connection>>>;

/// A freshly accepted connection, delivered to the Listener's owner.
///
/// The owner typically attaches a
/// [`ChannelRouter`](crate::ChannelRouter) and drives `events`.
pub struct Incoming {
    /// The wrapped connection.
    pub connection: Connection,
    /// The connection's event stream, forwarded by the listener.
    pub events: mpsc::Receiver<ConnectionEvent>,
}

/// TCP listener managing a set of live connections.
pub struct Listener {
    local_addr: SocketAddr,
    scope: Scope,
    listening: Arc<AtomicBool>,
    connections: LiveSet,
    accept_task: JoinHandle<()>,
}

impl Listener {
    /// Bind `(scope, port)` and begin accepting.
    ///
    /// Returns the listener and the channel on which accepted connections
    /// are delivered. Port 0 picks an ephemeral port; see
    /// [`local_addr`](Listener::local_addr).
    ///
    /// # Errors
    ///
    /// [`SimbusError::Bind`] when the address cannot be listened on
    /// (already in use, insufficient privilege).
    pub async fn start(port: u16, scope: Scope) -> Result<(Listener, mpsc::Receiver<Incoming>)> {
        let addr = SocketAddr::from((scope.host(), port));
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|source| SimbusError::Bind { addr, source })?;
        let local_addr = tcp.local_addr()?;

        let listening = Arc::new(AtomicBool::new(true));
        let connections: LiveSet = Arc::new(Mutex::new(HashMap::new()));
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CHANNEL_CAPACITY);

        let accept_task = tokio::spawn(accept_loop(
            tcp,
            connections.clone(),
            incoming_tx,
            listening.clone(),
        ));

        tracing::info!(%local_addr, ?scope, "listening");

        let listener = Listener {
            local_addr,
            scope,
            listening,
            connections,
            accept_task,
        };
        Ok((listener, incoming_rx))
    }

    /// The bound address (useful with port 0).
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The scope this listener was started with.
    #[inline]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Whether the listening socket is still accepting.
    #[inline]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Number of live accepted connections.
    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Look up a live connection by id.
    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        lock(&self.connections).get(&id).cloned()
    }

    /// Stop accepting new connections.
    ///
    /// Closes the listening socket only; previously accepted connections
    /// remain usable until they individually disconnect. Idempotent.
    pub fn stop(&self) {
        if self.listening.swap(false, Ordering::AcqRel) {
            self.accept_task.abort();
            tracing::info!(local_addr = %self.local_addr, "stopped listening");
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(set: &LiveSet) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, Connection>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Accept sockets, wrap them, track them, hand them to the owner.
async fn accept_loop(
    tcp: TcpListener,
    connections: LiveSet,
    incoming_tx: mpsc::Sender<Incoming>,
    listening: Arc<AtomicBool>,
) {
    loop {
        let (socket, peer_addr) = match tcp.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                listening.store(false, Ordering::Release);
                return;
            }
        };

        let (connection, events) = Connection::open(socket);
        let id = connection.id();
        tracing::debug!(connection = %id, %peer_addr, "accepted");

        lock(&connections).insert(id, connection.clone());

        // Forward the event stream to the owner while watching it for the
        // disconnect/error that removes the entry from the live set.
        let (forward_tx, forward_rx) = mpsc::channel(256);
        tokio::spawn(monitor_connection(
            id,
            events,
            forward_tx,
            connections.clone(),
        ));

        let incoming = Incoming {
            connection,
            events: forward_rx,
        };
        if incoming_tx.send(incoming).await.is_err() {
            // Owner is gone; nothing left to accept for.
            tracing::debug!("incoming receiver dropped, accept loop ending");
            listening.store(false, Ordering::Release);
            return;
        }
    }
}

/// Relay one connection's events and evict it from the live set when it
/// disconnects or errors. Removal of an already-removed entry is a no-op.
async fn monitor_connection(
    id: ConnectionId,
    mut events: mpsc::Receiver<ConnectionEvent>,
    forward_tx: mpsc::Sender<ConnectionEvent>,
    connections: LiveSet,
) {
    while let Some(event) = events.recv().await {
        let terminal = matches!(
            event,
            ConnectionEvent::Disconnected | ConnectionEvent::Error(_)
        );
        if terminal {
            lock(&connections).remove(&id);
        }

        let last = matches!(event, ConnectionEvent::Disconnected);
        let _ = forward_tx.send(event).await;
        if last {
            return;
        }
    }

    // All event senders dropped without a terminal event; the connection
    // is gone either way, so the entry must not linger.
    lock(&connections).remove(&id);
}

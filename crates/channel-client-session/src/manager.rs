//! Connection lifecycle manager.
//!
//! Owns the single live transport session, wires its update stream into
//! the subscription registry, and tears the session down when idle.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use channel_client_core::{
    AuthKeys, ChannelId, MessageBatch, TransportConfig, TransportConnector, TransportError,
    TransportEvent, TransportSession, demux,
};
use channel_client_executor::{RequestError, RequestExecutor};
use futures::{StreamExt, stream::BoxStream};
use serde_json::Value;
use tokio::{sync::oneshot, task::JoinHandle};

use crate::registry::{BatchReceiver, RegistryError, SubscriptionRegistry};

/// Session error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Not connected")]
    NotConnected,
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection closed before it became ready")]
    ConnectionClosed,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Live session state.
struct LiveSession {
    id: u64,
    state: SessionState,
    transport: Arc<dyn TransportSession>,
    pump: JoinHandle<()>,
}

impl LiveSession {
    fn shut_down(self) {
        self.transport.close();
        self.pump.abort();
    }
}

type SharedLive = Arc<Mutex<Option<LiveSession>>>;

fn lock_live(live: &Mutex<Option<LiveSession>>) -> MutexGuard<'_, Option<LiveSession>> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Take the live session if it is still session `id`.
fn take_session(live: &Mutex<Option<LiveSession>>, id: u64) -> Option<LiveSession> {
    let mut guard = lock_live(live);
    if guard.as_ref().is_some_and(|live| live.id == id) {
        guard.take()
    } else {
        None
    }
}

/// Manages the connection to the remote service.
pub struct ConnectionManager<C>
where
    C: TransportConnector,
{
    connector: C,
    config: TransportConfig,
    executor: RequestExecutor,
    registry: Arc<SubscriptionRegistry>,
    live: SharedLive,
    opening: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

impl<C> ConnectionManager<C>
where
    C: TransportConnector,
{
    /// Create a new, disconnected manager.
    #[must_use]
    pub fn new(connector: C, config: TransportConfig, executor: RequestExecutor) -> Self {
        Self {
            connector,
            config,
            executor,
            registry: Arc::new(SubscriptionRegistry::new()),
            live: Arc::new(Mutex::new(None)),
            opening: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    fn live(&self) -> MutexGuard<'_, Option<LiveSession>> {
        lock_live(&self.live)
    }

    fn transport(&self) -> Option<Arc<dyn TransportSession>> {
        self.live().as_ref().map(|live| Arc::clone(&live.transport))
    }

    /// Connect, or refresh credentials of the live session.
    ///
    /// Resolves once the first socket reports ready. If a session already
    /// exists, `auth_keys` are imported into it and this returns immediately.
    ///
    /// The update pump drives the session out of `Connecting`, so dropping
    /// this future does not strand the session.
    ///
    /// # Errors
    /// Returns error if the transport cannot be opened or a socket reports an
    /// error before becoming ready.
    pub async fn connect(&self, auth_keys: Option<AuthKeys>) -> Result<(), SessionError> {
        let opening = self.opening.lock().await;

        if let Some(transport) = self.transport() {
            if let Some(keys) = &auth_keys {
                transport.import_auth_keys(keys);
            }
            return Ok(());
        }

        let handle = self.connector.open(&self.config, auth_keys).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (ready_tx, ready_rx) = oneshot::channel();

        // Install before the pump can observe its first event.
        {
            let mut live = self.live();
            let pump = tokio::spawn(pump_events(
                id,
                handle.events,
                Arc::clone(&self.live),
                Arc::clone(&self.registry),
                ready_tx,
            ));
            *live = Some(LiveSession {
                id,
                state: SessionState::Connecting,
                transport: handle.session,
                pump,
            });
        }
        drop(opening);

        match ready_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(SessionError::ConnectionFailed(message)),
            Err(_) => Err(SessionError::ConnectionClosed),
        }
    }

    /// Close every socket of the current session and release it.
    ///
    /// Safe to call repeatedly; does nothing without a session.
    pub fn disconnect(&self) {
        let live = self.live().take();
        if let Some(live) = live {
            tracing::info!(session = live.id, "Disconnecting");
            live.shut_down();
        }
    }

    /// Disconnect if no channel is subscribed.
    pub fn disconnect_if_idle(&self) {
        if self.registry.is_empty() {
            self.disconnect();
        }
    }

    /// Whether a session exists. The socket may not be open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.live().is_some()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.live()
            .as_ref()
            .map_or(SessionState::Disconnected, |live| live.state)
    }

    /// Import credentials into the live session.
    ///
    /// # Errors
    /// Returns error if there is no session.
    pub fn import_auth_keys(&self, keys: &AuthKeys) -> Result<(), SessionError> {
        self.transport()
            .ok_or(SessionError::NotConnected)?
            .import_auth_keys(keys);
        Ok(())
    }

    /// Export credentials of the live session.
    ///
    /// # Errors
    /// Returns error if there is no session.
    pub fn auth_keys(&self) -> Result<AuthKeys, SessionError> {
        Ok(self
            .transport()
            .ok_or(SessionError::NotConnected)?
            .auth_keys())
    }

    /// Issue a remote call through the retrying executor.
    ///
    /// # Errors
    /// Returns error if there is no session or the call fails terminally.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, SessionError> {
        let transport = self.transport().ok_or(SessionError::NotConnected)?;
        Ok(self
            .executor
            .execute(transport.as_ref(), method, &params)
            .await?)
    }

    /// Subscribe to a channel's message batches.
    ///
    /// # Errors
    /// Returns error if the channel already has a subscriber.
    pub fn subscribe_to_channel_messages(
        &self,
        channel_id: ChannelId,
    ) -> Result<BatchReceiver, SessionError> {
        Ok(self.registry.subscribe(channel_id)?)
    }

    /// Subscribe a callback to a channel's message batches.
    ///
    /// # Errors
    /// Returns error if the channel already has a subscriber.
    pub fn subscribe_with<F>(
        &self,
        channel_id: ChannelId,
        callback: F,
    ) -> Result<JoinHandle<()>, SessionError>
    where
        F: FnMut(MessageBatch) + Send + 'static,
    {
        Ok(self.registry.subscribe_with(channel_id, callback)?)
    }

    /// Unsubscribe from a channel, disconnecting when no subscriber remains.
    pub fn unsubscribe_from_channel_messages(&self, channel_id: ChannelId) {
        if !self.registry.unsubscribe(channel_id) {
            tracing::debug!(channel_id, "Unsubscribe for unknown channel");
        }
        self.disconnect_if_idle();
    }

    /// Subscription registry shared with the update pump.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}

impl<C> Drop for ConnectionManager<C>
where
    C: TransportConnector,
{
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Close session `id` from inside its own pump.
///
/// The pump is about to return, so its handle is dropped rather than aborted.
fn close_from_pump(live: &Mutex<Option<LiveSession>>, id: u64) {
    if let Some(session) = take_session(live, id) {
        session.transport.close();
    }
}

/// Drive one session's event stream.
///
/// Owns the session's state transitions: the first `Open` marks it
/// connected, an `Error` or end of stream before that releases it. Later
/// `Open`/`Error` events are only logged. Updates are demultiplexed and
/// dispatched; if that prunes the last subscriber, the session is released.
async fn pump_events(
    id: u64,
    mut events: BoxStream<'static, TransportEvent>,
    live: SharedLive,
    registry: Arc<SubscriptionRegistry>,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut ready = Some(ready);

    while let Some(event) = events.next().await {
        match event {
            TransportEvent::Open => match ready.take() {
                Some(tx) => {
                    if let Some(session) = lock_live(&live).as_mut().filter(|s| s.id == id) {
                        session.state = SessionState::Connected;
                    }
                    tracing::info!(session = id, "Connected");
                    let _ = tx.send(Ok(()));
                }
                None => tracing::debug!(session = id, "Socket reopened"),
            },
            TransportEvent::Error(message) => match ready.take() {
                Some(tx) => {
                    tracing::warn!(session = id, "Connection failed: {message}");
                    close_from_pump(&live, id);
                    let _ = tx.send(Err(message));
                    return;
                }
                None => tracing::warn!(session = id, "Socket error: {message}"),
            },
            TransportEvent::Updates(raw) => {
                let outcome = registry.dispatch(demux::demultiplex(&raw));
                tracing::trace!(
                    updates = raw.updates.len(),
                    delivered = outcome.delivered,
                    pruned = outcome.pruned,
                    "Dispatched updates"
                );
                if outcome.pruned > 0 && registry.is_empty() {
                    tracing::info!(session = id, "Last subscriber gone, disconnecting");
                    close_from_pump(&live, id);
                    return;
                }
            }
        }
    }

    tracing::debug!(session = id, "Update stream ended");
    if ready.is_some() {
        close_from_pump(&live, id);
    }
}

//! In-memory scripted transport (feature: loopback).
//!
//! Useful for development and tests. Calls are answered from per-method
//! response queues and recorded; updates are pushed by hand.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    AuthKeys, RawUpdates,
    traits::{TransportConfig, TransportConnector, TransportError, TransportEvent, TransportHandle, TransportSession},
};

/// Error returned for calls with no scripted response.
pub const NOT_SCRIPTED: &str = "LOOPBACK_NOT_SCRIPTED";

/// A call observed by the loopback session.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub params: Value,
    /// Datacenter the call was routed to.
    pub dc: u32,
}

#[derive(Default)]
struct State {
    responses: HashMap<String, VecDeque<Result<Value, TransportError>>>,
    calls: Vec<RecordedCall>,
    dc_switches: Vec<u32>,
    dc: u32,
    auth_keys: AuthKeys,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    close_count: usize,
}

/// Scripted in-memory transport session.
#[derive(Default)]
pub struct LoopbackSession {
    state: Mutex<State>,
}

impl LoopbackSession {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a response for the next call of `method`.
    pub fn respond(&self, method: &str, response: Result<Value, TransportError>) {
        self.state()
            .responses
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue a remote error for the next call of `method`.
    pub fn fail(&self, method: &str, message: &str) {
        self.respond(method, Err(TransportError::new(message)));
    }

    /// All calls issued so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    /// Datacenter ids passed to `set_default_dc`, in order.
    #[must_use]
    pub fn dc_switches(&self) -> Vec<u32> {
        self.state().dc_switches.clone()
    }

    /// Number of times the session was closed.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state().close_count
    }

    /// Push an event to the current event stream.
    ///
    /// Returns false if no stream is open.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.state()
            .events
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Push an `updates` event.
    pub fn push_updates(&self, updates: RawUpdates) -> bool {
        self.emit(TransportEvent::Updates(updates))
    }
}

#[async_trait]
impl TransportSession for LoopbackSession {
    async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let mut state = self.state();
        let dc = state.dc;
        state.calls.push(RecordedCall {
            method: method.to_string(),
            params,
            dc,
        });
        state
            .responses
            .get_mut(method)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(TransportError::new(NOT_SCRIPTED)))
    }

    fn import_auth_keys(&self, keys: &AuthKeys) {
        self.state().auth_keys = keys.clone();
    }

    fn auth_keys(&self) -> AuthKeys {
        self.state().auth_keys.clone()
    }

    fn set_default_dc(&self, dc: u32) {
        let mut state = self.state();
        state.dc = dc;
        state.dc_switches.push(dc);
    }

    fn close(&self) {
        let mut state = self.state();
        state.events = None;
        state.close_count += 1;
    }
}

/// How the next opened session reports readiness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Emit `Open` immediately.
    #[default]
    Ready,
    /// Emit `Error` before any `Open`.
    SocketError(String),
    /// Emit nothing; the caller drives readiness through [`LoopbackSession::emit`].
    Manual,
}

/// Connector handing out a shared [`LoopbackSession`].
#[derive(Clone, Default)]
pub struct LoopbackConnector {
    session: Arc<LoopbackSession>,
    behavior: Arc<Mutex<OpenBehavior>>,
    opened: Arc<Mutex<Vec<TransportConfig>>>,
}

impl LoopbackConnector {
    /// Create a connector whose sessions report ready immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The session returned by every `open`.
    #[must_use]
    pub fn session(&self) -> Arc<LoopbackSession> {
        Arc::clone(&self.session)
    }

    /// Set how subsequent opens behave.
    pub fn set_behavior(&self, behavior: OpenBehavior) {
        *self.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Number of sessions opened so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl TransportConnector for LoopbackConnector {
    async fn open(
        &self,
        config: &TransportConfig,
        auth_keys: Option<AuthKeys>,
    ) -> Result<TransportHandle, TransportError> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(config.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let behavior = self
            .behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match behavior {
            OpenBehavior::Ready => {
                let _ = tx.send(TransportEvent::Open);
            }
            OpenBehavior::SocketError(message) => {
                let _ = tx.send(TransportEvent::Error(message));
            }
            OpenBehavior::Manual => {}
        }

        {
            let mut state = self.session.state();
            state.events = Some(tx);
            if let Some(keys) = auth_keys {
                state.auth_keys = keys;
            }
        }

        tracing::debug!(api_id = config.api_id, test = config.test, "Loopback session opened");

        let session: Arc<dyn TransportSession> = self.session();
        Ok(TransportHandle {
            session,
            events: UnboundedReceiverStream::new(rx).boxed(),
        })
    }
}

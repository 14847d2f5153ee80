//! Transport session boundary.
//!
//! The socket, encryption and handshake layer lives behind these traits.
//! The client never reimplements it; it only calls through it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{AuthKeys, RawUpdates};

/// Application credentials handed to the transport when a session opens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Application id issued by the remote service.
    pub api_id: i64,
    /// Application hash issued by the remote service.
    pub api_hash: String,
    /// Connect to the test environment instead of production.
    #[serde(default)]
    pub test: bool,
}

/// Error reported by the transport for a remote call.
///
/// The textual message carries the remote error marker
/// (e.g. `PHONE_MIGRATE_2`, `FLOOD_WAIT_30`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub code: Option<i32>,
}

impl TransportError {
    /// Create an error with just a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create an error with a numeric code.
    #[must_use]
    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

/// Event emitted by a live transport session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A socket became ready.
    Open,
    /// A socket reported an error.
    Error(String),
    /// Server-pushed updates.
    Updates(RawUpdates),
}

/// Live transport session.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Issue a raw remote call.
    async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError>;

    /// Replace the session credentials.
    fn import_auth_keys(&self, keys: &AuthKeys);

    /// Export the session credentials.
    fn auth_keys(&self) -> AuthKeys;

    /// Route subsequent calls to another datacenter.
    fn set_default_dc(&self, dc: u32);

    /// Close every socket belonging to this session.
    fn close(&self);
}

/// A freshly opened session plus its event stream.
pub struct TransportHandle {
    pub session: Arc<dyn TransportSession>,
    pub events: BoxStream<'static, TransportEvent>,
}

/// Factory for transport sessions.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open exactly one new transport session.
    async fn open(
        &self,
        config: &TransportConfig,
        auth_keys: Option<AuthKeys>,
    ) -> Result<TransportHandle, TransportError>;
}

//! Public client surface.

use channel_client_core::{AuthKeys, ChannelId, MessageBatch, TransportConnector};
use channel_client_executor::RequestExecutor;
use channel_client_session::{BatchReceiver, ConnectionManager, SessionError, SessionState};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::ClientConfig;

/// Client error.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(
        "There is no account associated with {mobile}. \
         Please download the mobile app and sign up, then try again."
    )]
    SignUpRequired { mobile: String },
    #[error("Unexpected response to {method}: {source}")]
    UnexpectedResponse {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("No channel titled {0:?} in response")]
    ChannelNotFound(String),
    #[error("Response to {0} contained no chats")]
    NoChats(String),
    #[error("Invite link has no hash: {0}")]
    InvalidInviteLink(String),
}

/// Resilient client for one remote session.
pub struct ChannelClient<C>
where
    C: TransportConnector,
{
    manager: ConnectionManager<C>,
}

impl<C> ChannelClient<C>
where
    C: TransportConnector,
{
    /// Create a disconnected client.
    #[must_use]
    pub fn new(connector: C, config: ClientConfig) -> Self {
        let ClientConfig { transport, executor } = config;
        Self {
            manager: ConnectionManager::new(connector, transport, RequestExecutor::new(executor)),
        }
    }

    /// Connect, or import `auth_keys` into the live session.
    ///
    /// # Errors
    /// Returns error if a socket fails before becoming ready.
    pub async fn connect(&self, auth_keys: Option<AuthKeys>) -> Result<(), ClientError> {
        Ok(self.manager.connect(auth_keys).await?)
    }

    /// Tear down the current session.
    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    /// Tear down the current session if no channel is subscribed.
    pub fn disconnect_if_idle(&self) {
        self.manager.disconnect_if_idle();
    }

    /// Whether a session exists.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.manager.state()
    }

    /// Import credentials into the live session.
    ///
    /// # Errors
    /// Returns error if not connected.
    pub fn import_auth_keys(&self, keys: &AuthKeys) -> Result<(), ClientError> {
        Ok(self.manager.import_auth_keys(keys)?)
    }

    /// Export credentials of the live session.
    ///
    /// # Errors
    /// Returns error if not connected.
    pub fn get_auth_keys(&self) -> Result<AuthKeys, ClientError> {
        Ok(self.manager.auth_keys()?)
    }

    /// Receive message batches for `channel_id` on a queue.
    ///
    /// # Errors
    /// Returns error if the channel is already subscribed.
    pub fn subscribe_to_channel_messages(
        &self,
        channel_id: ChannelId,
    ) -> Result<BatchReceiver, ClientError> {
        Ok(self.manager.subscribe_to_channel_messages(channel_id)?)
    }

    /// Invoke `callback` with each message batch for `channel_id`.
    ///
    /// # Errors
    /// Returns error if the channel is already subscribed.
    pub fn on_channel_messages<F>(
        &self,
        channel_id: ChannelId,
        callback: F,
    ) -> Result<JoinHandle<()>, ClientError>
    where
        F: FnMut(MessageBatch) + Send + 'static,
    {
        Ok(self.manager.subscribe_with(channel_id, callback)?)
    }

    /// Stop receiving batches for `channel_id`; disconnects when none remain.
    pub fn unsubscribe_from_channel_messages(&self, channel_id: ChannelId) {
        self.manager.unsubscribe_from_channel_messages(channel_id);
    }

    /// Issue a raw remote call with retry handling.
    ///
    /// # Errors
    /// Returns error if not connected or the call fails terminally.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        Ok(self.manager.request(method, params).await?)
    }

    /// Issue a remote call and decode the response.
    pub(crate) async fn request_as<T>(&self, method: &str, params: Value) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let response = self.request(method, params).await?;
        serde_json::from_value(response).map_err(|source| ClientError::UnexpectedResponse {
            method: method.to_string(),
            source,
        })
    }
}

//! Resilient client for session-based channel messaging.
//!
//! Provides:
//! - `ChannelClient` - connection lifecycle, channel subscriptions and retrying requests
//! - Login, channel and message operations built on `ChannelClient::request`
//! - `ClientConfig` - serde-loadable configuration

pub mod client;
pub mod config;
pub mod operations;

pub use channel_client_core::{
    AuthKeys, ChannelId, Message, MessageBatch, MessageId, TransportConfig, TransportConnector,
    TransportError, TransportEvent, TransportHandle, TransportSession, User,
};
#[cfg(feature = "loopback")]
pub use channel_client_core::loopback;
pub use channel_client_executor::{ExecutorConfig, FloodPolicy, RequestError};
pub use channel_client_session::{BatchReceiver, SessionError, SessionState};
pub use client::{ChannelClient, ClientError};
pub use config::ClientConfig;
pub use operations::{
    ChannelHistory, ChannelRef, CompleteLogin, InviteHash, JoinedChannel, LoginCode, NewChannel,
    OutgoingMessage, StartLogin,
};

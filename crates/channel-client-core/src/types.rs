//! Wire model of the update stream and the derived message views.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Remote channel identifier.
pub type ChannelId = i64;

/// Remote message identifier.
pub type MessageId = i64;

/// Remote user identifier.
pub type UserId = i64;

/// Opaque credential blob produced by the transport handshake.
///
/// The client only moves it between the caller and the live transport
/// session. Callers persist it through [`AuthKeys::to_base64`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthKeys(Bytes);

impl AuthKeys {
    /// Wrap raw key material.
    #[must_use]
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self(raw.into())
    }

    /// Raw key material.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether no key material is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode for storage.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    /// Decode from storage.
    ///
    /// # Errors
    /// Returns error if the input is not valid base64.
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        BASE64.decode(encoded.trim()).map(Self::new)
    }
}

/// Raw `updates` event pushed by the transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawUpdates {
    #[serde(default)]
    pub updates: Vec<Update>,
    #[serde(default)]
    pub users: Vec<RawUser>,
}

/// A single pushed update.
///
/// Only new channel messages are modelled; edits, deletions and every other
/// update kind decode to [`Update::Other`] and are ignored downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "_")]
pub enum Update {
    #[serde(rename = "updateNewChannelMessage")]
    NewChannelMessage { message: RawMessage },
    #[serde(other)]
    Other,
}

/// Message as carried on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    /// Constructor name, e.g. `message` or `messageService`.
    #[serde(rename = "_", default)]
    pub kind: String,
    pub id: MessageId,
    #[serde(default)]
    pub date: i64,
    /// Message text. Service messages carry none.
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub from_id: Option<UserId>,
    #[serde(default)]
    pub to_id: Option<Peer>,
}

impl RawMessage {
    /// Channel the message was posted to, if any.
    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.to_id.as_ref().and_then(|peer| peer.channel_id)
    }

    /// Whether the message carries text.
    #[must_use]
    pub fn has_text(&self) -> bool {
        !self.message.is_empty()
    }
}

/// Destination peer of a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Peer {
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
}

/// User entry from the side table of an update or response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawUser {
    pub id: UserId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Author of a message, resolved per batch and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub first_name: Option<String>,
    pub phone: Option<String>,
}

impl From<&RawUser> for User {
    fn from(raw: &RawUser) -> Self {
        Self {
            first_name: raw.first_name.clone(),
            phone: raw.phone.clone(),
        }
    }
}

/// Normalized channel message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub date: i64,
    pub channel_id: ChannelId,
    pub text: String,
    pub user: Option<User>,
}

/// Messages for one channel derived from one raw update event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBatch {
    pub channel_id: ChannelId,
    pub messages: BTreeMap<MessageId, Message>,
}

impl MessageBatch {
    /// Create an empty batch for a channel.
    #[must_use]
    pub const fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            messages: BTreeMap::new(),
        }
    }

    /// Number of messages in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

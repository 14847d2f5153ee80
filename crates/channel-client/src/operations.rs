//! Login, channel and message operations built on [`ChannelClient::request`].

use std::collections::BTreeMap;

use channel_client_core::{
    ChannelId, Message, MessageId, RawMessage, RawUpdates, RawUser, TransportConnector, demux,
};
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{ChannelClient, ClientError};

const SIGN_UP_REQUIRED: &str = "auth.authorizationSignUpRequired";
const INVITE_PREFIX: &str = "joinchat/";

/// Input of [`ChannelClient::start_login`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartLogin {
    pub mobile: String,
}

/// Result of [`ChannelClient::start_login`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginCode {
    pub phone_code_hash: String,
}

/// Input of [`ChannelClient::complete_login`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteLogin {
    pub mobile: String,
    pub phone_code: String,
    pub phone_code_hash: String,
}

/// A channel the account can address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRef {
    pub channel_id: ChannelId,
    pub access_hash: String,
}

/// Input of [`ChannelClient::load_messages_from_channel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelHistory {
    pub channel_id: ChannelId,
    pub access_hash: String,
    /// Load messages older than this id; 0 starts from the newest.
    #[serde(default)]
    pub earliest_message_id: MessageId,
    pub limit: u32,
}

/// Input of [`ChannelClient::send_message_to_channel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub message: String,
    pub channel_id: ChannelId,
    pub access_hash: String,
}

/// Input of [`ChannelClient::create_channel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChannel {
    pub title: String,
    #[serde(default)]
    pub about: String,
}

/// Invite hash of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteHash {
    pub invite_hash: String,
}

/// Result of [`ChannelClient::join_channel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedChannel {
    pub access_hash: String,
}

#[derive(Deserialize)]
struct SentCode {
    phone_code_hash: String,
}

#[derive(Deserialize)]
struct Authorization {
    #[serde(rename = "_", default)]
    kind: String,
}

#[derive(Deserialize)]
struct History {
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    users: Vec<RawUser>,
}

#[derive(Deserialize)]
struct Chats {
    #[serde(default)]
    chats: Vec<Chat>,
}

#[derive(Deserialize)]
struct Chat {
    id: ChannelId,
    #[serde(default)]
    title: String,
    #[serde(default, deserialize_with = "string_or_number")]
    access_hash: String,
}

#[derive(Deserialize)]
struct ExportedInvite {
    link: String,
}

/// Access hashes are 64-bit and arrive either as numbers or strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(D::Error::custom(format!("invalid access hash: {other}"))),
    }
}

fn input_peer_channel(channel_id: ChannelId, access_hash: &str) -> Value {
    json!({
        "_": "inputPeerChannel",
        "channel_id": channel_id,
        "access_hash": access_hash,
    })
}

fn input_channel(channel: &ChannelRef) -> Value {
    json!({
        "_": "inputChannel",
        "channel_id": channel.channel_id,
        "access_hash": channel.access_hash,
    })
}

/// Non-negative 63-bit random id for outgoing messages.
fn random_id() -> i64 {
    let (high, _) = Uuid::new_v4().as_u64_pair();
    i64::try_from(high >> 1).unwrap_or_default()
}

/// Extract the invite hash from an exported invite link.
fn parse_invite_hash(link: &str) -> Option<&str> {
    link.split_once(INVITE_PREFIX)
        .map(|(_, hash)| hash)
        .filter(|hash| !hash.is_empty())
}

impl<C> ChannelClient<C>
where
    C: TransportConnector,
{
    /// Check whether the session is authorized.
    ///
    /// # Errors
    /// Returns the remote error if the session is not logged in.
    pub async fn check_if_logged_in(&self) -> Result<Value, ClientError> {
        self.request("account.getAccountTTL", json!({})).await
    }

    /// Send a login code to `mobile`.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn start_login(&self, input: StartLogin) -> Result<LoginCode, ClientError> {
        let sent: SentCode = self
            .request_as(
                "auth.sendCode",
                json!({
                    "phone_number": input.mobile,
                    "settings": { "_": "codeSettings" },
                }),
            )
            .await?;
        Ok(LoginCode {
            phone_code_hash: sent.phone_code_hash,
        })
    }

    /// Sign in with the code received by [`start_login`](Self::start_login).
    ///
    /// # Errors
    /// Returns [`ClientError::SignUpRequired`] if no account exists for the number.
    pub async fn complete_login(&self, input: CompleteLogin) -> Result<(), ClientError> {
        let authorization: Authorization = self
            .request_as(
                "auth.signIn",
                json!({
                    "phone_code": input.phone_code,
                    "phone_number": input.mobile,
                    "phone_code_hash": input.phone_code_hash,
                }),
            )
            .await?;

        if authorization.kind == SIGN_UP_REQUIRED {
            return Err(ClientError::SignUpRequired {
                mobile: input.mobile,
            });
        }
        tracing::info!("Logged in");
        Ok(())
    }

    /// Load text messages older than `earliest_message_id`.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn load_messages_from_channel(
        &self,
        input: ChannelHistory,
    ) -> Result<BTreeMap<MessageId, Message>, ClientError> {
        let history: History = self
            .request_as(
                "messages.getHistory",
                json!({
                    "peer": input_peer_channel(input.channel_id, &input.access_hash),
                    "offset_id": input.earliest_message_id,
                    "limit": input.limit,
                }),
            )
            .await?;

        let messages = history
            .messages
            .iter()
            .filter(|message| message.kind == "message" && message.has_text());
        Ok(demux::attach_users(&history.users, messages))
    }

    /// Post a message and return it as echoed by the remote.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn send_message_to_channel(
        &self,
        input: OutgoingMessage,
    ) -> Result<BTreeMap<MessageId, Message>, ClientError> {
        let updates: RawUpdates = self
            .request_as(
                "messages.sendMessage",
                json!({
                    "peer": input_peer_channel(input.channel_id, &input.access_hash),
                    "message": input.message,
                    "random_id": random_id(),
                }),
            )
            .await?;
        Ok(demux::form_messages(&updates, Some(input.channel_id)))
    }

    /// Create a broadcast channel.
    ///
    /// # Errors
    /// Returns error if the request fails or the created channel is missing
    /// from the response.
    pub async fn create_channel(&self, input: NewChannel) -> Result<ChannelRef, ClientError> {
        let Chats { chats } = self
            .request_as::<Chats>(
                "channels.createChannel",
                json!({
                    "flags": 2,
                    "title": input.title,
                    "about": input.about,
                }),
            )
            .await?;

        let chat = chats
            .into_iter()
            .find(|chat| chat.title == input.title)
            .ok_or(ClientError::ChannelNotFound(input.title))?;
        tracing::info!(channel_id = chat.id, "Channel created");
        Ok(ChannelRef {
            channel_id: chat.id,
            access_hash: chat.access_hash,
        })
    }

    /// Delete a channel owned by the account.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn delete_channel(&self, channel: &ChannelRef) -> Result<(), ClientError> {
        self.request(
            "channels.deleteChannel",
            json!({ "channel": input_channel(channel) }),
        )
        .await?;
        Ok(())
    }

    /// Export an invite hash for a channel.
    ///
    /// # Errors
    /// Returns error if the request fails or the link carries no hash.
    pub async fn get_channel_invite_hash(
        &self,
        channel: &ChannelRef,
    ) -> Result<InviteHash, ClientError> {
        let invite: ExportedInvite = self
            .request_as(
                "messages.exportChatInvite",
                json!({ "peer": input_peer_channel(channel.channel_id, &channel.access_hash) }),
            )
            .await?;

        let invite_hash = parse_invite_hash(&invite.link)
            .ok_or_else(|| ClientError::InvalidInviteLink(invite.link.clone()))?;
        Ok(InviteHash {
            invite_hash: invite_hash.to_string(),
        })
    }

    /// Join a channel by invite hash.
    ///
    /// # Errors
    /// Returns error if the request fails or no chat is returned.
    pub async fn join_channel(&self, invite: &InviteHash) -> Result<JoinedChannel, ClientError> {
        const METHOD: &str = "messages.importChatInvite";
        let Chats { chats } = self
            .request_as::<Chats>(METHOD, json!({ "hash": invite.invite_hash }))
            .await?;

        let chat = chats
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NoChats(METHOD.to_string()))?;
        Ok(JoinedChannel {
            access_hash: chat.access_hash,
        })
    }

    /// Leave a channel.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn leave_channel(&self, channel: &ChannelRef) -> Result<(), ClientError> {
        self.request(
            "channels.leaveChannel",
            json!({ "channel": input_channel(channel) }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use channel_client_core::loopback::{LoopbackConnector, LoopbackSession};
    use channel_client_executor::ExecutorConfig;

    use super::*;
    use crate::ClientConfig;

    async fn connected() -> (ChannelClient<LoopbackConnector>, Arc<LoopbackSession>) {
        let connector = LoopbackConnector::new();
        let session = connector.session();
        let config = ClientConfig::new(1, "hash")
            .with_executor(ExecutorConfig::default().with_request_spacing(Duration::ZERO));
        let client = ChannelClient::new(connector, config);
        client.connect(None).await.unwrap();
        (client, session)
    }

    fn channel() -> ChannelRef {
        ChannelRef {
            channel_id: 10,
            access_hash: "777".into(),
        }
    }

    #[tokio::test]
    async fn test_start_login() {
        let (client, session) = connected().await;
        session.respond(
            "auth.sendCode",
            Ok(json!({ "_": "auth.sentCode", "phone_code_hash": "h4sh" })),
        );

        let code = client
            .start_login(StartLogin {
                mobile: "+15550000".into(),
            })
            .await
            .unwrap();

        assert_eq!(code.phone_code_hash, "h4sh");
        let calls = session.calls();
        let call = &calls[0];
        assert_eq!(call.params["phone_number"], "+15550000");
        assert_eq!(call.params["settings"]["_"], "codeSettings");
    }

    #[tokio::test]
    async fn test_complete_login_requires_existing_account() {
        let (client, session) = connected().await;
        session.respond("auth.signIn", Ok(json!({ "_": SIGN_UP_REQUIRED })));
        session.respond("auth.signIn", Ok(json!({ "_": "auth.authorization" })));
        let input = CompleteLogin {
            mobile: "+15550000".into(),
            phone_code: "12345".into(),
            phone_code_hash: "h4sh".into(),
        };

        let err = client.complete_login(input.clone()).await.unwrap_err();
        assert!(matches!(err, ClientError::SignUpRequired { .. }));
        assert!(err.to_string().contains("+15550000"));

        client.complete_login(input).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_messages_keeps_text_messages() {
        let (client, session) = connected().await;
        session.respond(
            "messages.getHistory",
            Ok(json!({
                "_": "messages.channelMessages",
                "messages": [
                    { "_": "message", "id": 3, "date": 30, "message": "third", "from_id": 5,
                      "to_id": { "_": "peerChannel", "channel_id": 10 } },
                    { "_": "messageService", "id": 2, "date": 20,
                      "to_id": { "_": "peerChannel", "channel_id": 10 } },
                    { "_": "message", "id": 1, "date": 10, "message": "",
                      "to_id": { "_": "peerChannel", "channel_id": 10 } }
                ],
                "users": [{ "_": "user", "id": 5, "first_name": "Ada", "phone": "123" }]
            })),
        );

        let messages = client
            .load_messages_from_channel(ChannelHistory {
                channel_id: 10,
                access_hash: "777".into(),
                earliest_message_id: 4,
                limit: 50,
            })
            .await
            .unwrap();

        assert_eq!(messages.keys().copied().collect::<Vec<_>>(), vec![3]);
        assert_eq!(messages[&3].text, "third");
        assert_eq!(
            messages[&3].user.as_ref().and_then(|u| u.phone.as_deref()),
            Some("123")
        );
        let calls = session.calls();
        let params = &calls[0].params;
        assert_eq!(params["peer"]["_"], "inputPeerChannel");
        assert_eq!(params["offset_id"], 4);
    }

    #[tokio::test]
    async fn test_send_message_returns_echo_for_channel() {
        let (client, session) = connected().await;
        session.respond(
            "messages.sendMessage",
            Ok(json!({
                "_": "updates",
                "updates": [
                    { "_": "updateMessageID", "id": 9 },
                    { "_": "updateNewChannelMessage", "message": {
                        "_": "message", "id": 9, "date": 1, "message": "hello",
                        "to_id": { "channel_id": 10 } } },
                    { "_": "updateNewChannelMessage", "message": {
                        "_": "message", "id": 4, "date": 1, "message": "elsewhere",
                        "to_id": { "channel_id": 11 } } }
                ],
                "users": []
            })),
        );

        let sent = client
            .send_message_to_channel(OutgoingMessage {
                message: "hello".into(),
                channel_id: 10,
                access_hash: "777".into(),
            })
            .await
            .unwrap();

        assert_eq!(sent.keys().copied().collect::<Vec<_>>(), vec![9]);
        let calls = session.calls();
        let params = &calls[0].params;
        assert_eq!(params["message"], "hello");
        assert!(params["random_id"].as_i64().is_some_and(|id| id >= 0));
    }

    #[tokio::test]
    async fn test_create_channel_picks_matching_title() {
        let (client, session) = connected().await;
        session.respond(
            "channels.createChannel",
            Ok(json!({
                "chats": [
                    { "_": "channel", "id": 1, "title": "other", "access_hash": "1" },
                    { "_": "channel", "id": 2, "title": "room", "access_hash": 9_007_199_254_740_993_u64 }
                ]
            })),
        );
        session.respond("channels.createChannel", Ok(json!({ "chats": [] })));

        let created = client
            .create_channel(NewChannel {
                title: "room".into(),
                about: "test".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            created,
            ChannelRef {
                channel_id: 2,
                access_hash: "9007199254740993".into(),
            }
        );
        assert_eq!(session.calls()[0].params["flags"], 2);

        let err = client
            .create_channel(NewChannel {
                title: "room".into(),
                about: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ChannelNotFound(ref t) if t == "room"));
    }

    #[tokio::test]
    async fn test_invite_hash_and_join() {
        let (client, session) = connected().await;
        session.respond(
            "messages.exportChatInvite",
            Ok(json!({ "_": "chatInviteExported", "link": "https://t.me/joinchat/AbC-123" })),
        );
        session.respond(
            "messages.exportChatInvite",
            Ok(json!({ "link": "https://t.me/+AbC" })),
        );
        session.respond(
            "messages.importChatInvite",
            Ok(json!({ "chats": [{ "id": 10, "title": "room", "access_hash": "555" }] })),
        );

        let invite = client.get_channel_invite_hash(&channel()).await.unwrap();
        assert_eq!(invite.invite_hash, "AbC-123");

        let err = client.get_channel_invite_hash(&channel()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidInviteLink(_)));

        let joined = client.join_channel(&invite).await.unwrap();
        assert_eq!(joined.access_hash, "555");
    }

    #[tokio::test]
    async fn test_channel_membership_calls() {
        let (client, session) = connected().await;
        session.respond("channels.leaveChannel", Ok(json!({ "_": "updates" })));
        session.respond("channels.deleteChannel", Ok(json!({ "_": "updates" })));

        client.leave_channel(&channel()).await.unwrap();
        client.delete_channel(&channel()).await.unwrap();

        let calls = session.calls();
        assert_eq!(calls[0].method, "channels.leaveChannel");
        assert_eq!(calls[1].method, "channels.deleteChannel");
        assert_eq!(calls[1].params["channel"]["_"], "inputChannel");
        assert_eq!(calls[1].params["channel"]["access_hash"], "777");
    }

    #[tokio::test]
    async fn test_remote_errors_surface_verbatim() {
        let (client, session) = connected().await;
        session.fail("account.getAccountTTL", "AUTH_KEY_UNREGISTERED");

        let err = client.check_if_logged_in().await.unwrap_err();
        assert_eq!(err.to_string(), "AUTH_KEY_UNREGISTERED");
    }

    #[tokio::test]
    async fn test_unexpected_response_shape() {
        let (client, session) = connected().await;
        session.respond("auth.sendCode", Ok(json!({ "_": "auth.sentCode" })));

        let err = client
            .start_login(StartLogin {
                mobile: "+1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnexpectedResponse { ref method, .. } if method == "auth.sendCode"
        ));
    }

    #[test]
    fn test_parse_invite_hash() {
        assert_eq!(parse_invite_hash("https://t.me/joinchat/xyz"), Some("xyz"));
        assert_eq!(parse_invite_hash("https://t.me/joinchat/"), None);
        assert_eq!(parse_invite_hash("https://t.me/+xyz"), None);
    }
}

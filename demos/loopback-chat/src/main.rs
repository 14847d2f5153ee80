//! Loopback chat demo.
//!
//! Run with: cargo run -p loopback-chat-demo
//!
//! Drives the client against the in-memory loopback transport: connects,
//! survives a datacenter migration, subscribes to a channel, receives a
//! pushed message, and disconnects once the last subscription is dropped.

use anyhow::Context as _;
use channel_client::{
    ChannelClient, ClientConfig, OutgoingMessage, StartLogin,
    loopback::LoopbackConnector,
};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CHANNEL_ID: i64 = 1_001;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let connector = LoopbackConnector::new();
    let remote = connector.session();
    remote.fail("auth.sendCode", "PHONE_MIGRATE_2");
    remote.respond("auth.sendCode", Ok(json!({ "phone_code_hash": "demo-hash" })));
    remote.respond(
        "messages.sendMessage",
        Ok(json!({
            "updates": [{
                "_": "updateNewChannelMessage",
                "message": {
                    "_": "message", "id": 2, "date": 0, "message": "pong",
                    "to_id": { "_": "peerChannel", "channel_id": CHANNEL_ID }
                }
            }],
            "users": []
        })),
    );

    let client = ChannelClient::new(connector, ClientConfig::new(1, "demo"));
    client.connect(None).await.context("connect")?;

    let code = client
        .start_login(StartLogin {
            mobile: "+10000000000".into(),
        })
        .await?;
    tracing::info!(hash = %code.phone_code_hash, dc = ?remote.dc_switches(), "Login code sent");

    let mut batches = client.subscribe_to_channel_messages(CHANNEL_ID)?;
    remote.push_updates(serde_json::from_value(json!({
        "updates": [{
            "_": "updateNewChannelMessage",
            "message": {
                "_": "message", "id": 1, "date": 0, "message": "ping", "from_id": 7,
                "to_id": { "_": "peerChannel", "channel_id": CHANNEL_ID }
            }
        }],
        "users": [{ "id": 7, "first_name": "Remote" }]
    }))?);

    let batch = batches.recv().await.context("update stream closed")?;
    for message in batch.messages.values() {
        let author = message
            .user
            .as_ref()
            .and_then(|user| user.first_name.as_deref())
            .unwrap_or("unknown");
        tracing::info!(channel = batch.channel_id, "{author}: {}", message.text);
    }

    let sent = client
        .send_message_to_channel(OutgoingMessage {
            message: "pong".into(),
            channel_id: CHANNEL_ID,
            access_hash: "0".into(),
        })
        .await?;
    tracing::info!(count = sent.len(), "Message sent");

    client.unsubscribe_from_channel_messages(CHANNEL_ID);
    tracing::info!(connected = client.is_connected(), "Unsubscribed");
    Ok(())
}

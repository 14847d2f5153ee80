//! Normalization of raw updates into per-channel message batches.
//!
//! Everything here is pure. The same functions shape the push stream and
//! the results of directly issued history/send requests.

use std::collections::{BTreeMap, HashMap};

use crate::{
    ChannelId, Message, MessageBatch, MessageId, RawMessage, RawUpdates, RawUser, Update, User,
    UserId,
};

/// New-channel-message updates with text, optionally restricted to one channel.
///
/// Edits and deletions are not handled and are dropped here.
#[must_use]
pub fn extract_channel_messages(
    updates: &[Update],
    channel_filter: Option<ChannelId>,
) -> Vec<&RawMessage> {
    updates
        .iter()
        .filter_map(|update| match update {
            Update::NewChannelMessage { message } if message.has_text() => Some(message),
            _ => None,
        })
        .filter(|message| {
            channel_filter.is_none_or(|channel| message.channel_id() == Some(channel))
        })
        .collect()
}

/// Resolve authors and materialize messages keyed by id.
///
/// The user lookup is rebuilt on every call. Messages without a channel
/// id cannot be grouped and are skipped.
#[must_use]
pub fn attach_users<'a, I>(users: &[RawUser], messages: I) -> BTreeMap<MessageId, Message>
where
    I: IntoIterator<Item = &'a RawMessage>,
{
    let users_by_id: HashMap<UserId, User> =
        users.iter().map(|user| (user.id, User::from(user))).collect();

    messages
        .into_iter()
        .filter_map(|raw| {
            let Some(channel_id) = raw.channel_id() else {
                tracing::debug!(message_id = raw.id, "Skipping message without channel id");
                return None;
            };
            let user = raw.from_id.and_then(|id| users_by_id.get(&id).cloned());
            Some((
                raw.id,
                Message {
                    id: raw.id,
                    date: raw.date,
                    channel_id,
                    text: raw.message.clone(),
                    user,
                },
            ))
        })
        .collect()
}

/// Extract and materialize the messages of one update event.
#[must_use]
pub fn form_messages(
    raw: &RawUpdates,
    channel_filter: Option<ChannelId>,
) -> BTreeMap<MessageId, Message> {
    attach_users(&raw.users, extract_channel_messages(&raw.updates, channel_filter))
}

/// Group messages into one batch per channel.
#[must_use]
pub fn group_by_channel<I>(messages: I) -> BTreeMap<ChannelId, MessageBatch>
where
    I: IntoIterator<Item = Message>,
{
    let mut batches: BTreeMap<ChannelId, MessageBatch> = BTreeMap::new();
    for message in messages {
        batches
            .entry(message.channel_id)
            .or_insert_with(|| MessageBatch::new(message.channel_id))
            .messages
            .insert(message.id, message);
    }
    batches
}

/// Full push-stream pipeline for one raw event.
#[must_use]
pub fn demultiplex(raw: &RawUpdates) -> BTreeMap<ChannelId, MessageBatch> {
    group_by_channel(form_messages(raw, None).into_values())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(value: serde_json::Value) -> RawUpdates {
        serde_json::from_value(value).unwrap()
    }

    fn new_message(id: i64, channel: i64, from: i64, text: &str) -> serde_json::Value {
        json!({
            "_": "updateNewChannelMessage",
            "message": {
                "_": "message", "id": id, "date": 1_600_000_000 + id,
                "message": text, "from_id": from,
                "to_id": { "_": "peerChannel", "channel_id": channel }
            }
        })
    }

    #[test]
    fn test_batches_only_hold_their_own_channel() {
        let event = raw(json!({
            "updates": [
                new_message(1, 10, 5, "a"),
                new_message(2, 20, 5, "b"),
                new_message(3, 10, 6, "c"),
            ],
            "users": [{ "id": 5, "first_name": "Ada", "phone": "123" }]
        }));

        let batches = demultiplex(&event);
        assert_eq!(batches.len(), 2);
        for (channel, batch) in &batches {
            assert_eq!(batch.channel_id, *channel);
            assert!(batch.messages.values().all(|m| m.channel_id == *channel));
        }
        assert_eq!(batches[&10].len(), 2);
        assert_eq!(batches[&20].len(), 1);
    }

    #[test]
    fn test_messages_without_text_are_dropped() {
        let event = raw(json!({
            "updates": [
                new_message(1, 10, 5, ""),
                {
                    "_": "updateNewChannelMessage",
                    "message": { "_": "messageService", "id": 2, "to_id": { "channel_id": 10 } }
                },
                new_message(3, 10, 5, "kept"),
            ],
            "users": []
        }));

        let batches = demultiplex(&event);
        let ids: Vec<_> = batches[&10].messages.keys().copied().collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_unrelated_updates_are_ignored() {
        let event = raw(json!({
            "updates": [
                new_message(1, 10, 5, "hi"),
                { "_": "updateDeleteChannelMessages", "channel_id": 20, "messages": [4] },
            ],
            "users": []
        }));

        let batches = demultiplex(&event);
        assert_eq!(batches.keys().copied().collect::<Vec<_>>(), vec![10]);
        assert_eq!(batches[&10].messages[&1].text, "hi");
    }

    #[test]
    fn test_channel_filter() {
        let event = raw(json!({
            "updates": [new_message(1, 10, 5, "a"), new_message(2, 20, 5, "b")],
            "users": []
        }));

        let only_20 = form_messages(&event, Some(20));
        assert_eq!(only_20.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(form_messages(&event, None).len(), 2);
    }

    #[test]
    fn test_user_resolution() {
        let event = raw(json!({
            "updates": [new_message(1, 10, 5, "known"), new_message(2, 10, 99, "unknown")],
            "users": [{ "id": 5, "first_name": "Ada", "phone": "123" }]
        }));

        let messages = form_messages(&event, None);
        assert_eq!(
            messages[&1].user,
            Some(User {
                first_name: Some("Ada".into()),
                phone: Some("123".into()),
            })
        );
        assert_eq!(messages[&2].user, None);
    }

    #[test]
    fn test_message_without_channel_is_skipped() {
        let message = RawMessage {
            kind: "message".into(),
            id: 1,
            message: "orphan".into(),
            ..RawMessage::default()
        };
        assert!(attach_users(&[], [&message]).is_empty());
    }
}

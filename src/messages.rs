// src/messages.rs

use std::collections::HashMap;

use futures_util::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, DateTime};
use serde::Serialize;

use crate::db::MongoDB;
use crate::errors::ChatError;
use crate::models::{parse_object_id, ChatRoom, Message, MessageType, User};

/// Persists a message and moves the room's `lastMessage` pointer.
///
/// Content is not validated here; an empty body is a legal system or
/// attachment message and the client surface decides what to allow.
pub async fn append(
    db: &MongoDB,
    room_id: ObjectId,
    sender_id: &str,
    content: String,
    msg_type: MessageType,
    file_url: Option<String>,
) -> Result<Message, ChatError> {
    let sender = parse_object_id(sender_id, "user")?;
    let message = Message::new(room_id, sender, content, msg_type, file_url);

    db.db
        .collection::<Message>("messages")
        .insert_one(&message)
        .await?;
    db.db
        .collection::<ChatRoom>("chatrooms")
        .update_one(
            doc! { "_id": room_id },
            doc! { "$set": { "lastMessage": message.id, "updatedAt": message.created_at } },
        )
        .await?;

    Ok(message)
}

/// Records read receipts for a batch of messages.
///
/// The filter excludes documents the user already read, so replaying the
/// same batch matches nothing and writes nothing. An unconditional
/// `$addToSet` would not give that: `readAt` differs per call, making every
/// receipt "new".
pub async fn mark_read(
    db: &MongoDB,
    room_id: &str,
    user_id: &str,
    message_ids: &[String],
) -> Result<(), ChatError> {
    let rid = parse_object_id(room_id, "room")?;
    let uid = parse_object_id(user_id, "user")?;
    let ids = message_ids
        .iter()
        .map(|raw| parse_object_id(raw, "message"))
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Ok(());
    }

    db.db
        .collection::<Message>("messages")
        .update_many(
            mark_read_filter(ids, rid, uid),
            doc! {
                "$push": { "readBy": { "user": uid, "readAt": DateTime::now() } },
            },
        )
        .await?;

    Ok(())
}

/// Scopes the receipt write to the room and to messages the user has not
/// read yet. The latter clause carries the idempotency.
fn mark_read_filter(
    ids: Vec<ObjectId>,
    room_id: ObjectId,
    user_id: ObjectId,
) -> mongodb::bson::Document {
    doc! {
        "_id": { "$in": ids },
        "roomId": room_id,
        "readBy.user": { "$ne": user_id },
    }
}

/// Non-deleted messages of a room, oldest first. The `_id` tiebreak keeps
/// the order stable when two messages share a millisecond timestamp.
pub async fn room_history(db: &MongoDB, room_id: ObjectId) -> Result<Vec<Message>, ChatError> {
    let cursor = db
        .db
        .collection::<Message>("messages")
        .find(doc! { "roomId": room_id, "isDeleted": { "$ne": true } })
        .sort(doc! { "createdAt": 1, "_id": 1 })
        .await?;
    let messages = cursor.try_collect().await?;
    Ok(messages)
}

/// Sender block denormalized into outgoing messages so clients need no
/// second lookup to label the bubble.
#[derive(Debug, Clone, Serialize)]
pub struct SenderWire {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptWire {
    pub user: String,
    pub read_at: chrono::DateTime<chrono::Utc>,
}

/// Client-facing form of a stored message. Ids travel as plain hex strings,
/// `id` mirrors `_id`, and `sender` carries the bare sender id next to the
/// denormalized `senderId` block; mobile clients align bubbles off `sender`
/// and older web builds read `_id`/`senderId`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageWire {
    #[serde(rename = "_id")]
    pub object_id: String,
    pub id: String,
    pub room_id: String,
    /// `None` when the sender's user document no longer exists.
    pub sender_id: Option<SenderWire>,
    pub sender: String,
    pub content: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    pub read_by: Vec<ReadReceiptWire>,
    pub is_deleted: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl MessageWire {
    pub fn from_message(msg: &Message, sender: Option<&User>) -> Self {
        let hex = msg.id.to_hex();
        MessageWire {
            object_id: hex.clone(),
            id: hex,
            room_id: msg.room_id.to_hex(),
            sender_id: sender.map(|u| SenderWire {
                id: u.id.to_hex(),
                name: u.name.clone(),
                email: u.email.clone(),
            }),
            sender: msg.sender_id.to_hex(),
            content: msg.content.clone(),
            msg_type: msg.msg_type,
            file_url: msg.file_url.clone(),
            read_by: msg
                .read_by
                .iter()
                .map(|r| ReadReceiptWire {
                    user: r.user.to_hex(),
                    read_at: to_chrono(r.read_at),
                })
                .collect(),
            is_deleted: msg.is_deleted,
            created_at: to_chrono(msg.created_at),
            updated_at: to_chrono(msg.updated_at),
        }
    }
}

/// Resolves sender blocks for a batch of messages with a single `$in`
/// lookup and projects everything to wire form.
pub async fn hydrate_wire(
    db: &MongoDB,
    messages: &[Message],
) -> Result<Vec<MessageWire>, ChatError> {
    let mut sender_ids: Vec<ObjectId> = messages.iter().map(|m| m.sender_id).collect();
    sender_ids.sort();
    sender_ids.dedup();

    let senders: HashMap<ObjectId, User> = if sender_ids.is_empty() {
        HashMap::new()
    } else {
        db.db
            .collection::<User>("users")
            .find(doc! { "_id": { "$in": sender_ids } })
            .await?
            .try_collect::<Vec<User>>()
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect()
    };

    Ok(messages
        .iter()
        .map(|m| MessageWire::from_message(m, senders.get(&m.sender_id)))
        .collect())
}

fn to_chrono(ts: DateTime) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ts.timestamp_millis())
        .unwrap_or(chrono::DateTime::UNIX_EPOCH)
}

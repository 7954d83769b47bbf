use mongodb::bson::oid::ObjectId;
use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

use crate::errors::ChatError;

/// Parses a caller-supplied hex id, labelling the rejection with what the id
/// was supposed to identify ("project", "user", "room", "message").
pub fn parse_object_id(raw: &str, what: &'static str) -> Result<ObjectId, ChatError> {
    raw.parse().map_err(|_| ChatError::MalformedId(what))
}

/// Global role of a user. Unknown role strings collapse to `User`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Client,
    Engineer,
    #[default]
    User,
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "manager" => Role::Manager,
            "client" => Role::Client,
            "engineer" => Role::Engineer,
            _ => Role::User,
        }
    }
}

/// Message payload kind. `Text` unless the client says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

/// Rooms are currently always project rooms; the discriminator is stored so
/// other room kinds can be added without migrating existing documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    #[default]
    Project,
}

/// The chat room bound to one project.
///
/// `projectId` carries a unique index (see `db::ensure_indexes`), which is
/// what makes concurrent first-join creation converge on a single document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    /// MongoDB document ID.
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "type", default)]
    pub room_type: RoomType,
    pub project_id: ObjectId,
    #[serde(default)]
    pub members: Vec<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<ObjectId>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl ChatRoom {
    pub fn new(project_id: ObjectId, members: Vec<ObjectId>) -> Self {
        let now = DateTime::now();
        ChatRoom {
            id: ObjectId::new(),
            room_type: RoomType::Project,
            project_id,
            members,
            last_message: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One read acknowledgment inside `Message::read_by`. Grows monotonically,
/// at most one entry per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user: ObjectId,
    pub read_at: DateTime,
}

/// A message in a room's append-only log. Ordering key is
/// `(createdAt, _id)` ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// MongoDB document ID.
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub room_id: ObjectId,
    pub sender_id: ObjectId,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Message {
    pub fn new(
        room_id: ObjectId,
        sender_id: ObjectId,
        content: String,
        msg_type: MessageType,
        file_url: Option<String>,
    ) -> Self {
        let now = DateTime::now();
        Message {
            id: ObjectId::new(),
            room_id,
            sender_id,
            content,
            msg_type,
            file_url,
            read_by: Vec::new(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The subset of a project document this service reads for chat
/// authorization. Projects are owned by the main application tier; unknown
/// fields in stored documents are ignored on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// MongoDB document ID.
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_code: Option<String>,
    pub manager: ObjectId,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub engineers: Vec<ObjectId>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A user as stored by the main application tier; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// MongoDB document ID.
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    #[default]
    Android,
    Web,
}

/// A device push registration. This service only reads tokens and flips
/// `isActive` off when the provider reports the device as gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushToken {
    /// MongoDB document ID.
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub token: String,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_id() {
        assert!(parse_object_id("507f191e810c19729de860ea", "project").is_ok());
        let err = parse_object_id("zzz", "project").unwrap_err();
        assert_eq!(err.to_string(), "Invalid project ID format");
    }

    #[test]
    fn test_role_from_str_is_lenient() {
        assert_eq!(Role::from("admin"), Role::Admin);
        assert_eq!(Role::from("Client"), Role::Client);
        assert_eq!(Role::from("superuser"), Role::User);
        assert_eq!(Role::from(""), Role::User);
    }

    #[test]
    fn test_room_document_field_names() {
        let room = ChatRoom::new(ObjectId::new(), vec![ObjectId::new()]);
        let value = serde_json::to_value(&room).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("_id"));
        assert!(obj.contains_key("projectId"));
        assert!(obj.contains_key("members"));
        assert!(obj.contains_key("isActive"));
        assert_eq!(value["type"], "project");
        // No message yet, so the pointer must be absent rather than null.
        assert!(!obj.contains_key("lastMessage"));
    }

    #[test]
    fn test_message_defaults_round_trip() {
        // Legacy documents may lack type/readBy/isDeleted entirely.
        let raw = serde_json::json!({
            "_id": ObjectId::new(),
            "roomId": ObjectId::new(),
            "senderId": ObjectId::new(),
            "content": "hello",
            "createdAt": DateTime::now(),
            "updatedAt": DateTime::now(),
        });
        let msg: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.msg_type, MessageType::Text);
        assert!(msg.read_by.is_empty());
        assert!(!msg.is_deleted);
        assert!(msg.file_url.is_none());
    }
}

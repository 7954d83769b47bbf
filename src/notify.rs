use actix::Addr;
use serde::Serialize;
use serde_json::json;

use crate::chat_server::{ChatServer, SendToUser, ServerEvent};
use crate::models::{ChatRoom, Message, MessageType};
use crate::push::{PushJob, PushQueue};

const PREVIEW_CHARS: usize = 100;

/// In-band `notification` payload delivered to each recipient's private
/// channel. Mirrors what the push body carries so foreground and background
/// clients render the same thing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub room_id: String,
    pub project_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub preview: String,
}

/// Notifies every room member except the sender about a new message: one
/// `notification` event to the member's private channel plus one queued push
/// job. Runs after the room broadcast; neither delivery can fail the send.
pub fn fan_out(
    server: &Addr<ChatServer>,
    push: &PushQueue,
    room: &ChatRoom,
    message: &Message,
    sender_name: &str,
) {
    let sender_hex = message.sender_id.to_hex();
    let preview = preview_of(&message.content, message.msg_type);

    let notification = ChatNotification {
        kind: "chat_message".to_string(),
        room_id: room.id.to_hex(),
        project_id: room.project_id.to_hex(),
        message_id: message.id.to_hex(),
        sender_id: sender_hex.clone(),
        sender_name: sender_name.to_string(),
        preview: preview.clone(),
    };
    let push_data = json!({
        "type": "chat_message",
        "projectId": notification.project_id,
        "roomId": notification.room_id,
    });
    let frame = ServerEvent::Notification(notification).to_frame();

    for member in &room.members {
        let member_hex = member.to_hex();
        if member_hex == sender_hex {
            continue;
        }
        server.do_send(SendToUser {
            user_id: member_hex,
            frame: frame.clone(),
        });
        push.enqueue(PushJob {
            user_id: *member,
            title: sender_name.to_string(),
            body: preview.clone(),
            data: push_data.clone(),
        });
    }
}

/// Bounded single-line rendering of a message body. Attachment messages
/// without text get a label instead of an empty line.
pub fn preview_of(content: &str, msg_type: MessageType) -> String {
    if content.is_empty() {
        return match msg_type {
            MessageType::Image => "Sent an image".to_string(),
            MessageType::File => "Sent a file".to_string(),
            _ => String::new(),
        };
    }

    let mut chars = content.chars();
    let mut preview: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        preview.push('…');
    }
    preview
}

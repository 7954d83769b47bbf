use actix::prelude::*;
use log::{debug, info};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::messages::MessageWire;
use crate::notify::ChatNotification;

/// A single pre-serialized text frame on its way to a connection.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct WsMessage(pub String);

/// Everything the server emits over a live connection, tagged with the wire
/// event name. Serialized once per broadcast, not once per recipient.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    RoomJoined { room_id: String, project_id: String },
    ReceiveMessage(MessageWire),
    #[serde(rename_all = "camelCase")]
    TypingStart { user_id: String, room_id: String },
    #[serde(rename_all = "camelCase")]
    TypingStop { user_id: String, room_id: String },
    #[serde(rename_all = "camelCase")]
    MessagesRead {
        user_id: String,
        room_id: String,
        message_ids: Vec<String>,
    },
    Notification(ChatNotification),
    Error { message: String },
}

impl ServerEvent {
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub user_id: String,
    pub addr: Recipient<WsMessage>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub user_id: String,
    pub addr: Recipient<WsMessage>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct JoinRoom {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SendToUser {
    pub user_id: String,
    pub frame: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct RoomBroadcast {
    pub room_id: String,
    pub frame: String,
    /// User id whose own connections are skipped. Typing relays and read
    /// receipts go to everyone but their origin.
    pub exclude: Option<String>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct BroadcastAll {
    pub frame: String,
}

/// Connection registry with two addressing schemes over one map pair:
/// `sessions` keys every live connection by user id (the user's private
/// channel; several devices may be online at once) and `rooms` keys member
/// user ids by room id. Room delivery resolves through `sessions`, so a
/// user who drops offline simply falls out of every room broadcast.
#[derive(Default)]
pub struct Broadcaster {
    sessions: HashMap<String, Vec<Recipient<WsMessage>>>,
    rooms: HashMap<String, HashSet<String>>,
}

impl Broadcaster {
    fn connect(&mut self, user_id: String, addr: Recipient<WsMessage>) {
        self.sessions.entry(user_id).or_default().push(addr);
    }

    fn disconnect(&mut self, user_id: &str, addr: &Recipient<WsMessage>) {
        if let Some(addrs) = self.sessions.get_mut(user_id) {
            // Remove only the connection that matches the provided address.
            addrs.retain(|a| a != addr);
            if addrs.is_empty() {
                self.sessions.remove(user_id);
                // Last connection gone, so the user leaves every room.
                for members in self.rooms.values_mut() {
                    members.remove(user_id);
                }
                self.rooms.retain(|_, members| !members.is_empty());
            }
        }
    }

    fn join_room(&mut self, room_id: String, user_id: String) {
        // Subscriptions only exist for connected users; a join that raced a
        // disconnect would otherwise leave a dangling room entry.
        if self.sessions.contains_key(&user_id) {
            self.rooms.entry(room_id).or_default().insert(user_id);
        }
    }

    fn send_to_user(&self, user_id: &str, frame: &str) {
        if let Some(addrs) = self.sessions.get(user_id) {
            // Send to all active connections for that user.
            for addr in addrs {
                addr.do_send(WsMessage(frame.to_string()));
            }
        }
    }

    fn room_broadcast(&self, room_id: &str, frame: &str, exclude: Option<&str>) {
        if let Some(members) = self.rooms.get(room_id) {
            for user_id in members {
                if exclude == Some(user_id.as_str()) {
                    continue;
                }
                self.send_to_user(user_id, frame);
            }
        }
    }

    fn broadcast_all(&self, frame: &str) {
        for addrs in self.sessions.values() {
            for addr in addrs {
                addr.do_send(WsMessage(frame.to_string()));
            }
        }
    }
}

/// The dispatcher. Owns the `Broadcaster` and nothing else; storage I/O
/// happens in the session actors, so every handler here is synchronous and
/// the mailbox drains at memory speed.
#[derive(Default)]
pub struct ChatServer {
    broadcaster: Broadcaster,
}

impl ChatServer {
    pub fn new() -> Self {
        ChatServer {
            broadcaster: Broadcaster::default(),
        }
    }
}

impl Actor for ChatServer {
    type Context = Context<Self>;
}

impl Handler<Connect> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        info!("User {} connected (WS)", msg.user_id);
        self.broadcaster.connect(msg.user_id, msg.addr);
    }
}

impl Handler<Disconnect> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        info!("User {} disconnected (WS)", msg.user_id);
        self.broadcaster.disconnect(&msg.user_id, &msg.addr);
    }
}

impl Handler<JoinRoom> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: JoinRoom, _: &mut Context<Self>) {
        debug!("User {} subscribed to room {}", msg.user_id, msg.room_id);
        self.broadcaster.join_room(msg.room_id, msg.user_id);
    }
}

impl Handler<SendToUser> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: SendToUser, _: &mut Context<Self>) {
        self.broadcaster.send_to_user(&msg.user_id, &msg.frame);
    }
}

impl Handler<RoomBroadcast> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: RoomBroadcast, _: &mut Context<Self>) {
        self.broadcaster
            .room_broadcast(&msg.room_id, &msg.frame, msg.exclude.as_deref());
    }
}

impl Handler<BroadcastAll> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: BroadcastAll, _: &mut Context<Self>) {
        self.broadcaster.broadcast_all(&msg.frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Stand-in for a live connection: records every frame it is handed.
    struct Recorder {
        frames: Arc<Mutex<Vec<String>>>,
    }

    impl Actor for Recorder {
        type Context = Context<Self>;
    }

    impl Handler<WsMessage> for Recorder {
        type Result = ();

        fn handle(&mut self, msg: WsMessage, _: &mut Context<Self>) {
            self.frames.lock().unwrap().push(msg.0);
        }
    }

    /// Awaiting this after a batch of do_sends proves the recorder's
    /// mailbox has drained past them.
    #[derive(Message)]
    #[rtype(result = "()")]
    struct Flush;

    impl Handler<Flush> for Recorder {
        type Result = ();

        fn handle(&mut self, _: Flush, _: &mut Context<Self>) {}
    }

    fn recorder() -> (Addr<Recorder>, Arc<Mutex<Vec<String>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let addr = Recorder {
            frames: frames.clone(),
        }
        .start();
        (addr, frames)
    }

    #[actix_web::test]
    async fn test_room_broadcast_excludes_origin() {
        let server = ChatServer::new().start();
        let (a, a_frames) = recorder();
        let (b, b_frames) = recorder();
        let (c, c_frames) = recorder();

        for (id, addr) in [("a", &a), ("b", &b), ("c", &c)] {
            server
                .send(Connect {
                    user_id: id.to_string(),
                    addr: addr.clone().recipient(),
                })
                .await
                .unwrap();
            server
                .send(JoinRoom {
                    room_id: "room1".to_string(),
                    user_id: id.to_string(),
                })
                .await
                .unwrap();
        }

        server
            .send(RoomBroadcast {
                room_id: "room1".to_string(),
                frame: "hello".to_string(),
                exclude: Some("a".to_string()),
            })
            .await
            .unwrap();

        for addr in [&a, &b, &c] {
            addr.send(Flush).await.unwrap();
        }
        assert!(a_frames.lock().unwrap().is_empty());
        assert_eq!(*b_frames.lock().unwrap(), vec!["hello".to_string()]);
        assert_eq!(*c_frames.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[actix_web::test]
    async fn test_private_channel_reaches_every_connection_of_user() {
        let server = ChatServer::new().start();
        let (phone, phone_frames) = recorder();
        let (laptop, laptop_frames) = recorder();

        for addr in [&phone, &laptop] {
            server
                .send(Connect {
                    user_id: "u1".to_string(),
                    addr: addr.clone().recipient(),
                })
                .await
                .unwrap();
        }

        server
            .send(SendToUser {
                user_id: "u1".to_string(),
                frame: "ping".to_string(),
            })
            .await
            .unwrap();

        phone.send(Flush).await.unwrap();
        laptop.send(Flush).await.unwrap();
        assert_eq!(*phone_frames.lock().unwrap(), vec!["ping".to_string()]);
        assert_eq!(*laptop_frames.lock().unwrap(), vec!["ping".to_string()]);
    }

    #[actix_web::test]
    async fn test_disconnect_drops_room_membership() {
        let server = ChatServer::new().start();
        let (a, a_frames) = recorder();

        server
            .send(Connect {
                user_id: "a".to_string(),
                addr: a.clone().recipient(),
            })
            .await
            .unwrap();
        server
            .send(JoinRoom {
                room_id: "room1".to_string(),
                user_id: "a".to_string(),
            })
            .await
            .unwrap();
        server
            .send(Disconnect {
                user_id: "a".to_string(),
                addr: a.clone().recipient(),
            })
            .await
            .unwrap();

        server
            .send(RoomBroadcast {
                room_id: "room1".to_string(),
                frame: "late".to_string(),
                exclude: None,
            })
            .await
            .unwrap();

        a.send(Flush).await.unwrap();
        assert!(a_frames.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_broadcast_all_reaches_every_session() {
        let server = ChatServer::new().start();
        let (a, a_frames) = recorder();
        let (b, b_frames) = recorder();

        for (id, addr) in [("a", &a), ("b", &b)] {
            server
                .send(Connect {
                    user_id: id.to_string(),
                    addr: addr.clone().recipient(),
                })
                .await
                .unwrap();
        }

        server
            .send(BroadcastAll {
                frame: "announce".to_string(),
            })
            .await
            .unwrap();

        a.send(Flush).await.unwrap();
        b.send(Flush).await.unwrap();
        assert_eq!(*a_frames.lock().unwrap(), vec!["announce".to_string()]);
        assert_eq!(*b_frames.lock().unwrap(), vec!["announce".to_string()]);
    }

    #[test]
    fn test_server_event_wire_names() {
        let frame = ServerEvent::RoomJoined {
            room_id: "r1".to_string(),
            project_id: "p1".to_string(),
        }
        .to_frame();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "room_joined");
        assert_eq!(value["data"]["roomId"], "r1");
        assert_eq!(value["data"]["projectId"], "p1");

        let frame = ServerEvent::MessagesRead {
            user_id: "u1".to_string(),
            room_id: "r1".to_string(),
            message_ids: vec!["m1".to_string()],
        }
        .to_frame();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "messages_read");
        assert_eq!(value["data"]["userId"], "u1");
        assert_eq!(value["data"]["messageIds"][0], "m1");

        let frame = ServerEvent::Error {
            message: "nope".to_string(),
        }
        .to_frame();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["message"], "nope");
    }
}

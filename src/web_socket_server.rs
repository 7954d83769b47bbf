use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::chat_server::{
    Connect, Disconnect, JoinRoom, RoomBroadcast, ServerEvent, WsMessage,
};
use crate::errors::ChatError;
use crate::identity::{authenticate, Identity};
use crate::messages;
use crate::models::MessageType;
use crate::notify;
use crate::rooms;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a client may send over the socket, tagged by wire event name.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinProjectChat { project_id: String },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        project_id: String,
        #[serde(default)]
        content: String,
        #[serde(rename = "type", default)]
        msg_type: MessageType,
        #[serde(default)]
        file_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TypingStart { room_id: String },
    #[serde(rename_all = "camelCase")]
    TypingStop { room_id: String },
    #[serde(rename_all = "camelCase")]
    MarkRead {
        room_id: String,
        #[serde(default)]
        message_ids: Vec<String>,
    },
}

#[derive(Deserialize)]
pub struct WsQuery {
    /// Handshake auth token, checked after the session cookie and before
    /// the Authorization header.
    token: Option<String>,
}

/// `GET /ws` upgrade endpoint. Identity is resolved before the upgrade, so
/// a bad token is refused with a 401 JSON body and no session ever starts.
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<WsQuery>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let identity = authenticate(&req, query.token.as_deref(), &data.config).map_err(|err| {
        warn!("WS upgrade refused: {}", err);
        err
    })?;

    ws::start(WsSession::new(identity, data.clone()), &req, stream)
}

pub struct WsSession {
    /// Correlates this connection's log lines; delivery keys on user id.
    session_id: Uuid,
    identity: Identity,
    hb: Instant,
    state: web::Data<AppState>,
}

impl WsSession {
    pub fn new(identity: Identity, state: web::Data<AppState>) -> Self {
        WsSession {
            session_id: Uuid::new_v4(),
            identity,
            hb: Instant::now(),
            state,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                info!("Session {} heartbeat failed, disconnecting", act.session_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn error_frame(err: &ChatError) -> String {
        ServerEvent::Error {
            message: err.to_string(),
        }
        .to_frame()
    }

    fn dispatch(&mut self, event: ClientEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match event {
            ClientEvent::JoinProjectChat { project_id } => {
                self.join_project_chat(project_id, ctx);
            }
            ClientEvent::SendMessage {
                project_id,
                content,
                msg_type,
                file_url,
            } => {
                self.send_message(project_id, content, msg_type, file_url, ctx);
            }
            ClientEvent::TypingStart { room_id } => self.typing(room_id, true),
            ClientEvent::TypingStop { room_id } => self.typing(room_id, false),
            ClientEvent::MarkRead {
                room_id,
                message_ids,
            } => self.mark_read(room_id, message_ids, ctx),
        }
    }

    fn join_project_chat(&mut self, project_id: String, ctx: &mut ws::WebsocketContext<Self>) {
        let state = self.state.clone();
        let user_id = self.identity.id.clone();
        let addr = ctx.address();
        // Detached from the session context: a disconnect mid-resolve must
        // not cancel the storage work. Replies to a connection that is gone
        // are dropped by the dead mailbox.
        actix_web::rt::spawn(async move {
            match rooms::resolve_or_create(
                &state.mongodb,
                state.config.authorization_mode,
                &project_id,
                &user_id,
            )
            .await
            {
                Ok(room) => {
                    let room_id = room.id.to_hex();
                    state.chat_server.do_send(JoinRoom {
                        room_id: room_id.clone(),
                        user_id: user_id.clone(),
                    });
                    info!(
                        "User {} joined project chat {} (room {})",
                        user_id, project_id, room_id
                    );
                    addr.do_send(WsMessage(
                        ServerEvent::RoomJoined { room_id, project_id }.to_frame(),
                    ));
                }
                Err(err) => {
                    error!("Join error for user {}: {}", user_id, err);
                    addr.do_send(WsMessage(Self::error_frame(&err)));
                }
            }
        });
    }

    fn send_message(
        &mut self,
        project_id: String,
        content: String,
        msg_type: MessageType,
        file_url: Option<String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let state = self.state.clone();
        let user_id = self.identity.id.clone();
        let sender_name = self.identity.name.clone();
        let addr = ctx.address();
        actix_web::rt::spawn(async move {
            let stored = async {
                // Resolving by project id re-checks authorization on every
                // send and covers clients that never issued an explicit join.
                let room = rooms::resolve_or_create(
                    &state.mongodb,
                    state.config.authorization_mode,
                    &project_id,
                    &user_id,
                )
                .await?;
                let message = messages::append(
                    &state.mongodb,
                    room.id,
                    &user_id,
                    content,
                    msg_type,
                    file_url,
                )
                .await?;
                let wire = messages::hydrate_wire(&state.mongodb, std::slice::from_ref(&message))
                    .await?
                    .pop();
                Ok::<_, ChatError>((room, message, wire))
            }
            .await;

            match stored {
                Ok((room, message, wire)) => {
                    if let Some(wire) = wire {
                        // The sender hears their own message back; clients
                        // use the echo as the delivery acknowledgement.
                        state.chat_server.do_send(RoomBroadcast {
                            room_id: room.id.to_hex(),
                            frame: ServerEvent::ReceiveMessage(wire).to_frame(),
                            exclude: None,
                        });
                    }
                    notify::fan_out(
                        &state.chat_server,
                        &state.push,
                        &room,
                        &message,
                        &sender_name,
                    );
                }
                Err(err) => {
                    error!("Send message error for user {}: {}", user_id, err);
                    addr.do_send(WsMessage(Self::error_frame(&err)));
                }
            }
        });
    }

    fn typing(&self, room_id: String, start: bool) {
        let user_id = self.identity.id.clone();
        let event = if start {
            ServerEvent::TypingStart {
                user_id,
                room_id: room_id.clone(),
            }
        } else {
            ServerEvent::TypingStop {
                user_id,
                room_id: room_id.clone(),
            }
        };
        self.state.chat_server.do_send(RoomBroadcast {
            room_id,
            frame: event.to_frame(),
            exclude: Some(self.identity.id.clone()),
        });
    }

    fn mark_read(
        &mut self,
        room_id: String,
        message_ids: Vec<String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let state = self.state.clone();
        let user_id = self.identity.id.clone();
        let addr = ctx.address();
        actix_web::rt::spawn(async move {
            let outcome = async {
                if !rooms::verify_membership(&state.mongodb, &user_id, &room_id).await? {
                    return Err(ChatError::Unauthorized(
                        "You are not a member of this chat room".to_string(),
                    ));
                }
                messages::mark_read(&state.mongodb, &room_id, &user_id, &message_ids).await
            }
            .await;

            match outcome {
                Ok(()) => {
                    let frame = ServerEvent::MessagesRead {
                        user_id: user_id.clone(),
                        room_id: room_id.clone(),
                        message_ids,
                    }
                    .to_frame();
                    state.chat_server.do_send(RoomBroadcast {
                        room_id,
                        frame,
                        exclude: Some(user_id),
                    });
                }
                Err(err) => {
                    error!("Mark read error for user {}: {}", user_id, err);
                    addr.do_send(WsMessage(Self::error_frame(&err)));
                }
            }
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        // Start the heartbeat process
        self.hb(ctx);

        // Register this connection as the user's private channel.
        let addr = ctx.address();
        self.state
            .chat_server
            .send(Connect {
                user_id: self.identity.id.clone(),
                addr: addr.recipient(),
            })
            .into_actor(self)
            .then(|res, act, ctx| {
                if res.is_err() {
                    error!(
                        "Session {} failed to register with chat server",
                        act.session_id
                    );
                    ctx.stop();
                }
                fut::ready(())
            })
            .wait(ctx);

        info!(
            "User connected: {} (ID: {}, session {})",
            self.identity.name, self.identity.id, self.session_id
        );
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.state.chat_server.do_send(Disconnect {
            user_id: self.identity.id.clone(),
            addr: ctx.address().recipient(),
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => self.dispatch(event, ctx),
                Err(e) => {
                    debug!("Session {} sent an unparseable frame: {}", self.session_id, e);
                }
            },
            Ok(ws::Message::Close(_)) => {
                ctx.stop();
            }
            Err(e) => {
                warn!("Session {} WebSocket error: {}", self.session_id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<WsMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: WsMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

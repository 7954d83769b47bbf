// src/relay.rs

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, info, warn};
use serde::Deserialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::chat_server::{BroadcastAll, ChatServer};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Envelopes the internal application tier may inject. Everything else is
/// dropped without reaching the dispatcher.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum RelayEvent {
    Notification(serde_json::Value),
    #[serde(rename = "announcement:new")]
    AnnouncementNew(serde_json::Value),
}

impl RelayEvent {
    fn name(&self) -> &'static str {
        match self {
            RelayEvent::Notification(_) => "notification",
            RelayEvent::AnnouncementNew(_) => "announcement:new",
        }
    }
}

/// `GET /relay` upgrade endpoint. Deliberately unauthenticated: it is only
/// reachable from inside the deployment, and the main application tier uses
/// it to fan announcements out to every connected client.
pub async fn relay_index(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    ws::start(RelaySession::new(data.chat_server.clone()), &req, stream)
}

pub struct RelaySession {
    session_id: Uuid,
    hb: Instant,
    server: Addr<ChatServer>,
}

impl RelaySession {
    pub fn new(server: Addr<ChatServer>) -> Self {
        RelaySession {
            session_id: Uuid::new_v4(),
            hb: Instant::now(),
            server,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                info!("Relay session {} heartbeat failed, disconnecting", act.session_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for RelaySession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        info!("Relay session {} connected", self.session_id);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        info!("Relay session {} disconnected", self.session_id);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                // The accepted envelope is rebroadcast byte for byte; the
                // parse only decides whether it goes out at all.
                match serde_json::from_str::<RelayEvent>(&text) {
                    Ok(event) => {
                        info!(
                            "Relay session {} broadcasting {} to all clients",
                            self.session_id,
                            event.name()
                        );
                        self.server.do_send(BroadcastAll {
                            frame: text.to_string(),
                        });
                    }
                    Err(e) => {
                        debug!(
                            "Relay session {} sent an unsupported frame: {}",
                            self.session_id, e
                        );
                    }
                }
            }
            Ok(ws::Message::Close(_)) => {
                ctx.stop();
            }
            Err(e) => {
                warn!("Relay session {} WebSocket error: {}", self.session_id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

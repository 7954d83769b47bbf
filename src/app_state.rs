use actix::Addr;
use std::sync::Arc;

use crate::chat_server::ChatServer;
use crate::config::Config;
use crate::db::MongoDB;
use crate::push::PushQueue;

/// Shared handles every HTTP and WebSocket handler gets via `web::Data`.
pub struct AppState {
    pub chat_server: Addr<ChatServer>,
    pub mongodb: Arc<MongoDB>,
    pub config: Config,
    pub push: PushQueue,
}

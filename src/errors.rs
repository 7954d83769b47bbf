use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

/// Every failure the chat core can surface. REST handlers return these
/// directly (rendered by the `ResponseError` impl below); socket handlers
/// render the same values as `error {message}` events to the origin
/// connection only.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Authentication error: No token provided")]
    NoToken,

    #[error("Authentication error: Invalid token")]
    InvalidToken,

    #[error("Authentication error: Invalid user identity in token")]
    NoIdentity,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// An identifier that should be a 24-char hex ObjectId but is not.
    /// The payload names what kind of id was malformed.
    #[error("Invalid {0} ID format")]
    MalformedId(&'static str),

    #[error("Project not found")]
    ProjectNotFound,

    #[error("Chat room not found")]
    RoomNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    /// Push provider could not be reached. Logged and swallowed by the
    /// push worker; never returned to a chat caller.
    #[error("Push provider unreachable: {0}")]
    PushUnreachable(String),

    /// Push provider answered with an error receipt.
    #[error("Push rejected by provider: {0}")]
    PushRejected(String),
}

impl ResponseError for ChatError {
    fn status_code(&self) -> StatusCode {
        match self {
            ChatError::NoToken | ChatError::InvalidToken | ChatError::NoIdentity => {
                StatusCode::UNAUTHORIZED
            }
            ChatError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ChatError::MalformedId(_) => StatusCode::BAD_REQUEST,
            ChatError::ProjectNotFound | ChatError::RoomNotFound | ChatError::UserNotFound => {
                StatusCode::NOT_FOUND
            }
            ChatError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ChatError::PushUnreachable(_) | ChatError::PushRejected(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

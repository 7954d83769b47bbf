// File: chat.rs

use actix_web::{web, HttpResponse, Responder};
use mongodb::bson::doc;
use serde_json::json;

use crate::app_state::AppState;
use crate::errors::ChatError;
use crate::messages;
use crate::models::{parse_object_id, ChatRoom, Project};
use crate::unread;

pub async fn health() -> impl Responder {
    HttpResponse::Ok().body("Socket Server is Running 🚀")
}

/// `GET /chat/project/{projectId}`: ordered, non-deleted history of the
/// project's room in wire form. A project without a room yet has an empty
/// history, not a missing one.
pub async fn get_project_chat_history(
    data: web::Data<AppState>,
    project_id: web::Path<String>,
) -> Result<HttpResponse, ChatError> {
    let pid = parse_object_id(project_id.as_str(), "project")?;

    data.mongodb
        .db
        .collection::<Project>("projects")
        .find_one(doc! { "_id": pid })
        .await?
        .ok_or(ChatError::ProjectNotFound)?;

    let room = match data
        .mongodb
        .db
        .collection::<ChatRoom>("chatrooms")
        .find_one(doc! { "projectId": pid })
        .await?
    {
        Some(room) => room,
        None => return Ok(HttpResponse::Ok().json(Vec::<messages::MessageWire>::new())),
    };

    let history = messages::room_history(&data.mongodb, room.id).await?;
    let wire = messages::hydrate_wire(&data.mongodb, &history).await?;
    Ok(HttpResponse::Ok().json(wire))
}

/// `GET /chat/unread/{userId}`: total unread messages across the user's
/// rooms.
pub async fn get_unread_count(
    data: web::Data<AppState>,
    user_id: web::Path<String>,
) -> Result<HttpResponse, ChatError> {
    let count = unread::unread_count(&data.mongodb, user_id.as_str()).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "unreadCount": count })))
}

/// `GET /chat/unread-projects/{userId}`: unread counts keyed by project
/// hex id, for per-project badges.
pub async fn get_unread_counts_by_project(
    data: web::Data<AppState>,
    user_id: web::Path<String>,
) -> Result<HttpResponse, ChatError> {
    let counts = unread::unread_counts_by_project(&data.mongodb, user_id.as_str()).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "counts": counts })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix::Actor;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::sync::Arc;

    use crate::chat_server::ChatServer;
    use crate::config::{AuthorizationMode, Config};
    use crate::db::MongoDB;
    use crate::push;

    async fn test_state() -> web::Data<AppState> {
        let config = Config {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            database_name: "chat_test".to_string(),
            jwt_secret: "secret".to_string(),
            session_cookie: "app_session".to_string(),
            frontend_origin: "http://localhost:3000".to_string(),
            port: 0,
            authorization_mode: AuthorizationMode::Strict,
            push_endpoint: "http://localhost:9".to_string(),
        };
        let mongodb = Arc::new(MongoDB::init(&config.mongo_uri, &config.database_name).await);
        let (push, _rx) = push::channel();
        web::Data::new(AppState {
            chat_server: ChatServer::new().start(),
            mongodb,
            config,
            push,
        })
    }

    #[actix_web::test]
    async fn test_malformed_ids_are_rejected_with_400() {
        let app = test::init_service(
            App::new().app_data(test_state().await).service(
                web::scope("/chat")
                    .route("/project/{project_id}", web::get().to(get_project_chat_history))
                    .route("/unread/{user_id}", web::get().to(get_unread_count))
                    .route(
                        "/unread-projects/{user_id}",
                        web::get().to(get_unread_counts_by_project),
                    ),
            ),
        )
        .await;

        for uri in [
            "/chat/project/not-hex",
            "/chat/unread/not-hex",
            "/chat/unread-projects/not-hex",
        ] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "uri: {}", uri);
        }
    }

    #[actix_web::test]
    async fn test_error_body_shape() {
        let app = test::init_service(App::new().app_data(test_state().await).route(
            "/chat/project/{project_id}",
            web::get().to(get_project_chat_history),
        ))
        .await;

        let req = test::TestRequest::get()
            .uri("/chat/project/zzz")
            .to_request();
        let resp = test::call_service(&app, req).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Invalid project ID format");
    }

    #[actix_web::test]
    async fn test_health_line() {
        let app =
            test::init_service(App::new().route("/", web::get().to(health))).await;
        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(body, "Socket Server is Running 🚀");
    }
}

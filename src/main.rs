// src/main.rs

mod app_state;
mod config;
mod db;
mod errors;
mod models;
mod identity;
mod rooms;
mod messages;
mod unread;
mod chat;
mod chat_server;
mod web_socket_server;
mod relay;
mod notify;
mod push;

use std::sync::Arc;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;

use crate::app_state::AppState;
use crate::chat::{
    get_project_chat_history, get_unread_count, get_unread_counts_by_project, health,
};
use crate::relay::relay_index;
use crate::web_socket_server::ws_index;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::Config::from_env();
    let mongodb = Arc::new(db::MongoDB::init(&config.mongo_uri, &config.database_name).await);
    mongodb
        .ensure_indexes()
        .await
        .expect("Failed to create MongoDB indexes");

    // Start the dispatcher actor; sessions register against it.
    let chat_server = chat_server::ChatServer::new().start();

    let (push_queue, push_jobs) = push::channel();
    push::spawn_worker(push_jobs, mongodb.clone(), config.push_endpoint.clone());

    let bind_addr = format!("0.0.0.0:{}", config.port);
    println!("Chat server running at http://{}", bind_addr);
    println!("Allowed CORS Origin: {}", config.frontend_origin);

    let frontend_origin = config.frontend_origin.clone();

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(AppState {
                chat_server: chat_server.clone(),
                mongodb: mongodb.clone(),
                config: config.clone(),
                push: push_queue.clone(),
            }))
            .route("/", web::get().to(health))
            // CHAT READ PATH
            .service(
                web::scope("/chat")
                    .route(
                        "/project/{project_id}",
                        web::get().to(get_project_chat_history),
                    )
                    .route("/unread/{user_id}", web::get().to(get_unread_count))
                    .route(
                        "/unread-projects/{user_id}",
                        web::get().to(get_unread_counts_by_project),
                    ),
            )
            // WEBSOCKET route for real-time chat
            .service(web::resource("/ws").route(web::get().to(ws_index)))
            // Internal relay for cross-service broadcasts
            .service(web::resource("/relay").route(web::get().to(relay_index)))
    })
    .bind(&bind_addr)?
    .run()
    .await
}

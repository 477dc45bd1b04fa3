#![allow(
    clippy::print_stdout,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_docs_in_private_items,
    clippy::doc_markdown
)]

//! Session Server Example
//!
//! A small actix-web server keeping a per-visitor view counter and a login
//! name in a server-side session.
//!
//! Features:
//! - HMAC-SHA256 signed session cookie
//! - Rolling one-hour expiry
//! - Session ID rotation on login
//! - In-memory session storage
//!
//! Run with: `cargo run --example session_server --features actix`
//!
//! Test endpoints:
//!   curl http://localhost:8080/ -c cookies.txt -b cookies.txt
//!
//!   curl -X POST http://localhost:8080/login/alice -c cookies.txt -b cookies.txt
//!
//!   curl -X POST http://localhost:8080/logout -c cookies.txt -b cookies.txt

use std::sync::Arc;

use actix_web::{App, HttpResponse, HttpServer, web};
use chrono::Duration;
use enclave_session::{
    CookieOptions, InMemorySessionStore, SameSite, SecretString, Session, SessionConfig,
    SessionError, SessionMiddleware,
};

async fn index(session: Session) -> Result<HttpResponse, SessionError> {
    let views = session.get::<u64>("views").unwrap_or(0) + 1;
    session.insert("views", views)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "views": views,
        "user": session.get::<String>("user"),
    })))
}

async fn login(session: Session, name: web::Path<String>) -> Result<HttpResponse, SessionError> {
    session.regenerate().await?;
    session.insert("user", name.into_inner())?;
    Ok(HttpResponse::Ok().finish())
}

async fn logout(session: Session) -> Result<HttpResponse, SessionError> {
    session.destroy().await?;
    Ok(HttpResponse::NoContent().finish())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // In production, load secret from environment variable
    let session_secret = std::env::var("SESSION_SECRET")
        .unwrap_or_else(|_| "your-super-secret-key-at-least-32-bytes!".to_owned());

    let config = SessionConfig {
        cookie_name: "enclave_session".to_owned(),
        cookie: CookieOptions {
            cookie_same_site: Some(SameSite::Lax),
            max_age: Some(Duration::hours(1)),
            ..Default::default()
        },
        rolling: true,
        ..SessionConfig::new(SecretString::new(session_secret))
    };

    let sessions =
        SessionMiddleware::with_store(Arc::new(InMemorySessionStore::new()), config).expect("valid session config");

    println!("Starting session server on http://localhost:8080");
    println!();
    println!("Endpoints:");
    println!("  GET  /             - Count views in the session");
    println!("  POST /login/{{name}} - Rotate the session and store a user name");
    println!("  POST /logout       - Destroy the session");

    HttpServer::new(move || {
        App::new()
            .wrap(sessions.clone())
            .route("/", web::get().to(index))
            .route("/login/{name}", web::post().to(login))
            .route("/logout", web::post().to(logout))
    })
    .bind("127.0.0.1:8080")?
    .run()
    .await
}

// api/mod.rs — HTTP API server.
//
// Axum router over the shared AppContext. Every resource route authenticates
// through the AuthUser extractor; auth endpoints and the health probe are
// open. Mutating handlers implement the pipeline: guard check → validation →
// store mutation → response → event fan-out.

pub mod routes;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub async fn serve(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("HTTP API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/", get(health))
        // Auth (no bearer credential)
        .route("/api/auth/register", post(routes::auth::register))
        .route("/api/auth/login", post(routes::auth::login))
        // Projects
        .route(
            "/api/projects",
            get(routes::projects::list).post(routes::projects::create),
        )
        .route(
            "/api/projects/{projectId}",
            get(routes::projects::get)
                .put(routes::projects::update)
                .delete(routes::projects::delete),
        )
        .route("/api/projects/{projectId}/stats", get(routes::projects::stats))
        // Tasks
        .route(
            "/api/projects/{projectId}/tasks",
            get(routes::tasks::list).post(routes::tasks::create),
        )
        .route(
            "/api/projects/{projectId}/tasks/{taskId}",
            get(routes::tasks::get)
                .put(routes::tasks::update)
                .delete(routes::tasks::delete),
        )
        // Memberships
        .route(
            "/api/projects/{projectId}/members",
            get(routes::memberships::list).post(routes::memberships::invite),
        )
        .route(
            "/api/projects/{projectId}/members/{membershipId}",
            axum::routing::delete(routes::memberships::remove),
        )
        // Users
        .route(
            "/api/users/profile",
            get(routes::users::profile).put(routes::users::update_profile),
        )
        .route("/api/users/search", get(routes::users::search))
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

async fn health(State(ctx): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "API is running",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": ctx.started_at.elapsed().as_secs(),
    }))
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "Route not found" })),
    )
}

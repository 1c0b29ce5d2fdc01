//! HTTP surface. Route modules return stateless `Router<AppContext>`
//! fragments which are merged and given the shared context here.

mod auth;
mod domains;
mod emails;
mod mailboxes;
mod users;

use crate::app::AppContext;
use axum::{Json, Router, routing::get};
use serde_json::json;

pub fn api_router(ctx: AppContext) -> Router {
    Router::new()
        .merge(auth::routes())
        .merge(users::routes())
        .merge(mailboxes::routes())
        .merge(domains::routes())
        .merge(emails::routes())
        .route("/health", get(health))
        .with_state(ctx)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

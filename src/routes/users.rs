use crate::app::AppContext;
use crate::auth::CurrentUser;
use crate::entities::{prelude::*, user};
use crate::error::{Error, Result};
use axum::{Json, Router, extract::State, routing::get};
use sea_orm::EntityTrait;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/me", get(me))
}

async fn list_users(
    State(ctx): State<AppContext>,
    _user: CurrentUser,
) -> Result<Json<Vec<user::Model>>> {
    Ok(Json(Users::find().all(&*ctx.db).await?))
}

async fn me(State(ctx): State<AppContext>, user: CurrentUser) -> Result<Json<user::Model>> {
    Users::find_by_id(user.id)
        .one(&*ctx.db)
        .await?
        .map(Json)
        .ok_or_else(|| Error::not_found("User not found"))
}

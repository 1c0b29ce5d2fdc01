//! Registration and login.

use crate::app::AppContext;
use crate::auth::{hash_password, issue_token, verify_password};
use crate::entities::{prelude::*, user};
use crate::error::{Error, Result};
use axum::{
    Form, Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/token", post(token))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
    #[serde(default)]
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    user: user::Model,
}

async fn register(
    State(ctx): State<AppContext>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    if request.username.trim().is_empty() {
        return Err(Error::bad_request("Username cannot be empty"));
    }
    if !request.email.contains('@') {
        return Err(Error::bad_request("Invalid email address"));
    }
    if request.password.len() < 8 {
        return Err(Error::bad_request("Password must be at least 8 characters"));
    }

    let taken = Users::find()
        .filter(
            user::Column::Username
                .eq(request.username.trim())
                .or(user::Column::Email.eq(request.email.trim())),
        )
        .one(&*ctx.db)
        .await?;
    if taken.is_some() {
        return Err(Error::bad_request("Username or email already registered"));
    }

    let created = user::ActiveModel {
        username: Set(request.username.trim().to_string()),
        email: Set(request.email.trim().to_string()),
        full_name: Set(request.full_name),
        hashed_password: Set(hash_password(&request.password)?),
        is_active: Set(true),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&*ctx.db)
    .await?;

    tracing::info!(user_id = created.id, username = %created.username, "user registered");

    Ok((StatusCode::CREATED, Json(created)))
}

/// OAuth2 password flow: credentials arrive form-encoded, the response
/// carries a bearer token.
async fn token(
    State(ctx): State<AppContext>,
    Form(request): Form<TokenRequest>,
) -> Result<Json<TokenResponse>> {
    let user = Users::find()
        .filter(user::Column::Username.eq(request.username.as_str()))
        .one(&*ctx.db)
        .await?
        .ok_or_else(|| Error::unauthorized("Incorrect username or password"))?;

    if !verify_password(&request.password, &user.hashed_password) {
        return Err(Error::unauthorized("Incorrect username or password"));
    }
    if !user.is_active {
        return Err(Error::forbidden("Account is disabled"));
    }

    let access_token = issue_token(
        user.id,
        &user.username,
        &ctx.config.auth.jwt_secret,
        ctx.config.auth.token_ttl_minutes,
    )?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
        user,
    }))
}

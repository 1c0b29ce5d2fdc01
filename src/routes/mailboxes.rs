//! Mailbox CRUD, scoped to the authenticated owner.

use crate::app::AppContext;
use crate::auth::CurrentUser;
use crate::entities::{mailbox, prelude::*};
use crate::error::{Error, Result};
use crate::mailer::ProviderKind;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder,
};
use serde::Deserialize;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/mailboxes", get(list_mailboxes).post(create_mailbox))
        .route("/mailboxes/{id}/verify", post(verify_mailbox))
}

#[derive(Debug, Deserialize)]
struct CreateMailbox {
    #[serde(default)]
    name: Option<String>,
    email: String,
    provider: String,
    #[serde(default)]
    auth_type: Option<String>,
    /// Provider-specific settings, stored opaquely and interpreted by the
    /// matching adapter at send time.
    #[serde(default)]
    settings: Option<serde_json::Value>,
}

async fn list_mailboxes(
    State(ctx): State<AppContext>,
    user: CurrentUser,
) -> Result<Json<Vec<mailbox::Model>>> {
    let mailboxes = Mailboxes::find()
        .filter(mailbox::Column::OwnerId.eq(user.id))
        .order_by_asc(mailbox::Column::Id)
        .all(&*ctx.db)
        .await?;
    Ok(Json(mailboxes))
}

async fn create_mailbox(
    State(ctx): State<AppContext>,
    user: CurrentUser,
    Json(request): Json<CreateMailbox>,
) -> Result<impl IntoResponse> {
    if !request.email.contains('@') {
        return Err(Error::bad_request("Invalid mailbox address"));
    }
    let provider: ProviderKind = request
        .provider
        .parse()
        .map_err(|e| Error::bad_request(format!("{}", e)))?;

    let settings = request
        .settings
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let created = mailbox::ActiveModel {
        name: Set(request.name),
        email: Set(request.email.trim().to_string()),
        provider: Set(provider.as_str().to_string()),
        auth_type: Set(request.auth_type.unwrap_or_else(|| "password".to_string())),
        settings: Set(settings),
        is_verified: Set(false),
        owner_id: Set(user.id),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&*ctx.db)
    .await?;

    tracing::info!(
        mailbox_id = created.id,
        owner = user.id,
        provider = %created.provider,
        "mailbox created"
    );

    Ok((StatusCode::CREATED, Json(created)))
}

async fn verify_mailbox(
    State(ctx): State<AppContext>,
    user: CurrentUser,
    Path(id): Path<i32>,
) -> Result<Json<mailbox::Model>> {
    let mailbox = Mailboxes::find_by_id(id)
        .filter(mailbox::Column::OwnerId.eq(user.id))
        .one(&*ctx.db)
        .await?
        .ok_or_else(|| Error::not_found("Mailbox not found"))?;

    let mut active = mailbox.into_active_model();
    active.is_verified = Set(true);
    let updated = active.update(&*ctx.db).await?;

    tracing::info!(mailbox_id = updated.id, owner = user.id, "mailbox verified");

    Ok(Json(updated))
}

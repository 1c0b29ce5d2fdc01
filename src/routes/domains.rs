//! Outgoing domain management. Deletion is a soft delete so delivery
//! history keeps pointing at a real row.

use crate::app::AppContext;
use crate::auth::CurrentUser;
use crate::entities::{outgoing_domain, prelude::*};
use crate::error::{Error, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder,
};
use serde::Deserialize;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/domains", get(list_domains).post(create_domain))
        .route("/domains/{id}", axum::routing::delete(delete_domain))
}

#[derive(Debug, Deserialize)]
struct CreateDomain {
    domain: String,
    #[serde(default)]
    smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    smtp_port: i32,
    #[serde(default)]
    smtp_user: Option<String>,
    #[serde(default)]
    smtp_password: Option<String>,
}

fn default_smtp_port() -> i32 {
    587
}

async fn list_domains(
    State(ctx): State<AppContext>,
    _user: CurrentUser,
) -> Result<Json<Vec<outgoing_domain::Model>>> {
    let domains = OutgoingDomains::find()
        .filter(outgoing_domain::Column::IsActive.eq(true))
        .order_by_asc(outgoing_domain::Column::Domain)
        .all(&*ctx.db)
        .await?;
    Ok(Json(domains))
}

async fn create_domain(
    State(ctx): State<AppContext>,
    user: CurrentUser,
    Json(request): Json<CreateDomain>,
) -> Result<impl IntoResponse> {
    let domain = request.domain.trim().to_ascii_lowercase();
    if domain.is_empty() || !domain.contains('.') {
        return Err(Error::bad_request("Invalid domain name"));
    }

    let existing = OutgoingDomains::find()
        .filter(outgoing_domain::Column::Domain.eq(domain.as_str()))
        .one(&*ctx.db)
        .await?;
    if existing.is_some() {
        return Err(Error::bad_request("Domain already registered"));
    }

    let created = outgoing_domain::ActiveModel {
        domain: Set(domain),
        smtp_host: Set(request.smtp_host),
        smtp_port: Set(request.smtp_port),
        smtp_user: Set(request.smtp_user),
        smtp_password: Set(request.smtp_password),
        is_active: Set(true),
        created_by: Set(user.id),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&*ctx.db)
    .await?;

    tracing::info!(domain_id = created.id, domain = %created.domain, "domain registered");

    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_domain(
    State(ctx): State<AppContext>,
    user: CurrentUser,
    Path(id): Path<i32>,
) -> Result<StatusCode> {
    let domain = OutgoingDomains::find_by_id(id)
        .filter(outgoing_domain::Column::IsActive.eq(true))
        .one(&*ctx.db)
        .await?
        .ok_or_else(|| Error::not_found("Domain not found"))?;

    let name = domain.domain.clone();
    let mut active = domain.into_active_model();
    active.is_active = Set(false);
    active.update(&*ctx.db).await?;

    tracing::info!(domain_id = id, domain = %name, by = user.id, "domain deactivated");

    Ok(StatusCode::NO_CONTENT)
}

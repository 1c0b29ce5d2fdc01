//! Email endpoints: submission, history, stats, and the tracking beacon.

use crate::app::AppContext;
use crate::auth::CurrentUser;
use crate::dispatch::{DispatchRequest, SendAck, submit};
use crate::entities::{delivery_log, delivery_log::DeliveryStatus, prelude::*};
use crate::error::{Error, Result};
use crate::tracking::{OpenCapture, TRANSPARENT_GIF, record_open};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{Duration, Utc};
use sea_orm::{
    ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/emails/send", post(send_email))
        .route("/emails/track/open/{id}", get(track_open))
        .route("/emails/history", get(history))
        .route("/emails/stats", get(stats))
        .route("/emails/history/{id}", delete(delete_history))
}

async fn send_email(
    State(ctx): State<AppContext>,
    user: CurrentUser,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<SendAck>> {
    let ack = submit(&ctx, user.id, request).await?;
    Ok(Json(ack))
}

/// Beacon endpoint. Unauthenticated by design: mail clients fetch it. The
/// pixel is served no matter what happens while recording the open, so a
/// broken id or database outage never shows up in the recipient's client.
async fn track_open(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    capture: OpenCapture,
) -> impl IntoResponse {
    let log_id = id.strip_suffix(".png").unwrap_or(&id).parse::<i32>().ok();

    if let Some(log_id) = log_id {
        match record_open(&*ctx.db, log_id, &capture).await {
            Ok(true) => tracing::debug!(log_id, "open recorded"),
            Ok(false) => tracing::debug!(log_id, "open for unknown delivery log"),
            Err(e) => tracing::warn!(log_id, error = %e, "failed to record open"),
        }
    }

    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        TRANSPARENT_GIF,
    )
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_limit")]
    limit: u64,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    status: Option<String>,
}

fn default_limit() -> u64 {
    50
}

async fn history(
    State(ctx): State<AppContext>,
    user: CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<delivery_log::Model>>> {
    let mut select = DeliveryLogs::find()
        .filter(delivery_log::Column::SentBy.eq(user.id))
        .order_by_desc(delivery_log::Column::CreatedAt)
        .limit(query.limit.min(200))
        .offset(query.offset);

    if let Some(raw) = &query.status {
        let status: DeliveryStatus = raw
            .parse()
            .map_err(|e: String| Error::bad_request(e))?;
        select = select.filter(delivery_log::Column::Status.eq(status));
    }

    Ok(Json(select.all(&*ctx.db).await?))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    total_sent: u64,
    total_failed: u64,
    success_rate: f64,
    last_24h: u64,
    total_opens: i64,
    opened_messages: u64,
}

async fn stats(State(ctx): State<AppContext>, user: CurrentUser) -> Result<Json<StatsResponse>> {
    let own = || DeliveryLogs::find().filter(delivery_log::Column::SentBy.eq(user.id));

    let total_sent = own()
        .filter(delivery_log::Column::Status.eq(DeliveryStatus::Sent))
        .count(&*ctx.db)
        .await?;
    let total_failed = own()
        .filter(delivery_log::Column::Status.eq(DeliveryStatus::Failed))
        .count(&*ctx.db)
        .await?;
    let last_24h = own()
        .filter(delivery_log::Column::Status.eq(DeliveryStatus::Sent))
        .filter(delivery_log::Column::CreatedAt.gt(Utc::now() - Duration::hours(24)))
        .count(&*ctx.db)
        .await?;
    let opened_messages = own()
        .filter(delivery_log::Column::FirstOpenedAt.is_not_null())
        .count(&*ctx.db)
        .await?;

    let total_opens = own()
        .select_only()
        .column_as(delivery_log::Column::OpenCount.sum(), "total_opens")
        .into_tuple::<Option<i64>>()
        .one(&*ctx.db)
        .await?
        .flatten();

    let finished = total_sent + total_failed;
    let success_rate = if finished == 0 {
        0.0
    } else {
        (total_sent as f64 / finished as f64) * 100.0
    };

    Ok(Json(StatsResponse {
        total_sent,
        total_failed,
        success_rate,
        last_24h,
        total_opens: total_opens.unwrap_or(0),
        opened_messages,
    }))
}

async fn delete_history(
    State(ctx): State<AppContext>,
    user: CurrentUser,
    Path(id): Path<i32>,
) -> Result<StatusCode> {
    let log = DeliveryLogs::find_by_id(id)
        .filter(delivery_log::Column::SentBy.eq(user.id))
        .one(&*ctx.db)
        .await?
        .ok_or_else(|| Error::not_found("Delivery log not found"))?;

    log.delete(&*ctx.db).await?;

    tracing::info!(log_id = id, by = user.id, "delivery log deleted");

    Ok(StatusCode::NO_CONTENT)
}

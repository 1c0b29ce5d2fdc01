//! The send pipeline: validate, log, hand off to a background delivery
//! task, retry transient failures up to the configured bound.

use crate::app::AppContext;
use crate::entities::{delivery_log, delivery_log::DeliveryStatus, mailbox, prelude::*};
use crate::error::{Error, Result};
use crate::mailer::{Mailer, OutboundMessage, SendFailure, build_mailer};
use crate::tracking::inject_pixel;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// An email submission from an authenticated caller.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchRequest {
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<PathBuf>,
    /// Explicit sending mailbox. Absent means the caller's first verified
    /// mailbox, lowest id first, so repeat submissions pick the same one.
    #[serde(default)]
    pub mailbox_id: Option<i32>,
}

/// Acknowledgement returned as soon as the submission is logged; delivery
/// itself continues in the background.
#[derive(Debug, Clone, Serialize)]
pub struct SendAck {
    pub log_id: i32,
    pub status: DeliveryStatus,
    pub mailbox_id: i32,
    /// Address of the mailbox the message will leave from, so callers see
    /// which sender was picked when they left `mailbox_id` unset.
    pub mailbox_used: String,
    pub message: &'static str,
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|s| s.trim().is_empty()).unwrap_or(true)
}

/// Resolve which mailbox a submission sends from.
///
/// An explicit id must name a mailbox the caller owns. Without one, the
/// caller's lowest-id verified mailbox is used.
pub async fn resolve_mailbox(
    ctx: &AppContext,
    user_id: i32,
    mailbox_id: Option<i32>,
) -> Result<mailbox::Model> {
    match mailbox_id {
        Some(id) => Mailboxes::find_by_id(id)
            .filter(mailbox::Column::OwnerId.eq(user_id))
            .one(&*ctx.db)
            .await?
            .ok_or_else(|| Error::not_found("Mailbox not found")),
        None => Mailboxes::find()
            .filter(mailbox::Column::OwnerId.eq(user_id))
            .filter(mailbox::Column::IsVerified.eq(true))
            .order_by_asc(mailbox::Column::Id)
            .one(&*ctx.db)
            .await?
            .ok_or_else(|| Error::bad_request("No verified mailbox available")),
    }
}

/// Validate and log a submission, then spawn its delivery task.
pub async fn submit(ctx: &AppContext, user_id: i32, request: DispatchRequest) -> Result<SendAck> {
    if request.subject.trim().is_empty() {
        return Err(Error::bad_request("Subject cannot be empty"));
    }
    if is_blank(request.body.as_deref()) && is_blank(request.html_body.as_deref()) {
        return Err(Error::bad_request("Message body cannot be empty"));
    }

    let mailbox = resolve_mailbox(ctx, user_id, request.mailbox_id).await?;

    let log = delivery_log::ActiveModel {
        to_email: Set(request.to.clone()),
        from_email: Set(mailbox.email.clone()),
        subject: Set(request.subject.clone()),
        body: Set(request.body.clone().or_else(|| request.html_body.clone())),
        status: Set(DeliveryStatus::Pending),
        sent_by: Set(user_id),
        mailbox_id: Set(mailbox.id),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    let log = log.insert(&*ctx.db).await?;

    tracing::info!(
        log_id = log.id,
        mailbox_id = mailbox.id,
        provider = %mailbox.provider,
        to = %request.to,
        "email accepted for delivery"
    );

    let ack = SendAck {
        log_id: log.id,
        status: DeliveryStatus::Pending,
        mailbox_id: mailbox.id,
        mailbox_used: mailbox.email.clone(),
        message: "Email queued for delivery",
    };

    let task_ctx = ctx.clone();
    tokio::spawn(async move {
        deliver(task_ctx, log.id, mailbox, request).await;
    });

    Ok(ack)
}

/// Run one delivery to completion. The log row always ends in a terminal
/// state, even when the adapter cannot be built.
pub async fn deliver(ctx: AppContext, log_id: i32, mailbox: mailbox::Model, request: DispatchRequest) {
    let html = request
        .html_body
        .as_deref()
        .filter(|h| !h.trim().is_empty())
        .map(|h| inject_pixel(h, &ctx.config.tracking.base_url, log_id));

    let message = OutboundMessage {
        from_name: mailbox.name.clone(),
        from_email: mailbox.email.clone(),
        to: request.to.clone(),
        subject: request.subject.clone(),
        text: request.body.clone().unwrap_or_default(),
        html,
        cc: request.cc.clone(),
        bcc: request.bcc.clone(),
        attachments: request.attachments.clone(),
    };

    let mailer = match build_mailer(&mailbox, &ctx.http) {
        Ok(mailer) => mailer,
        Err(failure) => {
            tracing::warn!(log_id, error = %failure, "delivery aborted before first attempt");
            finalize(&ctx, log_id, DeliveryStatus::Failed, Some(failure.diagnostic)).await;
            return;
        }
    };

    let dispatch = &ctx.config.dispatch;
    let outcome = run_attempts(
        mailer.as_ref(),
        &message,
        dispatch.max_attempts,
        dispatch.retry_delay(),
        dispatch.provider_timeout(),
    )
    .await;

    match outcome {
        Ok(attempt) => {
            tracing::info!(log_id, provider = mailer.provider_name(), attempt, "email sent");
            finalize(&ctx, log_id, DeliveryStatus::Sent, None).await;
        }
        Err(failure) => {
            tracing::warn!(log_id, provider = mailer.provider_name(), error = %failure, "email failed");
            finalize(&ctx, log_id, DeliveryStatus::Failed, Some(failure.diagnostic)).await;
        }
    }
}

/// Drive the attempt loop. Transient failures are retried after a fixed
/// delay until the attempt bound; configuration and unsupported failures
/// stop immediately. Returns the attempt number that succeeded.
pub async fn run_attempts(
    mailer: &dyn Mailer,
    message: &OutboundMessage,
    max_attempts: u32,
    retry_delay: Duration,
    provider_timeout: Duration,
) -> std::result::Result<u32, SendFailure> {
    let mut last_failure = SendFailure::transient("No delivery attempt was made");

    for attempt in 1..=max_attempts.max(1) {
        match tokio::time::timeout(provider_timeout, mailer.send(message)).await {
            Ok(Ok(())) => return Ok(attempt),
            Ok(Err(failure)) => {
                if !failure.is_retryable() {
                    return Err(failure);
                }
                last_failure = failure;
            }
            Err(_) => {
                last_failure = SendFailure::transient(format!(
                    "Provider timed out after {}s",
                    provider_timeout.as_secs()
                ));
            }
        }

        if attempt < max_attempts {
            tracing::warn!(
                provider = mailer.provider_name(),
                attempt,
                error = %last_failure,
                "send attempt failed, retrying"
            );
            tokio::time::sleep(retry_delay).await;
        }
    }

    Err(last_failure)
}

/// Move a delivery log to its terminal state. Failures here are logged and
/// swallowed; the task has nowhere left to report to.
async fn finalize(ctx: &AppContext, log_id: i32, status: DeliveryStatus, error: Option<String>) {
    let update = delivery_log::ActiveModel {
        id: Set(log_id),
        status: Set(status),
        error_message: Set(error),
        ..Default::default()
    };
    if let Err(e) = update.update(&*ctx.db).await {
        tracing::error!(log_id, error = %e, "failed to finalize delivery log");
    }
}

//! Open tracking: beacon injection into outbound HTML and open recording
//! when the beacon is fetched.

use crate::entities::{delivery_log, prelude::*};
use crate::error::Result;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{HeaderMap, request::Parts};
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::net::SocketAddr;
use woothee::parser::Parser;

/// A 1x1 transparent GIF, served for every beacon fetch regardless of
/// whether the id matched a delivery log.
pub const TRANSPARENT_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, // GIF89a
    0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, // 1x1, one color table
    0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, // black, white
    0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, // transparent GCE
    0x2C, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, // image descriptor
    0x02, 0x02, 0x44, 0x01, 0x00, // image data
    0x3B, // trailer
];

/// Beacon URL for a delivery log. The `.png` suffix keeps proxies and mail
/// clients treating the fetch as an image request.
pub fn beacon_url(base_url: &str, log_id: i32) -> String {
    format!(
        "{}/emails/track/open/{}.png",
        base_url.trim_end_matches('/'),
        log_id
    )
}

/// Insert exactly one hidden tracking pixel into an HTML body.
///
/// The pixel lands just before the final `</body>` tag (any case); bodies
/// without one get it appended. Plain-text-only messages are never touched
/// by the caller.
pub fn inject_pixel(html: &str, base_url: &str, log_id: i32) -> String {
    let pixel = format!(
        r#"<img src="{}" width="1" height="1" style="display:none" alt="" />"#,
        beacon_url(base_url, log_id)
    );

    let lower = html.to_ascii_lowercase();
    match lower.rfind("</body>") {
        Some(idx) => {
            let mut out = String::with_capacity(html.len() + pixel.len());
            out.push_str(&html[..idx]);
            out.push_str(&pixel);
            out.push_str(&html[idx..]);
            out
        }
        None => {
            let mut out = html.to_string();
            out.push_str(&pixel);
            out
        }
    }
}

/// Everything we capture about a single beacon fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenCapture {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
    pub referrer: Option<String>,
    pub accept_language: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl OpenCapture {
    /// Build a capture from request headers. The client ip honors
    /// `X-Forwarded-For` (first hop) ahead of the socket address.
    pub fn from_headers(headers: &HeaderMap, socket_ip: Option<String>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };

        let ip = header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .or(socket_ip);

        let user_agent = header("user-agent");
        let (browser, os, device) = match user_agent.as_deref().and_then(|ua| Parser::new().parse(ua))
        {
            Some(parsed) => (
                Some(format!("{} {}", parsed.name, parsed.version)),
                Some(parsed.os.to_string()),
                Some(parsed.category.to_string()),
            ),
            None => (None, None, None),
        };

        Self {
            ip,
            user_agent,
            browser,
            os,
            device,
            referrer: header("referer"),
            accept_language: header("accept-language"),
            captured_at: Utc::now(),
        }
    }
}

/// Extracting a capture never fails: the socket address comes from
/// `ConnectInfo` when the server was started with connect info, and is
/// simply absent otherwise (mock routers in tests, for instance).
impl<S> FromRequestParts<S> for OpenCapture
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let socket_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(Self::from_headers(&parts.headers, socket_ip))
    }
}

/// Fold a new capture into the stored tracking metadata.
///
/// The first capture is stored as the object itself; later captures are
/// pushed onto its `history` array. Metadata that is not a JSON object is
/// replaced rather than trusted.
fn fold_capture(existing: Option<Value>, capture: &OpenCapture) -> Value {
    let capture_json = serde_json::to_value(capture).unwrap_or_else(|_| json!({}));

    match existing {
        Some(Value::Object(mut obj)) => {
            match obj.get_mut("history") {
                Some(Value::Array(history)) => history.push(capture_json),
                _ => {
                    obj.insert("history".to_string(), json!([capture_json]));
                }
            }
            Value::Object(obj)
        }
        _ => capture_json,
    }
}

/// Record one open against a delivery log.
///
/// Returns `Ok(false)` for unknown ids so the handler can still serve the
/// pixel. The first open is claimed with a conditional update keyed on
/// `first_opened_at IS NULL`, so two concurrent beacon fetches cannot both
/// take the first-open path; the loser falls through to the atomic
/// increment below.
pub async fn record_open(
    db: &DatabaseConnection,
    log_id: i32,
    capture: &OpenCapture,
) -> Result<bool> {
    let Some(log) = DeliveryLogs::find_by_id(log_id).one(db).await? else {
        return Ok(false);
    };

    let now = Utc::now();

    if log.first_opened_at.is_none() {
        let claimed = DeliveryLogs::update_many()
            .filter(delivery_log::Column::Id.eq(log_id))
            .filter(delivery_log::Column::FirstOpenedAt.is_null())
            .col_expr(delivery_log::Column::FirstOpenedAt, Expr::value(Some(now)))
            .col_expr(delivery_log::Column::LastOpenedAt, Expr::value(Some(now)))
            .col_expr(delivery_log::Column::OpenCount, Expr::value(1))
            .col_expr(
                delivery_log::Column::TrackingMeta,
                Expr::value(Some(fold_capture(None, capture))),
            )
            .exec(db)
            .await?;
        if claimed.rows_affected > 0 {
            return Ok(true);
        }
        // Raced by another open between the read and the claim; re-read
        // the metadata so the increment folds into the winner's capture.
        let Some(raced) = DeliveryLogs::find_by_id(log_id).one(db).await? else {
            return Ok(false);
        };
        return increment_open(db, log_id, raced.tracking_meta, capture, now).await;
    }

    increment_open(db, log_id, log.tracking_meta, capture, now).await
}

async fn increment_open(
    db: &DatabaseConnection,
    log_id: i32,
    existing_meta: Option<Value>,
    capture: &OpenCapture,
    now: DateTime<Utc>,
) -> Result<bool> {
    let meta = fold_capture(existing_meta, capture);
    DeliveryLogs::update_many()
        .filter(delivery_log::Column::Id.eq(log_id))
        .col_expr(
            delivery_log::Column::OpenCount,
            Expr::col(delivery_log::Column::OpenCount).add(1),
        )
        .col_expr(delivery_log::Column::LastOpenedAt, Expr::value(Some(now)))
        .col_expr(delivery_log::Column::TrackingMeta, Expr::value(Some(meta)))
        .exec(db)
        .await?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> OpenCapture {
        OpenCapture {
            ip: Some("203.0.113.9".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            browser: None,
            os: None,
            device: None,
            referrer: None,
            accept_language: Some("en-US".to_string()),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_gif_is_valid_gif89a() {
        assert_eq!(&TRANSPARENT_GIF[..6], b"GIF89a");
        assert_eq!(TRANSPARENT_GIF[42], 0x3B);
    }

    #[test]
    fn test_pixel_lands_before_closing_body() {
        let html = "<html><body><p>Hello</p></body></html>";
        let out = inject_pixel(html, "https://mail.example.com", 7);
        let pixel_at = out.find("<img src=").unwrap();
        let body_at = out.find("</body>").unwrap();
        assert!(pixel_at < body_at);
        assert!(out.contains("https://mail.example.com/emails/track/open/7.png"));
        assert_eq!(out.matches("<img src=").count(), 1);
    }

    #[test]
    fn test_pixel_handles_uppercase_body_tag() {
        let html = "<HTML><BODY>Hi</BODY></HTML>";
        let out = inject_pixel(html, "http://localhost:8000", 3);
        let pixel_at = out.find("<img src=").unwrap();
        let body_at = out.find("</BODY>").unwrap();
        assert!(pixel_at < body_at);
    }

    #[test]
    fn test_pixel_appended_when_no_body_tag() {
        let out = inject_pixel("<p>fragment</p>", "http://localhost:8000", 11);
        assert!(out.starts_with("<p>fragment</p>"));
        assert!(out.ends_with(r#"alt="" />"#));
    }

    #[test]
    fn test_first_capture_stored_as_object() {
        let folded = fold_capture(None, &capture());
        assert_eq!(folded["ip"], "203.0.113.9");
        assert!(folded.get("history").is_none());
    }

    #[test]
    fn test_repeat_captures_append_to_history() {
        let first = fold_capture(None, &capture());
        let second = fold_capture(Some(first), &capture());
        assert_eq!(second["ip"], "203.0.113.9");
        assert_eq!(second["history"].as_array().unwrap().len(), 1);

        let third = fold_capture(Some(second), &capture());
        assert_eq!(third["history"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_malformed_meta_is_replaced() {
        let folded = fold_capture(Some(json!("garbage")), &capture());
        assert_eq!(folded["ip"], "203.0.113.9");
        assert!(folded.get("history").is_none());
    }

    #[test]
    fn test_capture_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.1, 10.0.0.1".parse().unwrap());
        headers.insert("user-agent", "curl/8.0".parse().unwrap());
        let cap = OpenCapture::from_headers(&headers, Some("10.0.0.2".to_string()));
        assert_eq!(cap.ip.as_deref(), Some("198.51.100.1"));
        assert_eq!(cap.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn test_capture_falls_back_to_socket_ip() {
        let headers = HeaderMap::new();
        let cap = OpenCapture::from_headers(&headers, Some("10.0.0.2".to_string()));
        assert_eq!(cap.ip.as_deref(), Some("10.0.0.2"));
    }

    #[tokio::test]
    async fn test_extractor_reads_connect_info() {
        let request = axum::http::Request::builder()
            .uri("/emails/track/open/1.png")
            .header("user-agent", "curl/8.0")
            .extension(ConnectInfo(SocketAddr::from(([192, 0, 2, 4], 55211))))
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let cap = OpenCapture::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(cap.ip.as_deref(), Some("192.0.2.4"));
        assert_eq!(cap.user_agent.as_deref(), Some("curl/8.0"));
    }
}

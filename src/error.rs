use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// The main error type for mailroom handlers and services.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) | Self::Anyhow(_) | Self::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to expose to clients.
    ///
    /// Client errors (4xx) carry their message; server errors are reduced to
    /// a generic line so connection strings and query text never leak.
    fn safe_message(&self) -> String {
        match self {
            Self::NotFound(msg) => format!("Not found: {}", msg),
            Self::BadRequest(msg) => format!("Bad request: {}", msg),
            Self::Unauthorized(msg) => format!("Unauthorized: {}", msg),
            Self::Forbidden(msg) => format!("Forbidden: {}", msg),
            Self::Internal(_) | Self::Anyhow(_) => "Internal server error".to_string(),
            Self::Database(_) => "Database error".to_string(),
        }
    }
}

/// Standard error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    error_id: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_id = uuid::Uuid::new_v4().to_string();

        // Full detail stays server-side.
        tracing::error!(
            status = status.as_u16(),
            error_id = %error_id,
            error = %self,
            "Request failed"
        );

        let body = Json(ErrorResponse {
            error: self.safe_message(),
            error_id,
        });

        (status, body).into_response()
    }
}

/// Result type alias for mailroom handlers.
pub type Result<T> = std::result::Result<T, Error>;

impl From<sea_orm::DbErr> for Error {
    fn from(err: sea_orm::DbErr) -> Self {
        match &err {
            sea_orm::DbErr::RecordNotFound(msg) => Error::NotFound(if msg.is_empty() {
                "Record not found".to_string()
            } else {
                msg.clone()
            }),
            sea_orm::DbErr::Query(inner) => Error::Database(format!("Query error: {}", inner)),
            sea_orm::DbErr::Exec(inner) => Error::Database(format!("Execution error: {}", inner)),
            sea_orm::DbErr::Conn(inner) => Error::Database(format!("Connection error: {}", inner)),
            _ => Error::Database(format!("Database error: {}", err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Error::BadRequest(format!("JSON error: {}", err))
        } else {
            Error::Internal(format!("JSON serialization error: {}", err))
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Internal(format!("Upstream request error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Error::Unauthorized(format!("Invalid token: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_error() {
        let err = Error::bad_request("Invalid input");
        assert!(matches!(err, Error::BadRequest(_)));
        assert_eq!(err.to_string(), "Bad request: Invalid input");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_error() {
        let err = Error::not_found("Mailbox");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.safe_message(), "Not found: Mailbox");
    }

    #[test]
    fn test_unauthorized_error() {
        let err = Error::unauthorized("Token expired");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_safe_message_hides_server_details() {
        let err = Error::internal("db password is 'secret123'");
        assert_eq!(err.safe_message(), "Internal server error");

        let err = Error::Database("relation \"users\" does not exist".to_string());
        assert_eq!(err.safe_message(), "Database error");
    }

    #[test]
    fn test_db_err_record_not_found_maps_to_404() {
        let err: Error = sea_orm::DbErr::RecordNotFound("log 7".to_string()).into();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_into_response_status() {
        let response = Error::bad_request("nope").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = Error::internal("boom").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

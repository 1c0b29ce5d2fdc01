use crate::app::AppContext;
use crate::auth::jwt::verify_token;
use crate::error::Error;
use axum::{extract::FromRequestParts, http::request::Parts};

/// The authenticated caller, extracted from the `Authorization: Bearer`
/// header. Handlers that take this parameter reject unauthenticated
/// requests with 401 before any body work happens.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i32,
    pub username: String,
}

impl FromRequestParts<AppContext> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::unauthorized("Missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::unauthorized("Expected Bearer token"))?;

        let claims = verify_token(token, &ctx.config.auth.jwt_secret)?;

        Ok(CurrentUser {
            id: claims.sub,
            username: claims.username,
        })
    }
}

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use super::claims::{Role, SessionClaims};
use super::jwt::SessionKeys;
use super::SESSION_COOKIE;
use crate::error::ApiError;

/// Extracts a valid session credential from the `auth-token` cookie, falling
/// back to an `Authorization: Bearer` header for non-browser clients.
pub struct AuthSession(pub SessionClaims);

fn token_from_parts(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
    SessionKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = SessionKeys::from_ref(state);
        let token =
            token_from_parts(parts).ok_or(ApiError::Unauthorized("Authentication required"))?;
        match keys.verify(&token) {
            Some(claims) => Ok(AuthSession(claims)),
            None => {
                warn!("invalid or expired session credential");
                Err(ApiError::Unauthorized("Authentication required"))
            }
        }
    }
}

/// Like [`AuthSession`] but requires the ADMIN role or above.
pub struct AdminSession(pub SessionClaims);

#[async_trait]
impl<S> FromRequestParts<S> for AdminSession
where
    S: Send + Sync,
    SessionKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthSession(claims) = AuthSession::from_request_parts(parts, state).await?;
        if claims.role < Role::Admin {
            return Err(ApiError::Forbidden);
        }
        Ok(AdminSession(claims))
    }
}

use axum::Router;

use crate::state::AppState;

mod claims;
mod dto;
pub(crate) mod extractors;
pub mod guard;
pub mod handlers;
pub(crate) mod jwt;
pub(crate) mod password;
pub(crate) mod repo;
pub(crate) mod service;
pub(crate) mod tokens;

/// Name of the cookie carrying the signed session credential.
pub const SESSION_COOKIE: &str = "auth-token";

pub use claims::{Role, SessionClaims};

pub fn router() -> Router<AppState> {
    handlers::routes()
}

use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{info, instrument};

use super::dto::{
    ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse, PublicUser,
    RegisterRequest, RegisteredResponse, ResetPasswordRequest, VerifiedResponse, VerifyRequest,
};
use super::extractors::AuthSession;
use super::jwt::SessionKeys;
use super::repo::User;
use super::service::{self, is_valid_email, RegisterInput};
use super::SESSION_COOKIE;
use crate::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/verify", post(verify))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

#[instrument(skip(state, payload))]
async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisteredResponse>), ApiError> {
    if !is_valid_email(&payload.email) {
        return Err(ApiError::Validation("email: must be a valid address".into()));
    }
    if payload.password.len() < 8 {
        return Err(ApiError::Validation(
            "password: must be at least 8 characters".into(),
        ));
    }

    let user = service::register(
        &state,
        RegisterInput {
            email: payload.email,
            password: payload.password,
            first_name: payload.first_name,
            last_name: payload.last_name,
            phone: payload.phone,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisteredResponse {
            message: "User created successfully. Please check your email to verify your account.",
            user_id: user.id,
        }),
    ))
}

#[instrument(skip(state, payload))]
async fn verify(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<VerifiedResponse>, ApiError> {
    if payload.token.is_empty() {
        return Err(ApiError::Validation("token: must not be empty".into()));
    }

    let user = service::verify_email(&state, &payload.token).await?;
    Ok(Json(VerifiedResponse {
        message: "Email verified successfully",
        user: user.into(),
    }))
}

/// Always answers 200 with the same message so the endpoint never reveals
/// whether an account exists.
#[instrument(skip(state, payload))]
async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !is_valid_email(&payload.email) {
        return Err(ApiError::Validation("email: must be a valid address".into()));
    }

    service::request_password_reset(&state, &payload.email).await?;
    Ok(Json(MessageResponse {
        message: "If an account with that email exists, we have sent a password reset link.",
    }))
}

#[instrument(skip(state, payload))]
async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if payload.token.is_empty() {
        return Err(ApiError::Validation("token: must not be empty".into()));
    }
    if payload.password.len() < 8 {
        return Err(ApiError::Validation(
            "password: must be at least 8 characters".into(),
        ));
    }

    service::reset_password(&state, &payload.token, &payload.password).await?;
    Ok(Json(MessageResponse {
        message: "Password reset successfully",
    }))
}

#[instrument(skip(state, payload, jar))]
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    if !is_valid_email(&payload.email) {
        return Err(ApiError::Validation("email: must be a valid address".into()));
    }

    let user = service::authenticate(&state, &payload.email, &payload.password)
        .await?
        .ok_or(ApiError::Unauthorized("Invalid credentials"))?;

    let keys = SessionKeys::from_ref(&state);
    let token = keys
        .issue(user.id, &user.email, user.role)
        .map_err(ApiError::Unexpected)?;

    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(state.config.jwt.ttl_days))
        .build();

    info!(user_id = %user.id, "user logged in");
    Ok((jar.add(cookie), Json(LoginResponse { user: user.into() })))
}

#[instrument(skip(jar))]
async fn logout(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    let removal = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    (
        jar.remove(removal),
        Json(MessageResponse {
            message: "Logged out",
        }),
    )
}

#[instrument(skip(state, session))]
async fn me(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<Json<PublicUser>, ApiError> {
    let user = User::find_by_id(&state.db, session.0.sub)
        .await
        .map_err(ApiError::Unexpected)?
        .ok_or(ApiError::Unauthorized("Authentication required"))?;
    Ok(Json(user.into()))
}

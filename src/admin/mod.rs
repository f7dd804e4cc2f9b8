use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::auth::extractors::AdminSession;
use crate::auth::repo::User;
use crate::auth::Role;
use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/admin/users", get(list_users))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserRow {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Role,
    pub email_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[instrument(skip(state, _session))]
async fn list_users(
    State(state): State<AppState>,
    _session: AdminSession,
) -> Result<Json<Vec<AdminUserRow>>, ApiError> {
    let users = User::list(&state.db).await.map_err(ApiError::Unexpected)?;
    let rows = users
        .into_iter()
        .map(|u| AdminUserRow {
            id: u.id,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
            role: u.role,
            email_verified: u.email_verified,
            created_at: u.created_at,
        })
        .collect();
    Ok(Json(rows))
}

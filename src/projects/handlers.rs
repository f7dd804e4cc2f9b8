use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{
    DownloadUrlResponse, MediaItem, MessageResponse, ProjectDetail, ProjectSummary,
    RegisterMediaRequest, ShareRequest, UploadUrlRequest, UploadUrlResponse,
};
use super::repo::{Media, NewMedia, Project};
use crate::auth::extractors::AuthSession;
use crate::auth::repo::User;
use crate::auth::service::is_valid_email;
use crate::auth::tokens::generate_token;
use crate::error::ApiError;
use crate::state::AppState;

/// Default validity of a presigned upload or download grant.
const PRESIGN_TTL_SECS: u64 = 300;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id/media/upload-url", post(upload_url))
        .route("/projects/:id/media", post(register_media))
        .route(
            "/projects/:id/media/:media_id/download-url",
            get(download_url),
        )
        .route("/projects/:id/media/:media_id", delete(delete_media))
        .route("/projects/:id/share", post(share_project))
}

#[instrument(skip(state, session))]
async fn list_projects(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<Json<Vec<ProjectSummary>>, ApiError> {
    let rows = Project::list_visible(&state.db, session.0.sub, &session.0.email)
        .await
        .map_err(ApiError::Unexpected)?;
    let projects = rows
        .into_iter()
        .map(|p| ProjectSummary {
            id: p.id,
            name: p.name,
            description: p.description,
            media_count: p.media_count,
            created_at: p.created_at,
        })
        .collect();
    Ok(Json(projects))
}

#[instrument(skip(state, session))]
async fn get_project(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectDetail>, ApiError> {
    let project = Project::find_visible(&state.db, id, session.0.sub, &session.0.email)
        .await
        .map_err(ApiError::Unexpected)?
        .ok_or(ApiError::NotFound)?;
    let media = Media::list_for_project(&state.db, project.id)
        .await
        .map_err(ApiError::Unexpected)?;

    Ok(Json(ProjectDetail {
        id: project.id,
        name: project.name,
        description: project.description,
        created_at: project.created_at,
        media: media.into_iter().map(MediaItem::from).collect(),
    }))
}

/// Storage key for a fresh upload: `<project>/<millis>-<filename>`.
fn object_key(project_id: Uuid, now_millis: i128, filename: &str) -> String {
    format!("{}/{}-{}", project_id, now_millis, filename)
}

fn validate_filename(filename: &str) -> Result<(), ApiError> {
    if filename.is_empty() {
        return Err(ApiError::Validation("filename: must not be empty".into()));
    }
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(ApiError::Validation(
            "filename: must not contain path separators".into(),
        ));
    }
    Ok(())
}

fn validate_media_registration(payload: &RegisterMediaRequest) -> Result<(), ApiError> {
    validate_filename(&payload.filename)?;
    if payload.content_type.is_empty() {
        return Err(ApiError::Validation("contentType: must not be empty".into()));
    }
    if payload.size_bytes < 0 {
        return Err(ApiError::Validation("sizeBytes: must not be negative".into()));
    }
    Ok(())
}

/// Issues a time-limited PUT grant for direct-to-storage upload. Requires
/// project ownership; the storage layer itself performs no access check.
#[instrument(skip(state, session, payload))]
async fn upload_url(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<UploadUrlRequest>,
) -> Result<Json<UploadUrlResponse>, ApiError> {
    validate_filename(&payload.filename)?;
    if payload.content_type.is_empty() {
        return Err(ApiError::Validation("contentType: must not be empty".into()));
    }

    let project = Project::find_owned(&state.db, id, session.0.sub)
        .await
        .map_err(ApiError::Unexpected)?
        .ok_or(ApiError::NotFound)?;

    let now_millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let key = object_key(project.id, now_millis, &payload.filename);
    let upload_url = state
        .storage
        .presign_put(&key, &payload.content_type, PRESIGN_TTL_SECS)
        .await
        .map_err(ApiError::Unexpected)?;

    info!(project_id = %project.id, key = %key, "upload grant issued");
    Ok(Json(UploadUrlResponse { upload_url, key }))
}

/// Records a completed upload. The object must already exist in storage.
#[instrument(skip(state, session, payload))]
async fn register_media(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<RegisterMediaRequest>,
) -> Result<Json<MediaItem>, ApiError> {
    validate_media_registration(&payload)?;
    if !payload.key.starts_with(&format!("{}/", id)) {
        return Err(ApiError::Validation(
            "key: does not belong to this project".into(),
        ));
    }

    let project = Project::find_owned(&state.db, id, session.0.sub)
        .await
        .map_err(ApiError::Unexpected)?
        .ok_or(ApiError::NotFound)?;

    let exists = state
        .storage
        .object_exists(&payload.key)
        .await
        .map_err(ApiError::Unexpected)?;
    if !exists {
        warn!(key = %payload.key, "media registration for missing object");
        return Err(ApiError::Validation("key: object has not been uploaded".into()));
    }

    let media = Media::insert(
        &state.db,
        NewMedia {
            project_id: project.id,
            filename: &payload.filename,
            s3_key: &payload.key,
            content_type: &payload.content_type,
            size_bytes: payload.size_bytes,
            duration_seconds: payload.duration_seconds,
        },
    )
    .await
    .map_err(ApiError::Unexpected)?;

    Ok(Json(media.into()))
}

#[instrument(skip(state, session))]
async fn download_url(
    State(state): State<AppState>,
    session: AuthSession,
    Path((id, media_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DownloadUrlResponse>, ApiError> {
    let project = Project::find_visible(&state.db, id, session.0.sub, &session.0.email)
        .await
        .map_err(ApiError::Unexpected)?
        .ok_or(ApiError::NotFound)?;
    let media = Media::find_in_project(&state.db, media_id, project.id)
        .await
        .map_err(ApiError::Unexpected)?
        .ok_or(ApiError::NotFound)?;

    let download_url = state
        .storage
        .presign_get(&media.s3_key, PRESIGN_TTL_SECS)
        .await
        .map_err(ApiError::Unexpected)?;
    Ok(Json(DownloadUrlResponse { download_url }))
}

#[instrument(skip(state, session))]
async fn delete_media(
    State(state): State<AppState>,
    session: AuthSession,
    Path((id, media_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let project = Project::find_owned(&state.db, id, session.0.sub)
        .await
        .map_err(ApiError::Unexpected)?
        .ok_or(ApiError::NotFound)?;
    let media = Media::find_in_project(&state.db, media_id, project.id)
        .await
        .map_err(ApiError::Unexpected)?
        .ok_or(ApiError::NotFound)?;

    state
        .storage
        .delete_object(&media.s3_key)
        .await
        .map_err(ApiError::Unexpected)?;
    Media::delete_in_project(&state.db, media.id, project.id)
        .await
        .map_err(ApiError::Unexpected)?;

    info!(project_id = %project.id, media_id = %media.id, "media deleted");
    Ok(Json(MessageResponse {
        message: "Media deleted",
    }))
}

/// Invite an email address to view a project; resending replaces the token.
#[instrument(skip(state, session, payload))]
async fn share_project(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<ShareRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !is_valid_email(&payload.email) {
        return Err(ApiError::Validation("email: must be a valid address".into()));
    }

    let project = Project::find_owned(&state.db, id, session.0.sub)
        .await
        .map_err(ApiError::Unexpected)?
        .ok_or(ApiError::NotFound)?;

    let inviter = User::find_by_id(&state.db, session.0.sub)
        .await
        .map_err(ApiError::Unexpected)?
        .ok_or(ApiError::Unauthorized("Authentication required"))?;

    let token = generate_token();
    Project::insert_share(&state.db, project.id, &payload.email, inviter.id, &token)
        .await
        .map_err(ApiError::Unexpected)?;

    state
        .mailer
        .send_project_invitation(&payload.email, &project.name, &inviter.display_name(), &token)
        .await
        .map_err(ApiError::Unexpected)?;

    info!(project_id = %project.id, "project shared");
    Ok(Json(MessageResponse {
        message: "Invitation sent",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_shape() {
        let project_id = Uuid::new_v4();
        let key = object_key(project_id, 1724900000000, "a.jpg");
        assert_eq!(key, format!("{}/1724900000000-a.jpg", project_id));
    }

    #[test]
    fn filename_validation() {
        assert!(validate_filename("roof-4k.mp4").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("../../etc/passwd").is_err());
        assert!(validate_filename("dir/file.jpg").is_err());
    }

    #[test]
    fn media_registration_validation() {
        let payload = |content_type: &str, size_bytes: i64| RegisterMediaRequest {
            key: "p1/123-roof-4k.mp4".into(),
            filename: "roof-4k.mp4".into(),
            content_type: content_type.into(),
            size_bytes,
            duration_seconds: None,
        };

        assert!(validate_media_registration(&payload("video/mp4", 1024)).is_ok());
        assert!(validate_media_registration(&payload("video/mp4", 0)).is_ok());
        assert!(matches!(
            validate_media_registration(&payload("", 1024)).unwrap_err(),
            ApiError::Validation(msg) if msg.starts_with("contentType")
        ));
        assert!(matches!(
            validate_media_registration(&payload("video/mp4", -1)).unwrap_err(),
            ApiError::Validation(msg) if msg.starts_with("sizeBytes")
        ));
    }

    #[tokio::test]
    async fn fake_storage_presign_carries_key() {
        let state = AppState::fake();
        let url = state
            .storage
            .presign_put("p1/123-a.jpg", "image/jpeg", PRESIGN_TTL_SECS)
            .await
            .unwrap();
        assert!(url.contains("p1/123-a.jpg"));

        let url = state.storage.presign_get("p1/123-a.jpg", 300).await.unwrap();
        assert!(url.contains("p1/123-a.jpg"));
    }
}

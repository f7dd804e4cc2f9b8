use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};

use super::password::{hash_password, verify_password};
use super::repo::{NewUser, User};
use super::tokens::generate_token;
use crate::error::ApiError;
use crate::state::AppState;

pub const VERIFY_TOKEN_TTL: Duration = Duration::hours(24);
pub const RESET_TOKEN_TTL: Duration = Duration::hours(1);

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

lazy_static! {
    /// Verified on the absent-user path so a lookup miss costs the same
    /// argon2 work as a wrong password.
    static ref TIMING_PAD_HASH: String = hash_password("timing-pad").unwrap_or_default();
}

/// Postgres unique-violation on insert means the email was taken between the
/// precheck and the insert; same outcome as the precheck.
fn duplicate_or_unexpected(e: anyhow::Error) -> ApiError {
    if let Some(sqlx::Error::Database(db)) = e.downcast_ref::<sqlx::Error>() {
        if db.code().as_deref() == Some("23505") {
            return ApiError::DuplicateUser;
        }
    }
    ApiError::Unexpected(e)
}

pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

/// Create an unverified user and send the verification mail.
pub async fn register(st: &AppState, input: RegisterInput) -> Result<User, ApiError> {
    if User::find_by_email(&st.db, &input.email)
        .await
        .map_err(ApiError::Unexpected)?
        .is_some()
    {
        warn!(email = %input.email, "registration with existing email");
        return Err(ApiError::DuplicateUser);
    }

    let password_hash = hash_password(&input.password).map_err(ApiError::Unexpected)?;
    let verify_token = generate_token();
    let verify_expires = OffsetDateTime::now_utc() + VERIFY_TOKEN_TTL;

    let user = User::create(
        &st.db,
        NewUser {
            email: &input.email,
            password_hash: &password_hash,
            first_name: input.first_name.as_deref(),
            last_name: input.last_name.as_deref(),
            phone: input.phone.as_deref(),
            verify_token: &verify_token,
            verify_expires,
        },
    )
    .await
    .map_err(duplicate_or_unexpected)?;

    st.mailer
        .send_verification(&user.email, &verify_token)
        .await
        .map_err(ApiError::Unexpected)?;

    info!(user_id = %user.id, "user registered");
    Ok(user)
}

/// Consume an email-verification token. One outcome for expired, unknown and
/// already-consumed tokens.
pub async fn verify_email(st: &AppState, token: &str) -> Result<User, ApiError> {
    match User::consume_verify_token(&st.db, token).await? {
        Some(user) => {
            info!(user_id = %user.id, "email verified");
            Ok(user)
        }
        None => Err(ApiError::InvalidOrExpiredToken),
    }
}

/// Set a reset token and send the reset mail. Silently no-ops for unknown
/// emails so the endpoint never reveals account existence; a mail delivery
/// failure is logged but still answered generically for the same reason.
pub async fn request_password_reset(st: &AppState, email: &str) -> Result<(), ApiError> {
    let Some(user) = User::find_by_email(&st.db, email)
        .await
        .map_err(ApiError::Unexpected)?
    else {
        debug!("password reset requested for unknown email");
        return Ok(());
    };

    let token = generate_token();
    let expires = OffsetDateTime::now_utc() + RESET_TOKEN_TTL;
    User::set_reset_token(&st.db, user.id, &token, expires)
        .await
        .map_err(ApiError::Unexpected)?;

    if let Err(e) = st.mailer.send_password_reset(&user.email, &token).await {
        error!(error = %e, user_id = %user.id, "password reset mail failed");
        return Ok(());
    }

    info!(user_id = %user.id, "password reset requested");
    Ok(())
}

/// Consume a reset token and replace the password hash.
pub async fn reset_password(st: &AppState, token: &str, new_password: &str) -> Result<User, ApiError> {
    let password_hash = hash_password(new_password).map_err(ApiError::Unexpected)?;
    match User::consume_reset_token(&st.db, token, &password_hash).await? {
        Some(user) => {
            info!(user_id = %user.id, "password reset");
            Ok(user)
        }
        None => Err(ApiError::InvalidOrExpiredToken),
    }
}

/// `None` for absent user, unverified user and wrong password alike; the
/// caller cannot tell the three apart, and all three paths pay for one
/// argon2 verification.
pub async fn authenticate(
    st: &AppState,
    email: &str,
    password: &str,
) -> Result<Option<User>, ApiError> {
    let Some(user) = User::find_by_email(&st.db, email)
        .await
        .map_err(ApiError::Unexpected)?
    else {
        let _ = verify_password(password, &TIMING_PAD_HASH);
        return Ok(None);
    };

    let ok = verify_password(password, &user.password_hash).map_err(ApiError::Unexpected)?;
    if !user.email_verified || !ok {
        return Ok(None);
    }

    Ok(Some(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("client@example.com"));
        assert!(is_valid_email("a.b+c@sub.domain.io"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@nodot"));
    }

    #[test]
    fn token_ttls() {
        assert_eq!(VERIFY_TOKEN_TTL, Duration::hours(24));
        assert_eq!(RESET_TOKEN_TTL, Duration::hours(1));
    }

    #[test]
    fn timing_pad_hash_is_a_real_hash() {
        assert!(!verify_password("anything", &TIMING_PAD_HASH).expect("pad hash parses"));
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use std::sync::Arc;

    use sqlx::PgPool;
    use uuid::Uuid;

    use super::*;
    use crate::state::test_support::{fake_config, FailingMailer, FakeStorage};

    const PASSWORD: &str = "hunter2hunter2";

    fn input(email: &str) -> RegisterInput {
        RegisterInput {
            email: email.into(),
            password: PASSWORD.into(),
            first_name: None,
            last_name: None,
            phone: None,
        }
    }

    async fn verify_token_of(st: &AppState, id: Uuid) -> String {
        sqlx::query_scalar::<_, Option<String>>(
            "SELECT email_verify_token FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&st.db)
        .await
        .unwrap()
        .expect("pending verification token")
    }

    async fn reset_token_of(st: &AppState, id: Uuid) -> String {
        sqlx::query_scalar::<_, Option<String>>("SELECT reset_token FROM users WHERE id = $1")
            .bind(id)
            .fetch_one(&st.db)
            .await
            .unwrap()
            .expect("pending reset token")
    }

    #[sqlx::test]
    async fn authenticate_requires_verified_email(pool: PgPool) {
        let st = AppState::fake_with_pool(pool);
        let user = register(&st, input("client@example.com")).await.unwrap();
        assert!(!user.email_verified);

        // Correct credentials but unverified: collapsed to None.
        assert!(authenticate(&st, "client@example.com", PASSWORD)
            .await
            .unwrap()
            .is_none());

        let token = verify_token_of(&st, user.id).await;
        let verified = verify_email(&st, &token).await.unwrap();
        assert!(verified.email_verified);
        assert!(verified.email_verify_expires.is_none());

        let authed = authenticate(&st, "client@example.com", PASSWORD)
            .await
            .unwrap()
            .expect("verified login");
        assert_eq!(authed.id, user.id);

        // Wrong password and unknown email collapse the same way.
        assert!(authenticate(&st, "client@example.com", "wrong-password")
            .await
            .unwrap()
            .is_none());
        assert!(authenticate(&st, "ghost@example.com", PASSWORD)
            .await
            .unwrap()
            .is_none());
    }

    #[sqlx::test]
    async fn verification_token_cannot_be_replayed(pool: PgPool) {
        let st = AppState::fake_with_pool(pool);
        let user = register(&st, input("client@example.com")).await.unwrap();
        let token = verify_token_of(&st, user.id).await;

        verify_email(&st, &token).await.unwrap();
        assert!(matches!(
            verify_email(&st, &token).await.unwrap_err(),
            ApiError::InvalidOrExpiredToken
        ));
        assert!(matches!(
            verify_email(&st, "no-such-token").await.unwrap_err(),
            ApiError::InvalidOrExpiredToken
        ));
    }

    #[sqlx::test]
    async fn reset_token_is_single_use(pool: PgPool) {
        let st = AppState::fake_with_pool(pool);
        let user = register(&st, input("client@example.com")).await.unwrap();
        let token = verify_token_of(&st, user.id).await;
        verify_email(&st, &token).await.unwrap();

        request_password_reset(&st, "client@example.com").await.unwrap();
        let reset = reset_token_of(&st, user.id).await;
        reset_password(&st, &reset, "brand-new-password").await.unwrap();

        // Old password dead, new one live.
        assert!(authenticate(&st, "client@example.com", PASSWORD)
            .await
            .unwrap()
            .is_none());
        assert!(authenticate(&st, "client@example.com", "brand-new-password")
            .await
            .unwrap()
            .is_some());

        // A consumed token is gone for good.
        assert!(matches!(
            reset_password(&st, &reset, "yet-another-pass").await.unwrap_err(),
            ApiError::InvalidOrExpiredToken
        ));
    }

    #[sqlx::test]
    async fn reset_request_is_uniform_for_unknown_email_and_mail_outage(pool: PgPool) {
        let st = AppState::fake_with_pool(pool.clone());
        let user = register(&st, input("client@example.com")).await.unwrap();

        // Unknown email: same Ok(()) as a real one.
        request_password_reset(&st, "ghost@example.com").await.unwrap();

        // SMTP down: still Ok(()), nothing leaks to the caller.
        let down = AppState::from_parts(
            pool,
            fake_config(),
            Arc::new(FakeStorage),
            Arc::new(FailingMailer),
        );
        request_password_reset(&down, "client@example.com").await.unwrap();

        // The token was still set, so the flow recovers once mail is back.
        assert!(!reset_token_of(&st, user.id).await.is_empty());
    }

    #[sqlx::test]
    async fn racing_duplicate_insert_maps_to_duplicate_user(pool: PgPool) {
        let st = AppState::fake_with_pool(pool);
        register(&st, input("client@example.com")).await.unwrap();

        // Precheck path.
        assert!(matches!(
            register(&st, input("client@example.com")).await.unwrap_err(),
            ApiError::DuplicateUser
        ));

        // Insert path: a unique violation that slipped past the precheck.
        let err = User::create(
            &st.db,
            NewUser {
                email: "client@example.com",
                password_hash: "irrelevant",
                first_name: None,
                last_name: None,
                phone: None,
                verify_token: "another-token",
                verify_expires: OffsetDateTime::now_utc() + VERIFY_TOKEN_TTL,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(duplicate_or_unexpected(err), ApiError::DuplicateUser));
    }
}

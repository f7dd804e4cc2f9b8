use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::claims::Role;

/// User record. Verification and reset tokens live here with their expiries;
/// both are cleared the moment they are consumed so they cannot be replayed.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub role: Role,
    pub email_verified: bool,
    #[serde(skip_serializing)]
    pub email_verify_token: Option<String>,
    pub email_verify_expires: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub reset_token: Option<String>,
    pub reset_expires: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub verify_token: &'a str,
    pub verify_expires: OffsetDateTime,
}

impl User {
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, first_name, last_name, phone, role,
                   email_verified, email_verify_token, email_verify_expires,
                   reset_token, reset_expires, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, first_name, last_name, phone, role,
                   email_verified, email_verify_token, email_verify_expires,
                   reset_token, reset_expires, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Insert a new unverified user with a pending verification token.
    pub async fn create(db: &PgPool, new: NewUser<'_>) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, first_name, last_name, phone,
                               email_verify_token, email_verify_expires)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, email, password_hash, first_name, last_name, phone, role,
                      email_verified, email_verify_token, email_verify_expires,
                      reset_token, reset_expires, created_at
            "#,
        )
        .bind(new.email)
        .bind(new.password_hash)
        .bind(new.first_name)
        .bind(new.last_name)
        .bind(new.phone)
        .bind(new.verify_token)
        .bind(new.verify_expires)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Mark the holder of an unexpired verification token as verified and
    /// clear the token. The conditional UPDATE keyed on the token value is
    /// what makes consumption atomic and replay-proof.
    pub async fn consume_verify_token(db: &PgPool, token: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET email_verified = TRUE, email_verify_token = NULL, email_verify_expires = NULL
            WHERE email_verify_token = $1 AND email_verify_expires > now()
            RETURNING id, email, password_hash, first_name, last_name, phone, role,
                      email_verified, email_verify_token, email_verify_expires,
                      reset_token, reset_expires, created_at
            "#,
        )
        .bind(token)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn set_reset_token(
        db: &PgPool,
        id: Uuid,
        token: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET reset_token = $2, reset_expires = $3 WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expires)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Replace the password hash for the holder of an unexpired reset token
    /// and clear the token, in one conditional UPDATE.
    pub async fn consume_reset_token(
        db: &PgPool,
        token: &str,
        new_password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET password_hash = $2, reset_token = NULL, reset_expires = NULL
            WHERE reset_token = $1 AND reset_expires > now()
            RETURNING id, email, password_hash, first_name, last_name, phone, role,
                      email_verified, email_verify_token, email_verify_expires,
                      reset_token, reset_expires, created_at
            "#,
        )
        .bind(token)
        .bind(new_password_hash)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, first_name, last_name, phone, role,
                   email_verified, email_verify_token, email_verify_expires,
                   reset_token, reset_expires, created_at
            FROM users
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(db)
        .await?;
        Ok(users)
    }

    /// Display name used in outgoing invitations.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => format!("{} {}", f, l),
            (Some(f), None) => f.clone(),
            _ => self.email.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "client@example.com".into(),
            password_hash: "secret-hash".into(),
            first_name: None,
            last_name: None,
            phone: None,
            role: Role::User,
            email_verified: false,
            email_verify_token: Some("tok".into()),
            email_verify_expires: Some(OffsetDateTime::now_utc()),
            reset_token: None,
            reset_expires: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn serialization_never_leaks_hash_or_tokens() {
        let json = serde_json::to_string(&sample_user()).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("email_verify_token"));
        assert!(!json.contains("reset_token"));
    }

    #[test]
    fn display_name_falls_back_to_email() {
        let mut user = sample_user();
        assert_eq!(user.display_name(), "client@example.com");
        user.first_name = Some("Ana".into());
        assert_eq!(user.display_name(), "Ana");
        user.last_name = Some("Reyes".into());
        assert_eq!(user.display_name(), "Ana Reyes");
    }
}

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::User;

const USER_COLUMNS: &str = "id, name, email, phone_number, password_hash, google_subject, \
     avatar_url, role, provider, is_active, reset_token_id, reset_token_hash, \
     reset_token_expires_at, last_login, created_at, updated_at";

impl User {
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_email(db: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_google_subject(
        db: &PgPool,
        subject: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE google_subject = $1"
        ))
        .bind(subject)
        .fetch_optional(db)
        .await
    }

    /// Best-effort pre-insert check; the unique index is the real guarantee.
    pub async fn exists_by_email(db: &PgPool, email: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(db)
            .await
    }

    pub async fn exists_by_phone(db: &PgPool, phone: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE phone_number = $1)")
            .bind(phone)
            .fetch_one(db)
            .await
    }

    pub async fn create_local(
        db: &PgPool,
        name: &str,
        email: &str,
        phone_number: Option<&str>,
        password_hash: &str,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, phone_number, password_hash, provider) \
             VALUES ($1, $2, $3, $4, 'LOCAL') \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(name)
        .bind(email)
        .bind(phone_number)
        .bind(password_hash)
        .fetch_one(db)
        .await
    }

    /// Google-provider users carry no password.
    pub async fn create_google(
        db: &PgPool,
        name: &str,
        email: &str,
        subject: &str,
        avatar_url: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, google_subject, avatar_url, provider, last_login) \
             VALUES ($1, $2, $3, $4, 'GOOGLE', now()) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(name)
        .bind(email)
        .bind(subject)
        .bind(avatar_url)
        .fetch_one(db)
        .await
    }

    /// Backfill the Google subject and avatar on an existing account and mark
    /// it GOOGLE. One-way link: a LOCAL account keeps its password and gains
    /// Google sign-in.
    pub async fn link_google(
        db: &PgPool,
        id: Uuid,
        subject: &str,
        avatar_url: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET \
                 google_subject = COALESCE(google_subject, $2), \
                 avatar_url = COALESCE(avatar_url, $3), \
                 provider = 'GOOGLE', \
                 updated_at = now() \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(subject)
        .bind(avatar_url)
        .fetch_one(db)
        .await
    }

    pub async fn stamp_last_login(db: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn set_password(db: &PgPool, id: Uuid, hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(hash)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Replaces any pending reset credential; at most one is live per user.
    pub async fn set_reset_token(
        db: &PgPool,
        id: Uuid,
        token_id: &str,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET reset_token_id = $2, reset_token_hash = $3, \
                 reset_token_expires_at = $4, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(token_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn find_by_reset_token_id(
        db: &PgPool,
        token_id: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE reset_token_id = $1"
        ))
        .bind(token_id)
        .fetch_optional(db)
        .await
    }

    /// Sets the new hash and clears the reset credential in one statement so
    /// a redeemed token can never be replayed.
    pub async fn reset_password(db: &PgPool, id: Uuid, hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET password_hash = $2, reset_token_id = NULL, \
                 reset_token_hash = NULL, reset_token_expires_at = NULL, \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(hash)
        .execute(db)
        .await?;
        Ok(())
    }
}

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::rngs::OsRng;
use rand::RngCore;
use sqlx::{FromRow, PgPool};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, TokenError};

const TOKEN_COLUMNS: &str = "id, token, user_id, expires_at, created_by_ip, \
     revoked_at, revoked_by_ip, replaced_by_token, created_at";

/// One row per issued refresh token. Rows are never mutated except to set the
/// revocation fields; a rotation inserts a new row and links the old one to it
/// through `replaced_by_token`, preserving an auditable chain.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: OffsetDateTime,
    pub created_by_ip: String,
    pub revoked_at: Option<OffsetDateTime>,
    pub revoked_by_ip: Option<String>,
    pub replaced_by_token: Option<String>,
    pub created_at: OffsetDateTime,
}

impl RefreshToken {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    pub fn is_valid(&self, now: OffsetDateTime) -> bool {
        self.is_active() && !self.is_expired(now)
    }

    pub async fn create(
        db: &PgPool,
        user_id: Uuid,
        ttl_days: i64,
        ip: &str,
    ) -> Result<RefreshToken, sqlx::Error> {
        Self::insert(db, user_id, ttl_days, ip).await
    }

    async fn insert<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        user_id: Uuid,
        ttl_days: i64,
        ip: &str,
    ) -> Result<RefreshToken, sqlx::Error> {
        let token = generate_token_value();
        let expires_at = OffsetDateTime::now_utc() + Duration::days(ttl_days);
        sqlx::query_as::<_, RefreshToken>(&format!(
            "INSERT INTO refresh_tokens (token, user_id, expires_at, created_by_ip) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .bind(ip)
        .fetch_one(executor)
        .await
    }

    pub async fn find(db: &PgPool, token: &str) -> Result<Option<RefreshToken>, sqlx::Error> {
        sqlx::query_as::<_, RefreshToken>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(db)
        .await
    }

    pub async fn find_all_for_user(
        db: &PgPool,
        user_id: Uuid,
    ) -> Result<Vec<RefreshToken>, sqlx::Error> {
        sqlx::query_as::<_, RefreshToken>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(db)
        .await
    }

    /// Not found, revoked and expired are distinct failures, checked in that
    /// order. Only a record passing all three is usable.
    pub async fn validate(db: &PgPool, token: &str) -> Result<RefreshToken, ApiError> {
        let record = Self::find(db, token).await?.ok_or(TokenError::NotFound)?;
        if !record.is_active() {
            return Err(TokenError::Revoked.into());
        }
        if record.is_expired(OffsetDateTime::now_utc()) {
            return Err(TokenError::Expired.into());
        }
        Ok(record)
    }

    /// Replaces `old_token` with a fresh record for the same owner.
    ///
    /// The insert and the revocation of the old row run in one transaction,
    /// and the revocation is a compare-and-set on `revoked_at IS NULL`, so two
    /// concurrent rotations of the same token have exactly one winner; the
    /// loser sees `Revoked`.
    ///
    /// Presenting an already-revoked token here is treated as a theft signal:
    /// every descendant reachable through the replacement chain is revoked
    /// before the error is returned, forcing a fresh login.
    pub async fn rotate(
        db: &PgPool,
        old_token: &str,
        ttl_days: i64,
        ip: &str,
    ) -> Result<RefreshToken, ApiError> {
        let old = match Self::validate(db, old_token).await {
            Ok(record) => record,
            Err(err) => {
                if matches!(err, ApiError::Token(TokenError::Revoked)) {
                    if let Some(stale) = Self::find(db, old_token).await? {
                        warn!(user_id = %stale.user_id, "revoked refresh token presented, revoking chain");
                        Self::revoke_descendants(db, &stale, ip).await?;
                    }
                }
                return Err(err);
            }
        };

        let mut tx = db.begin().await.map_err(ApiError::from)?;
        let new = Self::insert(&mut *tx, old.user_id, ttl_days, ip).await?;
        let updated = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now(), revoked_by_ip = $2, \
                 replaced_by_token = $3 \
             WHERE token = $1 AND revoked_at IS NULL",
        )
        .bind(old_token)
        .bind(ip)
        .bind(&new.token)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            // A concurrent rotation won the CAS; drop our replacement row.
            tx.rollback().await.ok();
            return Err(TokenError::Revoked.into());
        }
        tx.commit().await.map_err(ApiError::from)?;

        info!(user_id = %old.user_id, "refresh token rotated");
        Ok(new)
    }

    /// Revokes every descendant of a reused token. The whole family lives
    /// under one `user_id`, so one fetch plus the pure chain walk is enough,
    /// and the revocation lands in a single statement.
    async fn revoke_descendants(
        db: &PgPool,
        start: &RefreshToken,
        ip: &str,
    ) -> Result<(), sqlx::Error> {
        let family = Self::find_all_for_user(db, start.user_id).await?;
        let chain = collect_descendants(&family, &start.token);
        if chain.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now(), revoked_by_ip = $2 \
             WHERE token = ANY($1) AND revoked_at IS NULL",
        )
        .bind(&chain)
        .bind(ip)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Idempotent: revoking a missing or already-revoked token is a no-op, so
    /// logout can always answer 200.
    pub async fn revoke(db: &PgPool, token: &str, ip: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now(), revoked_by_ip = $2 \
             WHERE token = $1 AND revoked_at IS NULL",
        )
        .bind(token)
        .bind(ip)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Revokes every active token for a user. Used by logout-all, password
    /// change and password reset; takes effect on the very next request since
    /// token validity is never cached in-process.
    pub async fn revoke_all(db: &PgPool, user_id: Uuid, ip: &str) -> Result<u64, sqlx::Error> {
        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now(), revoked_by_ip = $2 \
             WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .bind(ip)
        .execute(db)
        .await?
        .rows_affected();
        info!(user_id = %user_id, revoked, "revoked all refresh tokens");
        Ok(revoked)
    }

    /// Hygiene sweep for long-expired rows; not load-bearing for correctness.
    pub async fn delete_expired(db: &PgPool) -> Result<u64, sqlx::Error> {
        let deleted = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < now()")
            .execute(db)
            .await?
            .rows_affected();
        if deleted > 0 {
            info!(deleted, "swept expired refresh tokens");
        }
        Ok(deleted)
    }
}

/// Token values reachable from `start_token` through `replaced_by_token`,
/// in chain order. The start token itself is never part of the result. Stops
/// at a missing link and refuses to revisit a token, so corrupt data cannot
/// loop it.
pub(crate) fn collect_descendants(family: &[RefreshToken], start_token: &str) -> Vec<String> {
    let mut chain: Vec<String> = Vec::new();
    let mut next = family
        .iter()
        .find(|t| t.token == start_token)
        .and_then(|t| t.replaced_by_token.clone());
    while let Some(token) = next {
        if token == start_token || chain.iter().any(|seen| *seen == token) {
            break;
        }
        let Some(record) = family.iter().find(|t| t.token == token) else {
            break;
        };
        chain.push(record.token.clone());
        next = record.replaced_by_token.clone();
    }
    chain
}

/// 48 bytes of OS entropy, URL-safe base64 without padding. Uniqueness is
/// enforced by the database index, not by a presence check.
pub fn generate_token_value() -> String {
    let mut bytes = [0u8; 48];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

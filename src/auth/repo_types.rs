use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "user_role", rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "auth_provider", rename_all = "UPPERCASE")]
pub enum Provider {
    Local,
    Google,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Local => "LOCAL",
            Provider::Google => "GOOGLE",
        }
    }
}

/// User record in the database.
///
/// A LOCAL-provider user always carries a password hash; a GOOGLE-provider
/// user may have none. The reset_token columns hold at most one live
/// password-reset credential: a non-secret lookup id plus the Argon2 hash of
/// the secret half.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub password_hash: Option<String>,
    pub google_subject: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub provider: Provider,
    pub is_active: bool,
    pub reset_token_id: Option<String>,
    pub reset_token_hash: Option<String>,
    pub reset_token_expires_at: Option<OffsetDateTime>,
    pub last_login: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn is_local(&self) -> bool {
        self.provider == Provider::Local
    }

    /// True while an unexpired reset credential is pending.
    pub fn reset_token_valid(&self, now: OffsetDateTime) -> bool {
        self.reset_token_hash.is_some()
            && self
                .reset_token_expires_at
                .map(|exp| now < exp)
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn user() -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            name: "Mai".into(),
            email: Some("mai@example.com".into()),
            phone_number: None,
            password_hash: Some("$argon2id$fake".into()),
            google_subject: None,
            avatar_url: None,
            role: Role::User,
            provider: Provider::Local,
            is_active: true,
            reset_token_id: None,
            reset_token_hash: None,
            reset_token_expires_at: None,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn reset_token_invalid_when_absent() {
        assert!(!user().reset_token_valid(OffsetDateTime::now_utc()));
    }

    #[test]
    fn reset_token_validity_respects_expiry() {
        let now = OffsetDateTime::now_utc();
        let mut u = user();
        u.reset_token_id = Some("abc".into());
        u.reset_token_hash = Some("$argon2id$fake".into());
        u.reset_token_expires_at = Some(now + Duration::minutes(10));
        assert!(u.reset_token_valid(now));
        assert!(!u.reset_token_valid(now + Duration::minutes(11)));
    }

    #[test]
    fn role_and_provider_serialize_uppercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"ADMIN\"");
        assert_eq!(
            serde_json::to_string(&Provider::Google).unwrap(),
            "\"GOOGLE\""
        );
    }
}

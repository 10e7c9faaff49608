use std::time::Duration;

use axum::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::GoogleConfig;
use crate::error::ApiError;

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Claims extracted from a verified Google ID token.
#[derive(Debug, Clone)]
pub struct GoogleIdentity {
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Verification of third-party identity assertions sits behind a trait so
/// tests can substitute a canned identity (same seam as the mailer).
#[async_trait]
pub trait GoogleTokenVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, ApiError>;
}

/// Wire format of Google's tokeninfo endpoint. Everything is a string there,
/// including `email_verified`.
#[derive(Debug, Deserialize)]
struct TokenInfo {
    sub: String,
    aud: String,
    iss: String,
    email: String,
    email_verified: String,
    name: Option<String>,
    picture: Option<String>,
}

/// Verifies ID tokens against Google's tokeninfo endpoint. Fails closed: any
/// network error, timeout or claim mismatch rejects the assertion; a timeout
/// is a verification failure, not a retryable condition.
pub struct TokenInfoVerifier {
    http: reqwest::Client,
    client_id: Option<String>,
}

impl TokenInfoVerifier {
    pub fn new(cfg: &GoogleConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            client_id: cfg.client_id.clone(),
        })
    }
}

#[async_trait]
impl GoogleTokenVerifier for TokenInfoVerifier {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, ApiError> {
        let Some(client_id) = &self.client_id else {
            warn!("google sign-in attempted but GOOGLE_CLIENT_ID is not set");
            return Err(ApiError::Auth("Google sign-in is not configured".into()));
        };

        let response = self
            .http
            .get(TOKENINFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "google tokeninfo request failed");
                ApiError::Auth("Invalid Google token".into())
            })?;

        if !response.status().is_success() {
            return Err(ApiError::Auth("Invalid Google token".into()));
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|_| ApiError::Auth("Invalid Google token".into()))?;

        if &info.aud != client_id || !GOOGLE_ISSUERS.contains(&info.iss.as_str()) {
            warn!(aud = %info.aud, iss = %info.iss, "google token claim mismatch");
            return Err(ApiError::Auth("Invalid Google token".into()));
        }

        Ok(GoogleIdentity {
            subject: info.sub,
            email: info.email,
            email_verified: info.email_verified == "true",
            name: info.name,
            avatar_url: info.picture,
        })
    }
}

/// Display name for accounts Google reports without one: letters of the email
/// local part, or "User" when nothing survives.
pub fn fallback_name(email: &str) -> String {
    let local = email.split('@').next().unwrap_or("");
    let letters: String = local.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    if letters.is_empty() {
        "User".to_string()
    } else {
        letters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokeninfo_payload_deserializes() {
        let body = r#"{
            "sub": "110169484474386276334",
            "aud": "client-id.apps.googleusercontent.com",
            "iss": "https://accounts.google.com",
            "email": "linh@example.com",
            "email_verified": "true",
            "name": "Linh Tran",
            "picture": "https://lh3.googleusercontent.com/a/photo"
        }"#;
        let info: TokenInfo = serde_json::from_str(body).unwrap();
        assert_eq!(info.sub, "110169484474386276334");
        assert_eq!(info.email_verified, "true");
        assert_eq!(info.name.as_deref(), Some("Linh Tran"));
    }

    #[test]
    fn tokeninfo_tolerates_missing_optional_claims() {
        let body = r#"{
            "sub": "1",
            "aud": "x",
            "iss": "accounts.google.com",
            "email": "a@b.c",
            "email_verified": "false"
        }"#;
        let info: TokenInfo = serde_json::from_str(body).unwrap();
        assert!(info.name.is_none());
        assert!(info.picture.is_none());
    }

    #[test]
    fn fallback_name_strips_non_letters() {
        assert_eq!(fallback_name("linh.tran88@gmail.com"), "linhtran");
        assert_eq!(fallback_name("8888@gmail.com"), "User");
        assert_eq!(fallback_name(""), "User");
    }
}

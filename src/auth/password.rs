use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::error;

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// A malformed hash is treated as a mismatch, not an error: stored hashes a
/// caller cannot verify against must never turn into a 500.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// A freshly generated password-reset credential. Only `token_id` (the lookup
/// key) and the Argon2 hash of `secret` are persisted; `plaintext` goes to the
/// user out-of-band as `"{token_id}.{secret}"`.
pub struct ResetToken {
    pub token_id: String,
    pub secret: String,
    pub plaintext: String,
}

pub fn generate_reset_token() -> ResetToken {
    let mut id_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut id_bytes);
    let mut secret_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut secret_bytes);

    let token_id = Base64UrlUnpadded::encode_string(&id_bytes);
    let secret = Base64UrlUnpadded::encode_string(&secret_bytes);
    let plaintext = format!("{token_id}.{secret}");
    ResetToken {
        token_id,
        secret,
        plaintext,
    }
}

/// Splits a presented reset token into its lookup id and secret halves.
pub fn split_reset_token(token: &str) -> Option<(&str, &str)> {
    let (id, secret) = token.split_once('.')?;
    if id.is_empty() || secret.is_empty() {
        return None;
    }
    Some((id, secret))
}

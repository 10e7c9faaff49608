#![allow(dead_code)]

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use luminarts_auth::auth::google::TokenInfoVerifier;
use luminarts_auth::auth::password::hash_password;
use luminarts_auth::auth::repo_types::User;
use luminarts_auth::config::{AppConfig, GoogleConfig, JwtConfig, TokenConfig};
use luminarts_auth::email::LogMailer;
use luminarts_auth::state::AppState;

pub const TEST_PASSWORD: &str = "Secur3P@ssw0rd!";

/// Connects to the database named by `DATABASE_URL` and applies migrations.
/// Returns `None` when the variable is unset so these tests skip cleanly on
/// machines without Postgres.
pub async fn test_pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database-backed test");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .ok()?;
    sqlx::migrate!("./migrations").run(&pool).await.ok()?;
    Some(pool)
}

/// A fresh LOCAL user with a unique email, so tests never collide.
pub async fn seed_user(db: &PgPool) -> User {
    let email = format!("user-{}@example.com", Uuid::new_v4());
    let hash = hash_password(TEST_PASSWORD).expect("hash password");
    User::create_local(db, "Test User", &email, None, &hash)
        .await
        .expect("create user")
}

pub fn test_state(db: PgPool) -> AppState {
    let config = Arc::new(AppConfig {
        database_url: String::new(),
        frontend_url: "http://localhost:5173".into(),
        jwt: JwtConfig {
            secret: "integration-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            access_ttl_minutes: 5,
        },
        tokens: TokenConfig {
            refresh_ttl_days: 7,
            reset_ttl_minutes: 10,
        },
        google: GoogleConfig {
            client_id: None,
            timeout_secs: 1,
        },
    });
    let google = Arc::new(TokenInfoVerifier::new(&config.google).expect("verifier"));
    AppState {
        db,
        config,
        google,
        mailer: Arc::new(LogMailer),
    }
}

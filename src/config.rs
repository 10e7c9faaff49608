use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub refresh_ttl_days: i64,
    pub reset_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    /// OAuth client id the token audience must match. Google sign-in is
    /// disabled when unset.
    pub client_id: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub frontend_url: String,
    pub jwt: JwtConfig,
    pub tokens: TokenConfig,
    pub google: GoogleConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".into());
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "luminarts".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "luminarts-users".into()),
            access_ttl_minutes: std::env::var("JWT_ACCESS_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(30),
        };
        let tokens = TokenConfig {
            refresh_ttl_days: std::env::var("REFRESH_TTL_DAYS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(7),
            reset_ttl_minutes: std::env::var("RESET_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(10),
        };
        let google = GoogleConfig {
            client_id: std::env::var("GOOGLE_CLIENT_ID")
                .ok()
                .filter(|v| !v.is_empty()),
            timeout_secs: std::env::var("GOOGLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5),
        };
        Ok(Self {
            database_url,
            frontend_url,
            jwt,
            tokens,
            google,
        })
    }
}

use luminarts_auth::app;
use luminarts_auth::auth::tokens::RefreshToken;
use luminarts_auth::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "luminarts_auth=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = AppState::init().await?;

    sqlx::migrate!("./migrations").run(&app_state.db).await?;

    // Hygiene sweep for long-expired refresh tokens; revocation correctness
    // never depends on it.
    let sweep_db = app_state.db.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(60 * 60 * 24));
        loop {
            tick.tick().await;
            if let Err(e) = RefreshToken::delete_expired(&sweep_db).await {
                tracing::warn!(error = %e, "expired token sweep failed");
            }
        }
    });

    let app = app::build_app(app_state);
    app::serve(app).await
}

use axum::async_trait;
use tracing::info;

/// Outbound mail is an external collaborator. Send failures are the caller's
/// to log, never to propagate: a broken mail pipeline must not abort a
/// password-reset request.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_password_reset_email(&self, email: &str, reset_url: &str) -> anyhow::Result<()>;
}

/// Default mailer that only logs the reset link. Deployments wire a real
/// delivery service behind the same trait.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_password_reset_email(&self, email: &str, reset_url: &str) -> anyhow::Result<()> {
        info!(email = %email, reset_url = %reset_url, "password reset email (log-only mailer)");
        Ok(())
    }
}

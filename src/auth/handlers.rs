use axum::{
    extract::{FromRef, Path, State},
    routing::{get, post, put},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::auth::dto::{
    AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, GoogleAuthRequest, LoginRequest,
    RefreshRequest, RegisterRequest, ResetPasswordRequest, UserResponse,
};
use crate::auth::extractors::{AuthUser, ClientIp, MaybeAuthUser};
use crate::auth::google::fallback_name;
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{
    generate_reset_token, hash_password, split_reset_token, verify_password,
};
use crate::auth::repo_types::User;
use crate::auth::tokens::RefreshToken;
use crate::error::{ApiError, ApiResponse};
use crate::state::AppState;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/google", post(google_auth))
        .route("/auth/refresh-token", post(refresh_token))
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password/:token", put(reset_password))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(me))
        .route("/users/me/password", put(change_password))
}

/// Every email that touches the directory goes through this, whether it came
/// from a request body or from Google's tokeninfo payload. Lookups and unique
/// indexes only work if both sides agree on the casing.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn check_password_policy(password: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".into(),
        ));
    }
    Ok(())
}

/// Mints the access/refresh pair every successful authentication path ends
/// with.
async fn issue_pair(state: &AppState, user: &User, ip: &str) -> Result<AuthResponse, ApiError> {
    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(user.id, user.role)?;
    let refresh = RefreshToken::create(
        &state.db,
        user.id,
        state.config.tokens.refresh_ttl_days,
        ip,
    )
    .await?;
    Ok(AuthResponse::new(access_token, refresh.token, user))
}

#[instrument(skip(state, payload))]
async fn register(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, ApiError> {
    payload.email = normalize_email(&payload.email);

    if !is_valid_email(&payload.email) {
        return Err(ApiError::Validation("Invalid email".into()));
    }
    check_password_policy(&payload.password)?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::Validation("Name is required".into()));
    }

    // Best-effort pre-checks; the unique indexes catch the race.
    if User::exists_by_email(&state.db, &payload.email).await? {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::Conflict("Email already registered".into()));
    }
    if let Some(phone) = payload.phone_number.as_deref() {
        if User::exists_by_phone(&state.db, phone).await? {
            return Err(ApiError::Conflict("Phone number already registered".into()));
        }
    }

    let hash = hash_password(&payload.password)?;
    let user = User::create_local(
        &state.db,
        payload.name.trim(),
        &payload.email,
        payload.phone_number.as_deref(),
        &hash,
    )
    .await?;

    info!(user_id = %user.id, email = %payload.email, "user registered");
    let tokens = issue_pair(&state, &user, &ip).await?;
    Ok(ApiResponse::success("Registration successful", tokens))
}

#[instrument(skip(state, payload))]
async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, ApiError> {
    payload.email = normalize_email(&payload.email);

    if !is_valid_email(&payload.email) {
        return Err(ApiError::Validation("Invalid email".into()));
    }

    // "Invalid credentials" for both unknown email and bad password so the
    // response never reveals which one failed.
    let user = User::find_by_email(&state.db, &payload.email)
        .await?
        .ok_or_else(|| ApiError::Auth("Invalid credentials".into()))?;

    let ok = user
        .password_hash
        .as_deref()
        .map(|hash| verify_password(&payload.password, hash))
        .unwrap_or(false);
    if !ok {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(ApiError::Auth("Invalid credentials".into()));
    }

    if !user.is_active {
        return Err(ApiError::Auth(
            "Account has been deactivated. Please contact administrator.".into(),
        ));
    }

    User::stamp_last_login(&state.db, user.id).await?;
    info!(user_id = %user.id, "user logged in");

    let tokens = issue_pair(&state, &user, &ip).await?;
    Ok(ApiResponse::success("Login successful", tokens))
}

#[instrument(skip(state, payload))]
async fn google_auth(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(payload): Json<GoogleAuthRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, ApiError> {
    let identity = state.google.verify(&payload.id_token).await?;

    if !identity.email_verified {
        return Err(ApiError::Validation(
            "Please verify your Google email first".into(),
        ));
    }

    // Tokeninfo may report the email with arbitrary casing; stored emails are
    // always normalized, so the link lookup must be too.
    let email = normalize_email(&identity.email);

    // Link by subject first, then by email, else create. Linking a LOCAL
    // account is one-way: it gains Google sign-in and keeps its password.
    let user = match User::find_by_google_subject(&state.db, &identity.subject).await? {
        Some(user) => user,
        None => match User::find_by_email(&state.db, &email).await? {
            Some(user) => {
                info!(user_id = %user.id, "linking google identity to existing account");
                User::link_google(
                    &state.db,
                    user.id,
                    &identity.subject,
                    identity.avatar_url.as_deref(),
                )
                .await?
            }
            None => {
                let name = identity
                    .name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| fallback_name(&email));
                let user = User::create_google(
                    &state.db,
                    &name,
                    &email,
                    &identity.subject,
                    identity.avatar_url.as_deref(),
                )
                .await?;
                info!(user_id = %user.id, "new user created via google");
                user
            }
        },
    };

    User::stamp_last_login(&state.db, user.id).await?;

    let tokens = issue_pair(&state, &user, &ip).await?;
    Ok(ApiResponse::success(
        "Google authentication successful",
        tokens,
    ))
}

#[instrument(skip(state, payload))]
async fn refresh_token(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, ApiError> {
    let record = RefreshToken::rotate(
        &state.db,
        &payload.refresh_token,
        state.config.tokens.refresh_ttl_days,
        &ip,
    )
    .await?;

    let user = User::find_by_id(&state.db, record.user_id)
        .await?
        .ok_or_else(|| ApiError::Auth("Invalid or expired token".into()))?;
    if !user.is_active {
        // The rotation already went through; its fresh token must not stay
        // usable in the ledger for a deactivated account.
        RefreshToken::revoke(&state.db, &record.token, &ip).await?;
        warn!(user_id = %user.id, "refresh attempt for deactivated account");
        return Err(ApiError::Auth("Account has been deactivated".into()));
    }

    let keys = JwtKeys::from_ref(&state);
    let access_token = keys.sign_access(user.id, user.role)?;
    let tokens = AuthResponse::new(access_token, record.token, &user);
    Ok(ApiResponse::success("Token refreshed successfully", tokens))
}

#[instrument(skip(state, payload, caller))]
async fn logout(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    ClientIp(ip): ClientIp,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    RefreshToken::revoke(&state.db, &payload.refresh_token, &ip).await?;
    match caller.0 {
        Some(user) => info!(user_id = %user.id, "user logged out"),
        None => info!("anonymous logout"),
    }
    Ok(ApiResponse::message("Logout successful"))
}

#[instrument(skip(state, caller))]
async fn logout_all(
    State(state): State<AppState>,
    caller: AuthUser,
    ClientIp(ip): ClientIp,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    RefreshToken::revoke_all(&state.db, caller.id, &ip).await?;
    info!(user_id = %caller.id, role = ?caller.role, "logged out everywhere");
    Ok(ApiResponse::message("Logged out from all devices"))
}

#[instrument(skip(state, payload))]
async fn forgot_password(
    State(state): State<AppState>,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    payload.email = normalize_email(&payload.email);

    let user = User::find_by_email(&state.db, &payload.email)
        .await?
        .ok_or_else(|| ApiError::NotFound("No account found with this email".into()))?;

    if !user.is_local() {
        let provider = user.provider.as_str();
        return Err(ApiError::Auth(format!(
            "This account uses {provider} login. Please use {provider} to sign in."
        )));
    }

    let reset = generate_reset_token();
    let secret_hash = hash_password(&reset.secret)?;
    let expires_at = time::OffsetDateTime::now_utc()
        + time::Duration::minutes(state.config.tokens.reset_ttl_minutes);
    User::set_reset_token(&state.db, user.id, &reset.token_id, &secret_hash, expires_at).await?;

    // Fire-and-forget: a broken mail pipeline must not fail the request.
    let reset_url = format!(
        "{}/reset-password?token={}",
        state.config.frontend_url, reset.plaintext
    );
    if let Err(e) = state
        .mailer
        .send_password_reset_email(&payload.email, &reset_url)
        .await
    {
        warn!(user_id = %user.id, error = %e, "password reset email failed to send");
    }

    info!(user_id = %user.id, "password reset token generated");
    Ok(ApiResponse::message(
        "Password reset instructions have been sent to your email",
    ))
}

#[instrument(skip(state, token, payload))]
async fn reset_password(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    check_password_policy(&payload.new_password)?;

    let invalid = || ApiError::Auth("Invalid or expired reset token".into());

    let (token_id, secret) = split_reset_token(&token).ok_or_else(invalid)?;
    let user = User::find_by_reset_token_id(&state.db, token_id)
        .await?
        .ok_or_else(invalid)?;

    let hash_matches = user
        .reset_token_hash
        .as_deref()
        .map(|hash| verify_password(secret, hash))
        .unwrap_or(false);
    if !hash_matches {
        return Err(invalid());
    }
    if !user.reset_token_valid(time::OffsetDateTime::now_utc()) {
        return Err(ApiError::Auth("Reset token has expired".into()));
    }

    let new_hash = hash_password(&payload.new_password)?;
    // Single statement: sets the password and clears the credential, so the
    // token cannot be redeemed twice.
    User::reset_password(&state.db, user.id, &new_hash).await?;
    RefreshToken::revoke_all(&state.db, user.id, &ip).await?;

    info!(user_id = %user.id, "password reset successful");
    Ok(ApiResponse::message(
        "Password has been reset successfully. Please login with your new password.",
    ))
}

#[instrument(skip(state, caller, payload))]
async fn change_password(
    State(state): State<AppState>,
    caller: AuthUser,
    ClientIp(ip): ClientIp,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    check_password_policy(&payload.new_password)?;

    let user = User::find_by_id(&state.db, caller.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    if !user.is_local() {
        return Err(ApiError::Auth(format!(
            "Cannot change password for {} accounts",
            user.provider.as_str()
        )));
    }

    let ok = user
        .password_hash
        .as_deref()
        .map(|hash| verify_password(&payload.current_password, hash))
        .unwrap_or(false);
    if !ok {
        return Err(ApiError::Auth("Current password is incorrect".into()));
    }

    let new_hash = hash_password(&payload.new_password)?;
    User::set_password(&state.db, user.id, &new_hash).await?;
    RefreshToken::revoke_all(&state.db, user.id, &ip).await?;

    info!(user_id = %user.id, "password changed, all sessions revoked");
    Ok(ApiResponse::message("Password changed successfully"))
}

#[instrument(skip(state, caller))]
async fn me(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    let user = User::find_by_id(&state.db, caller.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(ApiResponse::success("OK", UserResponse::from(&user)))
}

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use tracing::warn;
use uuid::Uuid;

use crate::auth::jwt::JwtKeys;
use crate::auth::repo_types::{Role, User};
use crate::error::ApiError;
use crate::state::AppState;

/// Identity resolved from a bearer access token. Rejects with 401 when the
/// token is missing, fails verification, or the account has been deactivated.
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

/// Same resolution as [`AuthUser`] but never rejects: any failure downgrades
/// to anonymous so public endpoints stay reachable with a bad or expired
/// token.
pub struct MaybeAuthUser(pub Option<AuthUser>);

/// Client address for the token-ledger audit trail: first `X-Forwarded-For`
/// entry, then `X-Real-IP`, then the socket peer.
pub struct ClientIp(pub String);

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
}

fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let from_header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim())
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("unknown"))
            .map(str::to_string)
    };
    from_header("x-forwarded-for")
        .or_else(|| from_header("x-real-ip"))
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Auth("Missing Authorization header".into()))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(token).map_err(|e| {
            warn!("access token rejected");
            ApiError::Token(e)
        })?;

        // Immediate-deactivation semantics: the claim alone is not enough.
        let user = User::find_by_id(&state.db, claims.sub)
            .await?
            .ok_or_else(|| ApiError::Auth("Invalid or expired token".into()))?;
        if !user.is_active {
            return Err(ApiError::Auth("Account has been deactivated".into()));
        }

        Ok(AuthUser {
            id: user.id,
            role: claims.role,
        })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(
            AuthUser::from_request_parts(parts, state).await.ok(),
        ))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);
        Ok(ClientIp(client_ip(&parts.headers, peer)))
    }
}

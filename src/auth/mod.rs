use crate::state::AppState;
use axum::Router;

mod dto;
pub mod extractors;
pub mod google;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod tokens;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::user_routes())
}

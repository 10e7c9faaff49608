//! Endpoint tests driven through the router with `tower::ServiceExt`.
//! Each test skips when `DATABASE_URL` is unset.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use luminarts_auth::app::build_app;
use luminarts_auth::auth::tokens::RefreshToken;
use tower::ServiceExt;

fn refresh_request(token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/auth/refresh-token")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(format!(r#"{{"refreshToken":"{token}"}}"#)))
        .expect("request")
}

#[tokio::test]
async fn refresh_succeeds_and_rotates_for_an_active_account() {
    let Some(db) = common::test_pool().await else {
        return;
    };
    let user = common::seed_user(&db).await;
    let token = RefreshToken::create(&db, user.id, 7, "203.0.113.7")
        .await
        .expect("create token");

    let app = build_app(common::test_state(db.clone()));
    let response = app
        .oneshot(refresh_request(&token.token))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let old = RefreshToken::find(&db, &token.token)
        .await
        .expect("find")
        .expect("old row");
    assert!(old.revoked_at.is_some());
    let replacement = old.replaced_by_token.expect("replacement recorded");
    assert!(RefreshToken::validate(&db, &replacement).await.is_ok());
}

#[tokio::test]
async fn refresh_for_deactivated_owner_leaves_no_live_replacement() {
    let Some(db) = common::test_pool().await else {
        return;
    };
    let user = common::seed_user(&db).await;
    let token = RefreshToken::create(&db, user.id, 7, "203.0.113.7")
        .await
        .expect("create token");
    sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1")
        .bind(user.id)
        .execute(&db)
        .await
        .expect("deactivate");

    let app = build_app(common::test_state(db.clone()));
    let response = app
        .oneshot(refresh_request(&token.token))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The rotation went through before the activation check, so the whole
    // family must now be revoked: the presented token and its replacement.
    let old = RefreshToken::find(&db, &token.token)
        .await
        .expect("find")
        .expect("old row");
    assert!(old.revoked_at.is_some());
    let replacement_token = old.replaced_by_token.expect("replacement recorded");
    let replacement = RefreshToken::find(&db, &replacement_token)
        .await
        .expect("find replacement")
        .expect("replacement row");
    assert!(
        replacement.revoked_at.is_some(),
        "replacement must not stay usable for a deactivated account"
    );
}

#[tokio::test]
async fn refresh_with_an_unknown_token_is_unauthorized() {
    let Some(db) = common::test_pool().await else {
        return;
    };
    let app = build_app(common::test_state(db));
    let response = app
        .oneshot(refresh_request("never-issued-token-value"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

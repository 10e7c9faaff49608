//! Refresh-token ledger and reset-credential tests against a real Postgres.
//! Each test skips when `DATABASE_URL` is unset.

mod common;

use luminarts_auth::auth::password::{generate_reset_token, hash_password, verify_password};
use luminarts_auth::auth::repo_types::User;
use luminarts_auth::auth::tokens::RefreshToken;
use luminarts_auth::error::{ApiError, TokenError};
use time::{Duration, OffsetDateTime};

const TTL_DAYS: i64 = 7;
const IP: &str = "203.0.113.7";

#[tokio::test]
async fn concurrent_rotations_have_exactly_one_winner() {
    let Some(db) = common::test_pool().await else {
        return;
    };
    let user = common::seed_user(&db).await;
    let token = RefreshToken::create(&db, user.id, TTL_DAYS, IP)
        .await
        .expect("create token");

    let (a, b) = tokio::join!(
        RefreshToken::rotate(&db, &token.token, TTL_DAYS, "203.0.113.8"),
        RefreshToken::rotate(&db, &token.token, TTL_DAYS, "203.0.113.9"),
    );

    let winners = [a.is_ok(), b.is_ok()].into_iter().filter(|ok| *ok).count();
    assert_eq!(winners, 1, "exactly one rotation may succeed");
    let loser = if a.is_err() { a } else { b };
    assert!(matches!(loser, Err(ApiError::Token(TokenError::Revoked))));
}

#[tokio::test]
async fn rotation_revokes_the_old_token_and_records_the_replacement() {
    let Some(db) = common::test_pool().await else {
        return;
    };
    let user = common::seed_user(&db).await;
    let token = RefreshToken::create(&db, user.id, TTL_DAYS, IP)
        .await
        .expect("create token");

    let new = RefreshToken::rotate(&db, &token.token, TTL_DAYS, IP)
        .await
        .expect("rotate");

    assert!(matches!(
        RefreshToken::validate(&db, &token.token).await,
        Err(ApiError::Token(TokenError::Revoked))
    ));
    assert!(RefreshToken::validate(&db, &new.token).await.is_ok());

    let old = RefreshToken::find(&db, &token.token)
        .await
        .expect("find")
        .expect("old row still exists");
    assert_eq!(old.replaced_by_token.as_deref(), Some(new.token.as_str()));
}

#[tokio::test]
async fn reusing_a_rotated_token_burns_every_descendant() {
    let Some(db) = common::test_pool().await else {
        return;
    };
    let user = common::seed_user(&db).await;
    let t1 = RefreshToken::create(&db, user.id, TTL_DAYS, IP)
        .await
        .expect("create token");
    let t2 = RefreshToken::rotate(&db, &t1.token, TTL_DAYS, IP)
        .await
        .expect("first rotation");
    let t3 = RefreshToken::rotate(&db, &t2.token, TTL_DAYS, IP)
        .await
        .expect("second rotation");

    // Presenting t1 again is theft; t3 was the only live session and must die.
    assert!(matches!(
        RefreshToken::rotate(&db, &t1.token, TTL_DAYS, "198.51.100.1").await,
        Err(ApiError::Token(TokenError::Revoked))
    ));
    assert!(matches!(
        RefreshToken::validate(&db, &t2.token).await,
        Err(ApiError::Token(TokenError::Revoked))
    ));
    assert!(matches!(
        RefreshToken::validate(&db, &t3.token).await,
        Err(ApiError::Token(TokenError::Revoked))
    ));
}

#[tokio::test]
async fn rotating_an_expired_token_is_rejected_without_side_effects() {
    let Some(db) = common::test_pool().await else {
        return;
    };
    let user = common::seed_user(&db).await;
    let token = RefreshToken::create(&db, user.id, TTL_DAYS, IP)
        .await
        .expect("create token");
    sqlx::query("UPDATE refresh_tokens SET expires_at = now() - interval '1 day' WHERE token = $1")
        .bind(&token.token)
        .execute(&db)
        .await
        .expect("age the token");

    assert!(matches!(
        RefreshToken::rotate(&db, &token.token, TTL_DAYS, IP).await,
        Err(ApiError::Token(TokenError::Expired))
    ));
    let row = RefreshToken::find(&db, &token.token)
        .await
        .expect("find")
        .expect("row");
    assert!(row.revoked_at.is_none());
    assert!(row.replaced_by_token.is_none());
}

#[tokio::test]
async fn revoke_all_leaves_no_live_token_behind() {
    let Some(db) = common::test_pool().await else {
        return;
    };
    let user = common::seed_user(&db).await;
    let mut issued = Vec::new();
    for _ in 0..3 {
        issued.push(
            RefreshToken::create(&db, user.id, TTL_DAYS, IP)
                .await
                .expect("create token"),
        );
    }

    let revoked = RefreshToken::revoke_all(&db, user.id, IP)
        .await
        .expect("revoke all");
    assert_eq!(revoked, 3);
    for token in &issued {
        assert!(matches!(
            RefreshToken::validate(&db, &token.token).await,
            Err(ApiError::Token(TokenError::Revoked))
        ));
    }

    // A second pass finds nothing left to revoke.
    let again = RefreshToken::revoke_all(&db, user.id, IP)
        .await
        .expect("revoke all again");
    assert_eq!(again, 0);
}

#[tokio::test]
async fn reset_credential_is_single_use() {
    let Some(db) = common::test_pool().await else {
        return;
    };
    let user = common::seed_user(&db).await;

    let reset = generate_reset_token();
    let secret_hash = hash_password(&reset.secret).expect("hash secret");
    let expires_at = OffsetDateTime::now_utc() + Duration::minutes(10);
    User::set_reset_token(&db, user.id, &reset.token_id, &secret_hash, expires_at)
        .await
        .expect("store reset credential");

    let found = User::find_by_reset_token_id(&db, &reset.token_id)
        .await
        .expect("lookup")
        .expect("credential is live");
    assert_eq!(found.id, user.id);
    assert!(verify_password(
        &reset.secret,
        found.reset_token_hash.as_deref().expect("hash stored")
    ));

    let new_hash = hash_password("N3w-Password!").expect("hash password");
    User::reset_password(&db, user.id, &new_hash)
        .await
        .expect("redeem");

    // Redeeming cleared the credential, so the same token finds nothing.
    assert!(User::find_by_reset_token_id(&db, &reset.token_id)
        .await
        .expect("lookup after redeem")
        .is_none());
    let refreshed = User::find_by_id(&db, user.id)
        .await
        .expect("find user")
        .expect("user");
    assert!(verify_password(
        "N3w-Password!",
        refreshed.password_hash.as_deref().expect("password set")
    ));
}

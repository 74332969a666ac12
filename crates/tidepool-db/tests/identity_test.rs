//! Integration tests for the identity store: natural-key conflicts, the
//! atomic auth workflow, and the fetch watermark.

use tidepool_core::{CreateAccountRequest, CreateRegistrationRequest, Error, StatusId};
use tidepool_db::test_fixtures::TestDatabase;

#[tokio::test]
async fn create_user_creates_default_stream() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;

    let user = db
        .identity
        .create_user(serde_json::json!({"list_count": 10}))
        .await
        .unwrap();
    let stream = db.streams.stream_by_id(user.default_stream_id).await.unwrap();
    assert_eq!(stream.user_id, user.id);
    assert_eq!(stream.first_position, 0);
    assert_eq!(stream.last_position, 0);

    let loaded = db.identity.user_by_id(user.id).await.unwrap();
    assert_eq!(loaded.default_stream_id, user.default_stream_id);

    test_db.cleanup().await;
}

#[tokio::test]
async fn user_lookup_miss_is_not_found() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;

    match db.identity.user_by_id(uuid::Uuid::new_v4()).await {
        Err(Error::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }

    test_db.cleanup().await;
}

#[tokio::test]
async fn duplicate_server_is_conflict() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;

    db.identity.create_server("https://one.example").await.unwrap();
    match db.identity.create_server("https://one.example").await {
        Err(Error::Conflict(_)) => {}
        other => panic!("expected Conflict, got {other:?}"),
    }

    test_db.cleanup().await;
}

#[tokio::test]
async fn insecure_server_address_is_invalid() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;

    match db.identity.create_server("http://plain.example").await {
        Err(Error::InvalidInput(_)) => {}
        other => panic!("expected InvalidInput, got {other:?}"),
    }

    test_db.cleanup().await;
}

#[tokio::test]
async fn auth_workflow_commits_atomically() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;

    let user = db.identity.create_user(serde_json::json!({})).await.unwrap();

    // Register app and store account in one transaction, the way the auth
    // flow composes them.
    let mut tx = db.pool.begin().await.unwrap();
    db.identity
        .create_server_tx(&mut tx, "https://social.example")
        .await
        .unwrap();
    db.identity
        .create_registration_tx(
            &mut tx,
            CreateRegistrationRequest {
                server_address: "https://social.example".to_string(),
                scopes: "read write".to_string(),
                redirect_uri: "https://app.example/callback".to_string(),
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
                auth_uri: "https://social.example/oauth/authorize".to_string(),
            },
        )
        .await
        .unwrap();
    db.identity
        .create_account_tx(
            &mut tx,
            CreateAccountRequest {
                user_id: user.id,
                server_address: "https://social.example".to_string(),
                remote_username: "reader".to_string(),
                access_token: "bearer".to_string(),
            },
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let reg = db
        .identity
        .registration_by_key(
            "https://social.example",
            "read write",
            "https://app.example/callback",
        )
        .await
        .unwrap();
    assert_eq!(reg.client_id, "cid");

    let accounts = db.identity.accounts_for_user(user.id).await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].last_status_id, None);

    test_db.cleanup().await;
}

#[tokio::test]
async fn duplicate_account_per_server_is_conflict() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;

    let user = db.identity.create_user(serde_json::json!({})).await.unwrap();
    db.identity.create_server("https://social.example").await.unwrap();

    let req = CreateAccountRequest {
        user_id: user.id,
        server_address: "https://social.example".to_string(),
        remote_username: "reader".to_string(),
        access_token: "bearer".to_string(),
    };
    db.identity.create_account(req.clone()).await.unwrap();
    match db.identity.create_account(req).await {
        Err(Error::Conflict(_)) => {}
        other => panic!("expected Conflict, got {other:?}"),
    }

    test_db.cleanup().await;
}

#[tokio::test]
async fn watermark_persists_per_account() {
    let Some(test_db) = TestDatabase::maybe_new().await else { return };
    let db = &test_db.db;

    let user = db.identity.create_user(serde_json::json!({})).await.unwrap();
    db.identity.create_server("https://social.example").await.unwrap();
    let account = db
        .identity
        .create_account(CreateAccountRequest {
            user_id: user.id,
            server_address: "https://social.example".to_string(),
            remote_username: "reader".to_string(),
            access_token: "bearer".to_string(),
        })
        .await
        .unwrap();

    let mut tx = db.pool.begin().await.unwrap();
    db.identity
        .set_last_status_id_tx(&mut tx, account.id, &StatusId::from("12345"))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let loaded = db.identity.account_by_id(account.id).await.unwrap();
    assert_eq!(loaded.last_status_id, Some(StatusId::from("12345")));

    test_db.cleanup().await;
}

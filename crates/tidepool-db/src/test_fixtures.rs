//! Test fixtures for database integration tests.
//!
//! Each test gets its own PostgreSQL schema with the full tidepool layout
//! applied, so tests can run concurrently against one database.
//!
//! ## Configuration
//!
//! The test database URL comes from the `DATABASE_URL` environment
//! variable. Integration tests call [`TestDatabase::maybe_new`] and skip
//! themselves when it is not set.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tidepool_db::test_fixtures::TestDatabase;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let Some(test_db) = TestDatabase::maybe_new().await else { return };
//!     let user = test_db.db.identity.create_user(serde_json::json!({})).await.unwrap();
//!     // ...
//!     test_db.cleanup().await;
//! }
//! ```

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use uuid::Uuid;

use crate::Database;

/// Schema definition applied into each per-test schema.
const SCHEMA_SQL: &str = include_str!("../../../migrations/0001_init.sql");

/// Test database connection with per-test schema isolation.
pub struct TestDatabase {
    pub db: Database,
    admin_pool: PgPool,
    schema_name: String,
}

impl TestDatabase {
    /// Create a test database, or `None` when `DATABASE_URL` is not set.
    pub async fn maybe_new() -> Option<Self> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            eprintln!("skipping: DATABASE_URL not set");
            return None;
        };
        Some(Self::new(&database_url).await)
    }

    /// Create a test database against the given URL.
    pub async fn new(database_url: &str) -> Self {
        let schema_name = format!("test_{}", Uuid::new_v4().to_string().replace('-', "_"));

        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .expect("failed to connect to test database");

        sqlx::query(&format!("CREATE SCHEMA {schema_name}"))
            .execute(&admin_pool)
            .await
            .expect("failed to create test schema");

        // Every pooled connection pins its search_path to the test schema.
        let search_path = format!("SET search_path TO {schema_name}");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .after_connect(move |conn, _meta| {
                let search_path = search_path.clone();
                Box::pin(async move {
                    conn.execute(search_path.as_str()).await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await
            .expect("failed to create test pool");

        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&pool)
            .await
            .expect("failed to apply schema");

        Self {
            db: Database::new(pool),
            admin_pool,
            schema_name,
        }
    }

    /// Drop the test schema and everything in it.
    pub async fn cleanup(self) {
        self.db.pool.close().await;
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema_name))
            .execute(&self.admin_pool)
            .await
            .expect("failed to drop test schema");
        self.admin_pool.close().await;
    }
}

/// Seed a user with one server and one account, returning
/// (user id, default stream id, account id).
pub async fn seed_user_with_account(db: &Database) -> (Uuid, Uuid, Uuid) {
    let user = db
        .identity
        .create_user(serde_json::json!({}))
        .await
        .expect("create user");

    let address = format!("https://{}.example", Uuid::new_v4().simple());
    db.identity
        .create_server(&address)
        .await
        .expect("create server");

    let account = db
        .identity
        .create_account(tidepool_core::CreateAccountRequest {
            user_id: user.id,
            server_address: address,
            remote_username: "reader".to_string(),
            access_token: "token".to_string(),
        })
        .await
        .expect("create account");

    (user.id, user.default_stream_id, account.id)
}

/// Insert `n` pool statuses with ids `base, base+1, ...` for an account.
pub async fn seed_statuses(db: &Database, account_id: Uuid, base: u64, n: u64) {
    for i in 0..n {
        let id = tidepool_core::StatusId::from(format!("{}", base + i));
        let payload = serde_json::json!({
            "id": id.as_str(),
            "content": format!("status {}", base + i),
        });
        db.statuses
            .insert(account_id, &id, &payload)
            .await
            .expect("insert status");
    }
}

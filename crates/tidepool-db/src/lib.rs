//! # tidepool-db
//!
//! PostgreSQL database layer for tidepool.
//!
//! This crate provides:
//! - Connection pool management
//! - The identity store (users, servers, app registrations, accounts)
//! - The status pool (fetched-but-unpositioned statuses)
//! - The stream/position engine with cursor pagination
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidepool_db::Database;
//! use tidepool_core::ListDirection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/tidepool").await?;
//!     let user = db.identity.create_user(serde_json::json!({})).await?;
//!     let page = db
//!         .streams
//!         .list(user.default_stream_id, ListDirection::Initial, 0, 20)
//!         .await?;
//!     println!("{} items", page.items.len());
//!     Ok(())
//! }
//! ```

pub mod identity;
pub mod pool;
pub mod statuses;
pub mod streams;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use them.
pub mod test_fixtures;

// Re-export core types
pub use tidepool_core::*;

// Re-export repository implementations
pub use identity::PgIdentityRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use statuses::PgStatusRepository;
pub use streams::PgStreamRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Identity store: users, servers, app registrations, accounts.
    pub identity: PgIdentityRepository,
    /// Status pool of fetched, not-yet-positioned statuses.
    pub statuses: PgStatusRepository,
    /// Stream/position engine and pagination queries.
    pub streams: PgStreamRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            identity: PgIdentityRepository::new(pool.clone()),
            statuses: PgStatusRepository::new(pool.clone()),
            streams: PgStreamRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

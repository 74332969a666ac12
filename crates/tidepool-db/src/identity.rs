//! Identity repository: users, servers, app registrations, and accounts.
//!
//! Creates fail with `Conflict` when the natural key is already present.
//! Every create has a `_tx` variant so multi-step workflows (register app,
//! exchange code, store account) commit atomically.

use chrono::Utc;
use sqlx::{Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use tidepool_core::{
    new_v7, Account, AppRegistration, CreateAccountRequest, CreateRegistrationRequest, Error,
    Result, Server, StatusId, User,
};

/// Map a unique-constraint violation to `Conflict`, everything else to
/// `Database`.
pub(crate) fn conflict_on_unique(e: sqlx::Error, what: &str) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict(what.to_string()),
        _ => Error::Database(e),
    }
}

/// PostgreSQL implementation of the identity store.
#[derive(Clone)]
pub struct PgIdentityRepository {
    pool: Pool<Postgres>,
}

impl PgIdentityRepository {
    /// Create a new PgIdentityRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    // =========================================================================
    // USERS
    // =========================================================================

    /// Create a user together with their default stream, in one transaction.
    pub async fn create_user(&self, settings: serde_json::Value) -> Result<User> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let user = self.create_user_tx(&mut tx, settings).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(user)
    }

    /// Create a user and default stream within a transaction.
    pub async fn create_user_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        settings: serde_json::Value,
    ) -> Result<User> {
        let now = Utc::now();
        let user_id = new_v7();
        let stream_id = new_v7();

        sqlx::query(
            "INSERT INTO users (id, default_stream_id, settings, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(stream_id)
        .bind(&settings)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query("INSERT INTO streams (id, user_id) VALUES ($1, $2)")
            .bind(stream_id)
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

        Ok(User {
            id: user_id,
            default_stream_id: stream_id,
            settings,
            created_at: now,
        })
    }

    /// Get a user by id, failing with `NotFound` on a miss.
    pub async fn user_by_id(&self, user_id: Uuid) -> Result<User> {
        let row = sqlx::query(
            "SELECT id, default_stream_id, settings, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;

        Ok(User {
            id: row.get("id"),
            default_stream_id: row.get("default_stream_id"),
            settings: row.get("settings"),
            created_at: row.get("created_at"),
        })
    }

    // =========================================================================
    // SERVERS
    // =========================================================================

    /// Register a server by address. The address must use the https scheme.
    pub async fn create_server(&self, address: &str) -> Result<Server> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let server = self.create_server_tx(&mut tx, address).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(server)
    }

    /// Register a server within a transaction.
    pub async fn create_server_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        address: &str,
    ) -> Result<Server> {
        validate_server_address(address)?;
        let now = Utc::now();

        sqlx::query("INSERT INTO servers (address, created_at) VALUES ($1, $2)")
            .bind(address)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(|e| conflict_on_unique(e, &format!("server {address}")))?;

        Ok(Server {
            address: address.to_string(),
            created_at: now,
        })
    }

    /// Get a server by address, failing with `NotFound` on a miss.
    pub async fn server_by_address(&self, address: &str) -> Result<Server> {
        let row = sqlx::query("SELECT address, created_at FROM servers WHERE address = $1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("server {address}")))?;

        Ok(Server {
            address: row.get("address"),
            created_at: row.get("created_at"),
        })
    }

    // =========================================================================
    // APP REGISTRATIONS
    // =========================================================================

    /// Store an OAuth app registration. One registration exists per
    /// (server, scopes, redirect URI).
    pub async fn create_registration(
        &self,
        req: CreateRegistrationRequest,
    ) -> Result<AppRegistration> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let registration = self.create_registration_tx(&mut tx, req).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(registration)
    }

    /// Store an app registration within a transaction.
    pub async fn create_registration_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        req: CreateRegistrationRequest,
    ) -> Result<AppRegistration> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO app_registrations
                 (server_address, scopes, redirect_uri, client_id, client_secret, auth_uri, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&req.server_address)
        .bind(&req.scopes)
        .bind(&req.redirect_uri)
        .bind(&req.client_id)
        .bind(&req.client_secret)
        .bind(&req.auth_uri)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            conflict_on_unique(
                e,
                &format!("registration for {} [{}]", req.server_address, req.scopes),
            )
        })?;

        Ok(AppRegistration {
            server_address: req.server_address,
            scopes: req.scopes,
            redirect_uri: req.redirect_uri,
            client_id: req.client_id,
            client_secret: req.client_secret,
            auth_uri: req.auth_uri,
            created_at: now,
        })
    }

    /// Look up an app registration by its natural key.
    pub async fn registration_by_key(
        &self,
        server_address: &str,
        scopes: &str,
        redirect_uri: &str,
    ) -> Result<AppRegistration> {
        let row = sqlx::query(
            "SELECT server_address, scopes, redirect_uri, client_id, client_secret, auth_uri, created_at
             FROM app_registrations
             WHERE server_address = $1 AND scopes = $2 AND redirect_uri = $3",
        )
        .bind(server_address)
        .bind(scopes)
        .bind(redirect_uri)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("registration for {server_address}")))?;

        Ok(parse_registration_row(row))
    }

    // =========================================================================
    // ACCOUNTS
    // =========================================================================

    /// Bind a remote identity to a user. One account exists per
    /// (user, server).
    pub async fn create_account(&self, req: CreateAccountRequest) -> Result<Account> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let account = self.create_account_tx(&mut tx, req).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(account)
    }

    /// Bind a remote identity within a transaction.
    pub async fn create_account_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        req: CreateAccountRequest,
    ) -> Result<Account> {
        let now = Utc::now();
        let id = new_v7();

        sqlx::query(
            "INSERT INTO accounts
                 (id, user_id, server_address, remote_username, access_token, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(req.user_id)
        .bind(&req.server_address)
        .bind(&req.remote_username)
        .bind(&req.access_token)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            conflict_on_unique(
                e,
                &format!("account on {} for user {}", req.server_address, req.user_id),
            )
        })?;

        Ok(Account {
            id,
            user_id: req.user_id,
            server_address: req.server_address,
            remote_username: req.remote_username,
            access_token: req.access_token,
            last_status_id: None,
            created_at: now,
        })
    }

    /// Get an account by id, failing with `NotFound` on a miss.
    pub async fn account_by_id(&self, account_id: Uuid) -> Result<Account> {
        let row = sqlx::query(
            "SELECT id, user_id, server_address, remote_username, access_token,
                    last_status_id, created_at
             FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("account {account_id}")))?;

        Ok(parse_account_row(row))
    }

    /// All accounts belonging to a user, oldest first.
    pub async fn accounts_for_user(&self, user_id: Uuid) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT id, user_id, server_address, remote_username, access_token,
                    last_status_id, created_at
             FROM accounts WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(parse_account_row).collect())
    }

    /// Advance the fetch watermark within a transaction.
    ///
    /// The watermark only moves with the page commit that observed it, so a
    /// failed page never advances it.
    pub async fn set_last_status_id_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
        last_status_id: &StatusId,
    ) -> Result<()> {
        let updated = sqlx::query("UPDATE accounts SET last_status_id = $1 WHERE id = $2")
            .bind(last_status_id.as_str())
            .bind(account_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("account {account_id}")));
        }
        Ok(())
    }
}

/// Server addresses must use the https scheme.
fn validate_server_address(address: &str) -> Result<()> {
    if !address.starts_with("https://") || address.len() <= "https://".len() {
        return Err(Error::InvalidInput(format!(
            "server address must be an https URL: {address}"
        )));
    }
    Ok(())
}

fn parse_registration_row(row: sqlx::postgres::PgRow) -> AppRegistration {
    AppRegistration {
        server_address: row.get("server_address"),
        scopes: row.get("scopes"),
        redirect_uri: row.get("redirect_uri"),
        client_id: row.get("client_id"),
        client_secret: row.get("client_secret"),
        auth_uri: row.get("auth_uri"),
        created_at: row.get("created_at"),
    }
}

fn parse_account_row(row: sqlx::postgres::PgRow) -> Account {
    Account {
        id: row.get("id"),
        user_id: row.get("user_id"),
        server_address: row.get("server_address"),
        remote_username: row.get("remote_username"),
        access_token: row.get("access_token"),
        last_status_id: row
            .get::<Option<String>, _>("last_status_id")
            .map(StatusId::from),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_server_address() {
        assert!(validate_server_address("https://mastodon.example").is_ok());
        assert!(validate_server_address("http://mastodon.example").is_err());
        assert!(validate_server_address("mastodon.example").is_err());
        assert!(validate_server_address("https://").is_err());
    }
}

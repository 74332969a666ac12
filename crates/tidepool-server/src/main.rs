//! tidepool-server - HTTP server for the tidepool reading stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tidepool_db::{log_pool_metrics, Database, PoolConfig};
use tidepool_server::{router, MastodonTimeline, StreamService};

/// Interval between pool health log lines.
const POOL_METRICS_INTERVAL: Duration = Duration::from_secs(60);

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    //
    // Environment variables:
    //   LOG_FORMAT - "json" or "text" (default: "text")
    //   RUST_LOG   - standard env filter (default: "tidepool_server=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tidepool_server=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // Get configuration from environment
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/tidepool".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse()
        .unwrap_or(3000);

    // Pool knobs, all optional:
    //   DATABASE_MAX_CONNECTIONS, DATABASE_MIN_CONNECTIONS,
    //   DATABASE_CONNECT_TIMEOUT_SECS, DATABASE_IDLE_TIMEOUT_SECS
    let mut pool_config = PoolConfig::new();
    if let Some(n) = env_parse::<u32>("DATABASE_MAX_CONNECTIONS") {
        pool_config = pool_config.max_connections(n);
    }
    if let Some(n) = env_parse::<u32>("DATABASE_MIN_CONNECTIONS") {
        pool_config = pool_config.min_connections(n);
    }
    if let Some(secs) = env_parse::<u64>("DATABASE_CONNECT_TIMEOUT_SECS") {
        pool_config = pool_config.connect_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = env_parse::<u64>("DATABASE_IDLE_TIMEOUT_SECS") {
        pool_config = pool_config.idle_timeout(Duration::from_secs(secs));
    }

    // Connect to database
    info!("Connecting to database...");
    let db = Database::connect_with_config(&database_url, pool_config).await?;
    info!("Database connected");

    // Run pending database migrations on startup
    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    // Periodic pool health logging
    let metrics_pool = db.pool.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(POOL_METRICS_INTERVAL);
        loop {
            ticker.tick().await;
            log_pool_metrics(&metrics_pool);
        }
    });

    let source = Arc::new(MastodonTimeline::new()?);
    let service = StreamService::new(db, source);
    let app = router(service);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!(%addr, "tidepool-server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

//! Database connection and schema management.
//!
//! One SQLite database holds the property documents plus the operational
//! tables (dead letters, browser sessions, daily reports, collection runs).
//! The schema and every index are created idempotently at startup; the
//! unique `property_id` key is what enforces repository uniqueness.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

/// Connect to the configured database and ensure the schema exists.
pub async fn init_db(url: &str, max_pool_size: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_pool_size)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create tables and indexes if they do not already exist.
pub async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // One row per property: indexed columns extracted from the canonical
    // document, full document stored as JSON.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS properties (
            property_id TEXT PRIMARY KEY,
            zipcode TEXT NOT NULL,
            street TEXT NOT NULL,
            listing_status TEXT,
            current_price REAL,
            is_active INTEGER NOT NULL DEFAULT 1,
            first_seen TIMESTAMP NOT NULL,
            last_updated TIMESTAMP NOT NULL,
            document TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Source membership, kept in lockstep with document.sources so that
    // "which properties came from source X" stays an indexed query.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS property_sources (
            property_id TEXT NOT NULL,
            source TEXT NOT NULL,
            PRIMARY KEY (property_id, source)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dead_letters (
            id TEXT PRIMARY KEY,
            component TEXT NOT NULL,
            correlation_id TEXT NOT NULL,
            error_kind TEXT NOT NULL,
            error_message TEXT NOT NULL,
            payload TEXT,
            attempts INTEGER NOT NULL,
            first_attempt_at TIMESTAMP NOT NULL,
            last_attempt_at TIMESTAMP NOT NULL,
            requeued INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS browser_sessions (
            site TEXT NOT NULL,
            identity TEXT NOT NULL,
            cookies TEXT NOT NULL,
            storage TEXT,
            saved_at TIMESTAMP NOT NULL,
            PRIMARY KEY (site, identity)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_reports (
            date TEXT PRIMARY KEY,
            generated_at TIMESTAMP NOT NULL,
            report TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collection_runs (
            run_id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            started_at TIMESTAMP NOT NULL,
            finished_at TIMESTAMP,
            metrics TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_properties_zipcode ON properties (zipcode)",
        "CREATE INDEX IF NOT EXISTS idx_properties_status ON properties (listing_status)",
        "CREATE INDEX IF NOT EXISTS idx_properties_price ON properties (current_price)",
        "CREATE INDEX IF NOT EXISTS idx_properties_updated ON properties (last_updated)",
        "CREATE INDEX IF NOT EXISTS idx_properties_active ON properties (is_active)",
        "CREATE INDEX IF NOT EXISTS idx_properties_zip_status ON properties (zipcode, listing_status)",
        "CREATE INDEX IF NOT EXISTS idx_properties_zip_price ON properties (zipcode, current_price DESC)",
        "CREATE INDEX IF NOT EXISTS idx_properties_active_updated ON properties (is_active, last_updated DESC)",
        "CREATE INDEX IF NOT EXISTS idx_property_sources_source ON property_sources (source)",
        "CREATE INDEX IF NOT EXISTS idx_dead_letters_last_attempt ON dead_letters (last_attempt_at)",
    ];
    for ddl in indexes {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::debug!("database schema ready");
    Ok(())
}

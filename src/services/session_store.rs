//! Persisted browser session state, keyed by (site, identity).
//!
//! The scraper reuses cookies and storage snapshots across runs so a site
//! sees one continuous visitor per egress identity. The payload format is
//! opaque to callers; entries past the configured age fail to load.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::time::Duration;

use crate::utils::IngestError;

/// Artifacts captured from a browser context.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionArtifacts {
    /// Serialized cookie jar
    pub cookies: Vec<StoredCookie>,
    /// Local-storage snapshot, when the driver exposes one
    pub storage: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
}

pub struct SessionStore {
    pool: SqlitePool,
    max_age: Duration,
}

impl SessionStore {
    pub fn new(pool: SqlitePool, max_age: Duration) -> Self {
        Self { pool, max_age }
    }

    /// Load artifacts for (site, identity). Entries older than `max_age`
    /// are treated as absent and removed.
    pub async fn load(
        &self,
        site: &str,
        identity: &str,
    ) -> Result<Option<SessionArtifacts>, IngestError> {
        let row = sqlx::query(
            "SELECT cookies, storage, saved_at FROM browser_sessions WHERE site = ? AND identity = ?",
        )
        .bind(site)
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let saved_at: DateTime<Utc> = row.try_get("saved_at").map_err(IngestError::from)?;
        let age = Utc::now().signed_duration_since(saved_at);
        if age.num_seconds() < 0 || age.num_seconds() as u64 > self.max_age.as_secs() {
            tracing::debug!(site, identity, "stored session expired");
            self.invalidate(site, identity).await?;
            return Ok(None);
        }

        let cookies_json: String = row.try_get("cookies").map_err(IngestError::from)?;
        let cookies: Vec<StoredCookie> = serde_json::from_str(&cookies_json)?;
        let storage = row
            .try_get::<Option<String>, _>("storage")
            .map_err(IngestError::from)?
            .map(|s| serde_json::from_str(&s))
            .transpose()?;

        Ok(Some(SessionArtifacts { cookies, storage }))
    }

    /// Upsert artifacts for (site, identity).
    pub async fn save(
        &self,
        site: &str,
        identity: &str,
        artifacts: &SessionArtifacts,
    ) -> Result<(), IngestError> {
        let cookies = serde_json::to_string(&artifacts.cookies)?;
        let storage = artifacts.storage.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"INSERT INTO browser_sessions (site, identity, cookies, storage, saved_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (site, identity)
               DO UPDATE SET cookies = excluded.cookies,
                             storage = excluded.storage,
                             saved_at = excluded.saved_at"#,
        )
        .bind(site)
        .bind(identity)
        .bind(cookies)
        .bind(storage)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn invalidate(&self, site: &str, identity: &str) -> Result<(), IngestError> {
        sqlx::query("DELETE FROM browser_sessions WHERE site = ? AND identity = ?")
            .bind(site)
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

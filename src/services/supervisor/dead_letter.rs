//! Durable dead-letter queue.
//!
//! Items that exhaust retries or fail non-retryably land here with full
//! (sanitized) context. Append-only; `purge` is the only deletion path
//! and runs from the maintenance schedule.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::utils::{ErrorKind, IngestError, redact_json, redact_text};

#[derive(Debug, Clone, serde::Serialize)]
pub struct DeadLetterItem {
    pub id: String,
    /// Component that gave up (e.g. "pipeline", "maricopa_collector")
    pub component: String,
    pub correlation_id: String,
    pub error_kind: ErrorKind,
    pub error_message: String,
    /// Original payload, when one was attached
    pub payload: Option<serde_json::Value>,
    pub attempts: u32,
    pub first_attempt_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub requeued: bool,
}

pub struct DeadLetterQueue {
    pool: SqlitePool,
}

impl DeadLetterQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one failed item. Payload and message are redacted again at
    /// this boundary; the DLQ must never hold credentials.
    pub async fn enqueue(
        &self,
        component: &str,
        correlation_id: &str,
        error: &IngestError,
        payload: Option<serde_json::Value>,
        attempts: u32,
        first_attempt_at: DateTime<Utc>,
    ) -> Result<String, IngestError> {
        let id = Uuid::new_v4().to_string();
        let payload_json = payload
            .map(|mut value| {
                redact_json(&mut value);
                serde_json::to_string(&value)
            })
            .transpose()?;

        sqlx::query(
            r#"INSERT INTO dead_letters
               (id, component, correlation_id, error_kind, error_message, payload,
                attempts, first_attempt_at, last_attempt_at, requeued)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)"#,
        )
        .bind(&id)
        .bind(component)
        .bind(correlation_id)
        .bind(error.kind().as_str())
        .bind(redact_text(&error.to_string()))
        .bind(payload_json)
        .bind(attempts as i64)
        .bind(first_attempt_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        metrics::counter!("dead_letters_total", 1, "component" => component.to_string());
        tracing::warn!(component, correlation_id, kind = error.kind().as_str(),
            "item dead-lettered");
        Ok(id)
    }

    /// Items in arrival order, optionally only those attempted since a
    /// given time.
    pub async fn list(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<DeadLetterItem>, IngestError> {
        let rows = match since {
            Some(since) => {
                sqlx::query(
                    "SELECT * FROM dead_letters WHERE last_attempt_at >= ? ORDER BY last_attempt_at ASC",
                )
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM dead_letters ORDER BY last_attempt_at ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(|row| row_to_item(&row)).collect()
    }

    /// Mark an item for reprocessing and hand back its payload. Returns
    /// `None` for unknown or already-requeued ids.
    pub async fn requeue(&self, id: &str) -> Result<Option<DeadLetterItem>, IngestError> {
        let updated = sqlx::query("UPDATE dead_letters SET requeued = 1 WHERE id = ? AND requeued = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM dead_letters WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Some(row_to_item(&row)?))
    }

    /// Drop items whose last attempt predates `before`. Returns the number
    /// removed.
    pub async fn purge(&self, before: DateTime<Utc>) -> Result<u64, IngestError> {
        let result = sqlx::query("DELETE FROM dead_letters WHERE last_attempt_at < ?")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn depth(&self) -> Result<u64, IngestError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM dead_letters WHERE requeued = 0")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n").map_err(IngestError::from)?;
        Ok(n as u64)
    }
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<DeadLetterItem, IngestError> {
    let kind_str: String = row.try_get("error_kind").map_err(IngestError::from)?;
    let error_kind = serde_json::from_value(serde_json::Value::String(kind_str))
        .unwrap_or(ErrorKind::Internal);
    let payload = row
        .try_get::<Option<String>, _>("payload")
        .map_err(IngestError::from)?
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    Ok(DeadLetterItem {
        id: row.try_get("id").map_err(IngestError::from)?,
        component: row.try_get("component").map_err(IngestError::from)?,
        correlation_id: row.try_get("correlation_id").map_err(IngestError::from)?,
        error_kind,
        error_message: row.try_get("error_message").map_err(IngestError::from)?,
        payload,
        attempts: row.try_get::<i64, _>("attempts").map_err(IngestError::from)? as u32,
        first_attempt_at: row.try_get("first_attempt_at").map_err(IngestError::from)?,
        last_attempt_at: row.try_get("last_attempt_at").map_err(IngestError::from)?,
        requeued: row.try_get::<i64, _>("requeued").map_err(IngestError::from)? != 0,
    })
}

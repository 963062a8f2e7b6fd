//! Property repository over the document store.
//!
//! One row per property: the canonical document as JSON plus extracted
//! columns backing the indexes. Uniqueness is enforced by the primary key
//! on `property_id`, not application locks; merge semantics (scalar
//! replace, idempotent price-history append, source union) run inside a
//! single-row transaction, which is all the atomicity the pipeline needs.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};

use crate::models::{DailyReport, Property, PropertyPrice, PriceStatistics};
use crate::utils::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    LastUpdated,
    CurrentPrice,
}

impl SortBy {
    pub fn parse(raw: &str) -> Result<Self, IngestError> {
        match raw {
            "last_updated" => Ok(Self::LastUpdated),
            "current_price" => Ok(Self::CurrentPrice),
            other => Err(IngestError::validation(format!("unsupported sort field: {other}"))),
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Self::LastUpdated => "last_updated",
            Self::CurrentPrice => "current_price",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(raw: &str) -> Result<Self, IngestError> {
        match raw {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(IngestError::validation(format!("unsupported sort order: {other}"))),
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

pub struct PropertyRepository {
    pool: SqlitePool,
    /// Days without a fresh observation before a terminal listing goes
    /// inactive (evaluated on write)
    inactive_after_days: i64,
}

impl PropertyRepository {
    pub fn new(pool: SqlitePool, inactive_after_days: i64) -> Self {
        Self { pool, inactive_after_days }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new property; fails with a validation error when the id
    /// already exists.
    pub async fn create(&self, property: &Property) -> Result<String, IngestError> {
        let mut stored = property.clone();
        stored.last_updated = Utc::now();
        stored.is_active = stored.compute_is_active(stored.last_updated, self.inactive_after_days);

        let mut tx = self.pool.begin().await?;
        let document = serde_json::to_string(&stored)?;

        let inserted = sqlx::query(
            r#"INSERT OR IGNORE INTO properties
               (property_id, zipcode, street, listing_status, current_price, is_active,
                first_seen, last_updated, document)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&stored.property_id)
        .bind(&stored.address.zipcode)
        .bind(&stored.address.street)
        .bind(stored.listing.as_ref().map(|l| l.status.as_str()))
        .bind(stored.current_price)
        .bind(stored.is_active)
        .bind(stored.first_seen)
        .bind(stored.last_updated)
        .bind(&document)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(IngestError::validation(format!(
                "property already exists: {}",
                stored.property_id
            )));
        }

        for meta in &stored.sources {
            sqlx::query(
                "INSERT OR IGNORE INTO property_sources (property_id, source) VALUES (?, ?)",
            )
            .bind(&stored.property_id)
            .bind(&meta.source)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(stored.property_id)
    }

    /// Insert or merge. Returns (property_id, was_created).
    pub async fn upsert(&self, property: &Property) -> Result<(String, bool), IngestError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT document FROM properties WHERE property_id = ?")
            .bind(&property.property_id)
            .fetch_optional(&mut *tx)
            .await?;

        let now = Utc::now();
        let (mut merged, was_created) = match existing {
            Some(row) => {
                let document: String = row.try_get("document").map_err(IngestError::from)?;
                let mut stored: Property = serde_json::from_str(&document)?;
                stored.merge_observation(property.clone());
                (stored, false)
            }
            None => (property.clone(), true),
        };

        merged.last_updated = now;
        merged.is_active = merged.compute_is_active(now, self.inactive_after_days);
        let document = serde_json::to_string(&merged)?;

        sqlx::query(
            r#"INSERT INTO properties
               (property_id, zipcode, street, listing_status, current_price, is_active,
                first_seen, last_updated, document)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (property_id)
               DO UPDATE SET zipcode = excluded.zipcode,
                             street = excluded.street,
                             listing_status = excluded.listing_status,
                             current_price = excluded.current_price,
                             is_active = excluded.is_active,
                             last_updated = excluded.last_updated,
                             document = excluded.document"#,
        )
        .bind(&merged.property_id)
        .bind(&merged.address.zipcode)
        .bind(&merged.address.street)
        .bind(merged.listing.as_ref().map(|l| l.status.as_str()))
        .bind(merged.current_price)
        .bind(merged.is_active)
        .bind(merged.first_seen)
        .bind(merged.last_updated)
        .bind(&document)
        .execute(&mut *tx)
        .await?;

        for meta in &merged.sources {
            sqlx::query(
                "INSERT OR IGNORE INTO property_sources (property_id, source) VALUES (?, ?)",
            )
            .bind(&merged.property_id)
            .bind(&meta.source)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        metrics::counter!("repository_upserts_total", 1,
            "created" => if was_created { "true" } else { "false" });
        Ok((merged.property_id, was_created))
    }

    pub async fn get_by_property_id(&self, id: &str) -> Result<Option<Property>, IngestError> {
        let row = sqlx::query("SELECT document FROM properties WHERE property_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let document: String = row.try_get("document").map_err(IngestError::from)?;
            serde_json::from_str(&document).map_err(IngestError::from)
        })
        .transpose()
    }

    /// Page through a ZIP code. Returns (properties, total_count).
    pub async fn search_by_zipcode(
        &self,
        zipcode: &str,
        skip: u32,
        limit: u32,
        sort_by: SortBy,
        sort_order: SortOrder,
    ) -> Result<(Vec<Property>, u64), IngestError> {
        let total_row = sqlx::query("SELECT COUNT(*) AS n FROM properties WHERE zipcode = ?")
            .bind(zipcode)
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = total_row.try_get("n").map_err(IngestError::from)?;

        // Sort column/order come from closed enums, not caller strings.
        let query = format!(
            "SELECT document FROM properties WHERE zipcode = ? \
             ORDER BY {} {} LIMIT ? OFFSET ?",
            sort_by.column(),
            sort_order.keyword()
        );
        let rows = sqlx::query(&query)
            .bind(zipcode)
            .bind(limit as i64)
            .bind(skip as i64)
            .fetch_all(&self.pool)
            .await?;

        let properties = rows
            .into_iter()
            .map(|row| {
                let document: String = row.try_get("document").map_err(IngestError::from)?;
                serde_json::from_str(&document).map_err(IngestError::from)
            })
            .collect::<Result<Vec<Property>, IngestError>>()?;

        Ok((properties, total as u64))
    }

    pub async fn get_recent_updates(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Property>, IngestError> {
        let rows = sqlx::query(
            "SELECT document FROM properties WHERE last_updated >= ? \
             ORDER BY last_updated DESC LIMIT ?",
        )
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let document: String = row.try_get("document").map_err(IngestError::from)?;
                serde_json::from_str(&document).map_err(IngestError::from)
            })
            .collect()
    }

    /// Price statistics over active listings with a known price.
    pub async fn get_price_statistics(
        &self,
        zipcode: &str,
    ) -> Result<PriceStatistics, IngestError> {
        let rows = sqlx::query(
            "SELECT current_price FROM properties \
             WHERE zipcode = ? AND is_active = 1 AND current_price IS NOT NULL \
             ORDER BY current_price ASC",
        )
        .bind(zipcode)
        .fetch_all(&self.pool)
        .await?;

        let prices = rows
            .into_iter()
            .map(|row| row.try_get::<f64, _>("current_price").map_err(IngestError::from))
            .collect::<Result<Vec<f64>, IngestError>>()?;

        if prices.is_empty() {
            return Ok(PriceStatistics::default());
        }

        let count = prices.len();
        let sum: f64 = prices.iter().sum();
        let median = if count % 2 == 1 {
            prices[count / 2]
        } else {
            (prices[count / 2 - 1] + prices[count / 2]) / 2.0
        };

        Ok(PriceStatistics {
            count: count as u64,
            avg: Some(sum / count as f64),
            min: prices.first().copied(),
            max: prices.last().copied(),
            median: Some(median),
        })
    }

    /// Price statistics over every active listing in the store, for the
    /// daily report.
    pub async fn price_statistics_all(&self) -> Result<PriceStatistics, IngestError> {
        let rows = sqlx::query(
            "SELECT current_price FROM properties \
             WHERE is_active = 1 AND current_price IS NOT NULL \
             ORDER BY current_price ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let prices = rows
            .into_iter()
            .map(|row| row.try_get::<f64, _>("current_price").map_err(IngestError::from))
            .collect::<Result<Vec<f64>, IngestError>>()?;

        if prices.is_empty() {
            return Ok(PriceStatistics::default());
        }

        let count = prices.len();
        let sum: f64 = prices.iter().sum();
        let median = if count % 2 == 1 {
            prices[count / 2]
        } else {
            (prices[count / 2 - 1] + prices[count / 2]) / 2.0
        };

        Ok(PriceStatistics {
            count: count as u64,
            avg: Some(sum / count as f64),
            min: prices.first().copied(),
            max: prices.last().copied(),
            median: Some(median),
        })
    }

    /// Append one price entry to an existing property. Returns false when
    /// the (date, price_type, source) tuple was already present.
    pub async fn add_price_history(
        &self,
        id: &str,
        entry: PropertyPrice,
    ) -> Result<bool, IngestError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT document FROM properties WHERE property_id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| IngestError::not_found(format!("no property with id {id}")))?;

        let document: String = row.try_get("document").map_err(IngestError::from)?;
        let mut property: Property = serde_json::from_str(&document)?;

        let appended = property.add_price(entry);
        if appended {
            property.last_updated = Utc::now();
            let document = serde_json::to_string(&property)?;
            sqlx::query(
                "UPDATE properties SET document = ?, current_price = ?, last_updated = ? \
                 WHERE property_id = ?",
            )
            .bind(&document)
            .bind(property.current_price)
            .bind(property.last_updated)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(appended)
    }

    // ========================================
    // Reports & runs
    // ========================================

    /// One report per UTC day, replaced on re-run.
    pub async fn upsert_daily_report(&self, report: &DailyReport) -> Result<(), IngestError> {
        let body = serde_json::to_string(report)?;
        sqlx::query(
            r#"INSERT INTO daily_reports (date, generated_at, report)
               VALUES (?, ?, ?)
               ON CONFLICT (date)
               DO UPDATE SET generated_at = excluded.generated_at,
                             report = excluded.report"#,
        )
        .bind(report.date.to_string())
        .bind(report.generated_at)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_daily_report(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailyReport>, IngestError> {
        let row = sqlx::query("SELECT report FROM daily_reports WHERE date = ?")
            .bind(date.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let body: String = row.try_get("report").map_err(IngestError::from)?;
            serde_json::from_str(&body).map_err(IngestError::from)
        })
        .transpose()
    }

    pub async fn record_collection_run(
        &self,
        metrics: &crate::models::CollectionRunMetrics,
    ) -> Result<(), IngestError> {
        let body = serde_json::to_string(metrics)?;
        sqlx::query(
            r#"INSERT INTO collection_runs (run_id, source, started_at, finished_at, metrics)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (run_id)
               DO UPDATE SET finished_at = excluded.finished_at,
                             metrics = excluded.metrics"#,
        )
        .bind(&metrics.run_id)
        .bind(&metrics.source)
        .bind(metrics.started_at)
        .bind(metrics.finished_at)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn collection_runs_on(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<crate::models::CollectionRunMetrics>, IngestError> {
        let rows = sqlx::query(
            "SELECT metrics FROM collection_runs WHERE date(started_at) = ? ORDER BY started_at ASC",
        )
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let body: String = row.try_get("metrics").map_err(IngestError::from)?;
                serde_json::from_str(&body).map_err(IngestError::from)
            })
            .collect()
    }

    // ========================================
    // Maintenance
    // ========================================

    /// Age-out sweep for terminal listings whose last observation is
    /// stale; upsert already computes this on write, the sweep catches
    /// rows nothing has touched since.
    pub async fn sweep_inactive(&self) -> Result<u64, IngestError> {
        let cutoff = Utc::now() - chrono::Duration::days(self.inactive_after_days);
        let result = sqlx::query(
            "UPDATE properties SET is_active = 0 \
             WHERE is_active = 1 \
               AND listing_status IN ('sold', 'off_market', 'withdrawn') \
               AND last_updated < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Liveness probe for health checks.
    pub async fn ping(&self) -> Result<(), IngestError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

//! Collection reporting models.
//!
//! A [`CollectionRunMetrics`] is produced per collector run; the
//! supervisor rolls runs up into one [`DailyReport`] per UTC day
//! (upsert-replace on re-run).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate price statistics over a set of properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PriceStatistics {
    pub count: u64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub median: Option<f64>,
}

/// Metrics for a single collector run over one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRunMetrics {
    pub run_id: String,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub zipcodes: Vec<String>,
    /// Properties collected keyed by zipcode
    pub by_zipcode: BTreeMap<String, u64>,
    pub properties_collected: u64,
    pub properties_stored: u64,
    pub failures: u64,
    pub dead_lettered: u64,
    pub requests_made: u64,
    pub rate_limit_hits: u64,
    /// Mean adapter quality score over collected records
    pub average_quality: Option<f64>,
}

impl CollectionRunMetrics {
    pub fn start(source: impl Into<String>, zipcodes: Vec<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            started_at: Utc::now(),
            finished_at: None,
            zipcodes,
            by_zipcode: BTreeMap::new(),
            properties_collected: 0,
            properties_stored: 0,
            failures: 0,
            dead_lettered: 0,
            requests_made: 0,
            rate_limit_hits: 0,
            average_quality: None,
        }
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.finished_at.map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// One report per UTC day; regenerating a day replaces the stored report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    /// Properties collected keyed by source tag
    pub by_source: BTreeMap<String, u64>,
    /// Properties collected keyed by zipcode
    pub by_zipcode: BTreeMap<String, u64>,
    pub price_stats: PriceStatistics,
    pub average_quality: Option<f64>,
    pub error_count: u64,
    pub warning_count: u64,
    pub total_duration_seconds: f64,
    pub requests_made: u64,
    pub rate_limit_hits: u64,
}

impl DailyReport {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            generated_at: Utc::now(),
            by_source: BTreeMap::new(),
            by_zipcode: BTreeMap::new(),
            price_stats: PriceStatistics::default(),
            average_quality: None,
            error_count: 0,
            warning_count: 0,
            total_duration_seconds: 0.0,
            requests_made: 0,
            rate_limit_hits: 0,
        }
    }
}

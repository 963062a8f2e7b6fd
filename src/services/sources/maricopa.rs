//! Maricopa County assessor API client.
//!
//! HTTPS-only JSON client. Every outbound call first passes the shared
//! rate limiter under the `maricopa_api` tag; transient failures are the
//! caller's (supervisor's) to retry, and this client only classifies them.
//! Anything this client logs or returns in an error has credential
//! material redacted.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::MaricopaConfig;
use crate::services::rate_limiter::RateLimiter;
use crate::utils::{IngestError, is_valid_zipcode, redact_text};

/// Source tag used for rate limiting and provenance.
pub const MARICOPA_SOURCE: &str = "maricopa_api";

pub struct MaricopaClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    rate_limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl MaricopaClient {
    /// Construction validates the base URL: HTTPS only, trailing slash
    /// stripped.
    pub fn new(
        config: &MaricopaConfig,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, IngestError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(IngestError::validation("assessor base URL cannot be empty"));
        }
        if !base_url.starts_with("https://") {
            return Err(IngestError::validation(
                "HTTPS-only communication required, HTTP URLs not allowed",
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(config.max_connections_per_host)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(IngestError::from)?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            rate_limiter,
            timeout: config.timeout(),
        })
    }

    /// All properties in a ZIP code; `page` is 1-based.
    pub async fn search_by_zipcode(
        &self,
        zipcode: &str,
        page: Option<u32>,
    ) -> Result<Vec<Value>, IngestError> {
        if !is_valid_zipcode(zipcode) {
            return Err(IngestError::validation(format!("invalid ZIP code format: {zipcode}")));
        }

        let mut path = format!("/search/property?zipcode={}", urlencoding::encode(zipcode));
        if let Some(page) = page {
            path.push_str(&format!("&page={page}"));
        }

        // 404 means the ZIP has no assessor data, not a failure.
        match self.get(&path).await {
            Ok(body) => Ok(extract_records(body)),
            Err(IngestError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Detail record for an assessor parcel number, `None` when absent.
    pub async fn get_property_details(&self, apn: &str) -> Result<Option<Value>, IngestError> {
        let apn = apn.trim();
        if apn.is_empty() {
            return Err(IngestError::validation("APN cannot be empty"));
        }

        match self.get(&format!("/parcel/{}", urlencoding::encode(apn))).await {
            Ok(body) => Ok(Some(body)),
            Err(IngestError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sales recorded in the last `days_back` days, `days_back` in (0, 365].
    pub async fn get_recent_sales(&self, days_back: u32) -> Result<Vec<Value>, IngestError> {
        if days_back == 0 {
            return Err(IngestError::validation("days_back must be positive"));
        }
        if days_back > 365 {
            return Err(IngestError::validation("days_back cannot exceed 365"));
        }

        // 404 means no sales in the window, not a failure.
        match self.get(&format!("/sales/recent?days={days_back}")).await {
            Ok(body) => Ok(extract_records(body)),
            Err(IngestError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// One rate-limited, authenticated GET with status classification.
    async fn get(&self, path: &str) -> Result<Value, IngestError> {
        self.rate_limiter.acquire(MARICOPA_SOURCE).await;

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %redact_text(&url), "assessor API request");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    IngestError::timeout(format!("assessor API timed out: {}", redact_text(path)))
                } else {
                    IngestError::network(format!(
                        "assessor API request failed: {}",
                        redact_text(&e.to_string())
                    ))
                }
            })?;

        let status = response.status();
        match status.as_u16() {
            200..=299 => response
                .json::<Value>()
                .await
                .map_err(|e| IngestError::parsing(format!("assessor API returned bad JSON: {e}"))),
            401 => Err(IngestError::auth("assessor API rejected credentials")),
            403 => Err(IngestError::permission("assessor API denied access")),
            404 => Err(IngestError::not_found(format!("no assessor data at {}", redact_text(path)))),
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(IngestError::rate_limit("assessor API rate limit", retry_after))
            }
            500..=599 => Err(IngestError::network(format!("assessor API returned {status}"))),
            _ => Err(IngestError::network(format!("assessor API returned unexpected {status}"))),
        }
    }
}

/// Responses wrap records under "results" or "properties"; bare arrays and
/// single objects also occur.
fn extract_records(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in ["results", "properties", "sales"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return items;
                }
            }
            if map.is_empty() { Vec::new() } else { vec![Value::Object(map)] }
        }
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

//! LLM-backed field extraction with deterministic regex fallback.
//!
//! The extractor prompts the local model for a single JSON object. When
//! the model is unreachable, times out, or returns something unparseable,
//! the regex fallback pulls address, price, bed/bath counts, square
//! footage, and year built straight from the text at reduced confidence.
//! Every call goes through the cache first; the `llm` circuit breaker is
//! consulted before any upstream contact.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};
use std::sync::Arc;

use super::cache::{ExtractionCache, extraction_cache_key};
use super::client::LlmClient;
use super::models::{ExtractionMethod, ExtractionResult};
use crate::services::supervisor::CircuitBreaker;
use crate::utils::{ErrorKind, IngestError};

/// Cap on fallback confidence.
const FALLBACK_MAX_CONFIDENCE: f64 = 0.5;

static STREET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,6}\s+(?:[NSEW]\.?\s+)?[A-Za-z0-9'.]+(?:\s+[A-Za-z0-9'.]+)*?\s+(?:Street|St|Avenue|Ave|Road|Rd|Drive|Dr|Lane|Ln|Boulevard|Blvd|Way|Court|Ct|Place|Pl|Trail|Trl|Parkway|Pkwy|Circle|Cir))\b",
    )
    .unwrap()
});
static CITY_STATE_ZIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z .]+?),\s*([A-Z]{2})\s*(\d{5}(?:-\d{4})?)").unwrap());
static PRICE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\s*([\d,]+(?:\.\d{2})?)").unwrap());
static BEDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})\s*(?:bed(?:room)?s?|bd|br)\b").unwrap());
static BATHS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2}(?:\.\d)?)\s*(?:bath(?:room)?s?|ba)\b").unwrap());
static SQFT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([\d,]+)\s*(?:sq\.?\s*ft|sqft|square\s*feet)").unwrap()
});
static YEAR_BUILT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:year\s*built|built)\D{0,10}((?:18|19|20)\d{2})").unwrap());

pub struct LlmExtractor {
    client: Arc<LlmClient>,
    cache: Arc<ExtractionCache>,
    breaker: Arc<CircuitBreaker>,
    prompt_version: String,
}

impl LlmExtractor {
    pub fn new(
        client: Arc<LlmClient>,
        cache: Arc<ExtractionCache>,
        breaker: Arc<CircuitBreaker>,
        prompt_version: impl Into<String>,
    ) -> Self {
        Self { client, cache, breaker, prompt_version: prompt_version.into() }
    }

    /// Extract structured fields from unstructured listing text.
    ///
    /// Cache-aside: a hit returns without contacting the LLM, and
    /// concurrent misses for the same (source, prompt version, text)
    /// coalesce into one upstream call.
    pub async fn extract(
        &self,
        text: &str,
        source_tag: &str,
    ) -> Result<ExtractionResult, IngestError> {
        let key = extraction_cache_key(source_tag, &self.prompt_version, text);
        self.cache.get_or_compute(&key, || self.extract_uncached(text, source_tag)).await
    }

    async fn extract_uncached(
        &self,
        text: &str,
        source_tag: &str,
    ) -> Result<ExtractionResult, IngestError> {
        // Breaker-open surfaces immediately, without upstream contact and
        // without falling back; callers treat it as retryable after cooldown.
        self.breaker.try_acquire()?;

        match self.client.chat_completion(&self.system_prompt(), &user_prompt(text)).await {
            Ok(content) => {
                self.breaker.record_success();
                if let Some(fields) = parse_json_object(&content) {
                    let confidence = fields
                        .get("confidence")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.9)
                        .clamp(0.0, 1.0);
                    metrics::counter!("extractions_total", 1, "method" => "llm");
                    return Ok(ExtractionResult {
                        fields: Value::Object(fields),
                        method: ExtractionMethod::Llm,
                        confidence,
                        source_tag: source_tag.to_string(),
                    });
                }

                tracing::warn!(source_tag, "LLM returned non-JSON output, trying regex fallback");
                self.fallback(text, source_tag).ok_or_else(|| {
                    IngestError::extraction("LLM output unparseable and regex fallback found nothing")
                })
            }
            Err(e) => {
                self.breaker.record_failure();
                let timed_out = e.kind() == ErrorKind::Timeout;
                tracing::warn!(source_tag, error = %e, "LLM call failed, trying regex fallback");
                match self.fallback(text, source_tag) {
                    Some(result) => Ok(result),
                    None if timed_out => {
                        Err(IngestError::timeout("extraction timed out and fallback found nothing"))
                    }
                    None => Err(e),
                }
            }
        }
    }

    fn fallback(&self, text: &str, source_tag: &str) -> Option<ExtractionResult> {
        let fields = fallback_extract(text)?;
        let confidence =
            (0.25 + 0.05 * fields.len() as f64).min(FALLBACK_MAX_CONFIDENCE);
        metrics::counter!("extractions_total", 1, "method" => "fallback");
        Some(ExtractionResult {
            fields: Value::Object(fields),
            method: ExtractionMethod::Fallback,
            confidence,
            source_tag: source_tag.to_string(),
        })
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a real-estate listing parser (prompt {version}). Extract the fields \
             street, city, state, zipcode, price, bedrooms, bathrooms, square_feet, \
             lot_size_sqft, year_built, property_type, listing_status, and mls_id from the \
             listing the user provides. Respond with exactly one JSON object containing the \
             fields you found; omit fields that are not present. Use plain numbers without \
             separators for numeric fields.",
            version = self.prompt_version
        )
    }
}

fn user_prompt(text: &str) -> String {
    // Listing bodies can be enormous; the interesting fields are up front.
    const MAX_CHARS: usize = 12_000;
    if text.len() <= MAX_CHARS {
        text.to_string()
    } else {
        let mut cut = MAX_CHARS;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text[..cut].to_string()
    }
}

/// Pull the first JSON object out of the response, tolerating code fences
/// and prose around it.
fn parse_json_object(content: &str) -> Option<Map<String, Value>> {
    let trimmed = content.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return Some(map);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Deterministic regex extraction. Returns `None` when nothing usable was
/// found.
pub fn fallback_extract(text: &str) -> Option<Map<String, Value>> {
    let mut fields = Map::new();

    if let Some(caps) = STREET.captures(text) {
        fields.insert("street".to_string(), json!(caps[1].trim()));
    }
    if let Some(caps) = CITY_STATE_ZIP.captures(text) {
        fields.insert("city".to_string(), json!(caps[1].trim()));
        fields.insert("state".to_string(), json!(caps[2].trim()));
        fields.insert("zipcode".to_string(), json!(caps[3].trim()));
    }
    if let Some(caps) = PRICE.captures(text)
        && let Ok(price) = caps[1].replace(',', "").parse::<f64>()
    {
        fields.insert("price".to_string(), json!(price));
    }
    if let Some(caps) = BEDS.captures(text)
        && let Ok(beds) = caps[1].parse::<i64>()
    {
        fields.insert("bedrooms".to_string(), json!(beds));
    }
    if let Some(caps) = BATHS.captures(text)
        && let Ok(baths) = caps[1].parse::<f64>()
    {
        fields.insert("bathrooms".to_string(), json!(baths));
    }
    if let Some(caps) = SQFT.captures(text)
        && let Ok(sqft) = caps[1].replace(',', "").parse::<i64>()
    {
        fields.insert("square_feet".to_string(), json!(sqft));
    }
    if let Some(caps) = YEAR_BUILT.captures(text)
        && let Ok(year) = caps[1].parse::<i64>()
    {
        fields.insert("year_built".to_string(), json!(year));
    }

    if fields.is_empty() { None } else { Some(fields) }
}

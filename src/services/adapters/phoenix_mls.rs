//! Adapter for Phoenix MLS listings.
//!
//! Input is the structured object produced by the extraction stage (LLM or
//! regex fallback) from a listing's rendered HTML, mostly flat fields.
//! Listing prices carry the extraction confidence.

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{PropertyAdapter, first_usable, string_field};
use crate::models::{
    Address, DataCollectionMetadata, ListingInfo, ListingStatus, MIN_YEAR_BUILT, Property,
    PropertyFeatures, PropertyPrice, PropertyType, PriceType, max_year_built,
};
use crate::services::scraper::PHOENIX_MLS_SOURCE;
use crate::utils::{
    IngestError, hash_raw_payload, is_valid_zipcode, make_property_id, parse_f64_flexible,
    parse_i64_flexible,
};

/// Weighted critical fields for the quality score; weights sum to 1.
const QUALITY_WEIGHTS: &[(&str, f64)] = &[
    ("street", 0.20),
    ("zipcode", 0.15),
    ("price", 0.15),
    ("bedrooms", 0.10),
    ("bathrooms", 0.10),
    ("square_feet", 0.10),
    ("year_built", 0.05),
    ("property_type", 0.05),
    ("listing_status", 0.05),
    ("mls_id", 0.05),
];

pub struct PhoenixMlsAdapter {
    collector_version: String,
}

impl PhoenixMlsAdapter {
    pub fn new(collector_version: impl Into<String>) -> Self {
        Self { collector_version: collector_version.into() }
    }

    /// Adapt with an explicit price confidence (the extraction stage passes
    /// its own confidence through here).
    pub fn adapt_with_confidence(
        &self,
        raw: &Value,
        confidence: f64,
    ) -> Result<Property, IngestError> {
        let fields = raw
            .as_object()
            .ok_or_else(|| IngestError::validation("extracted listing is not an object"))?;

        let street = string_field(fields, &["street", "address"])
            .ok_or_else(|| IngestError::validation("missing required field: street"))?;
        let zipcode = string_field(fields, &["zipcode", "zip_code", "zip"])
            .ok_or_else(|| IngestError::validation("missing required field: zipcode"))?;
        if !is_valid_zipcode(&zipcode) {
            return Err(IngestError::validation(format!("invalid ZIP code format: {zipcode}")));
        }

        let address = Address {
            street: street.clone(),
            city: string_field(fields, &["city"]).unwrap_or_else(|| "Phoenix".to_string()),
            state: string_field(fields, &["state"]).unwrap_or_else(|| "AZ".to_string()),
            zipcode: zipcode.clone(),
            county: Some("Maricopa".to_string()),
        };

        let metadata = DataCollectionMetadata {
            source: self.source_name().to_string(),
            collected_at: Utc::now(),
            collector_version: self.collector_version.clone(),
            raw_data_hash: hash_raw_payload(raw),
            quality_score: self.quality_score(fields),
        };

        let now = Utc::now();
        let mut property = Property {
            property_id: make_property_id("phoenix_mls", &street, &zipcode),
            address,
            property_type: string_field(fields, &["property_type"])
                .map(|s| PropertyType::parse(&s))
                .unwrap_or_default(),
            features: self.extract_features(fields),
            price_history: Vec::new(),
            current_price: None,
            listing: Some(self.extract_listing(fields)),
            tax_info: None,
            sources: vec![metadata],
            raw_data: BTreeMap::from([(self.source_name().to_string(), raw.clone())]),
            first_seen: now,
            last_updated: now,
            is_active: true,
        };

        if let Some(amount) = first_usable(fields, &["price", "listing_price"])
            .and_then(parse_f64_flexible)
            .filter(|p| *p > 0.0 && *p <= crate::models::MAX_PRICE)
        {
            property.add_price(PropertyPrice {
                amount,
                observed_on: now.date_naive(),
                price_type: PriceType::Listing,
                source: self.source_name().to_string(),
                confidence,
            });
        }

        Ok(property)
    }

    fn extract_features(&self, fields: &Map<String, Value>) -> PropertyFeatures {
        let now = Utc::now();
        PropertyFeatures {
            bedrooms: first_usable(fields, &["bedrooms", "beds"])
                .and_then(parse_i64_flexible)
                .filter(|n| (0..=20).contains(n)),
            bathrooms: first_usable(fields, &["bathrooms", "baths"])
                .and_then(parse_f64_flexible)
                .filter(|n| *n >= 0.0),
            half_bathrooms: first_usable(fields, &["half_bathrooms"]).and_then(parse_i64_flexible),
            square_feet: first_usable(fields, &["square_feet", "sqft"])
                .and_then(parse_i64_flexible)
                .filter(|n| *n >= crate::models::MIN_SQUARE_FEET),
            lot_size_sqft: first_usable(fields, &["lot_size_sqft", "lot_size"])
                .and_then(parse_i64_flexible)
                .filter(|n| *n >= crate::models::MIN_SQUARE_FEET),
            year_built: first_usable(fields, &["year_built"])
                .and_then(parse_i64_flexible)
                .map(|y| y as i32)
                .filter(|y| (MIN_YEAR_BUILT..=max_year_built(now)).contains(y)),
            floors: first_usable(fields, &["floors", "stories"]).and_then(parse_f64_flexible),
            garage_spaces: first_usable(fields, &["garage_spaces"]).and_then(parse_i64_flexible),
            pool: fields.get("pool").and_then(crate::utils::parse_tristate),
            fireplace: fields.get("fireplace").and_then(crate::utils::parse_tristate),
            ac_type: string_field(fields, &["ac_type"]),
            heating_type: string_field(fields, &["heating_type"]),
        }
    }

    fn extract_listing(&self, fields: &Map<String, Value>) -> ListingInfo {
        ListingInfo {
            status: string_field(fields, &["listing_status", "status"])
                .map(|s| ListingStatus::parse(&s))
                .unwrap_or_default(),
            mls_id: string_field(fields, &["mls_id", "mls_number"]),
            listing_date: string_field(fields, &["listing_date"]).and_then(|s| s.parse().ok()),
            agent: string_field(fields, &["agent", "listing_agent"]),
            photo_urls: fields
                .get("photo_urls")
                .and_then(Value::as_array)
                .map(|urls| {
                    urls.iter().filter_map(Value::as_str).map(str::to_string).collect()
                })
                .unwrap_or_default(),
        }
    }

    fn quality_score(&self, fields: &Map<String, Value>) -> f64 {
        let mut score = 0.0;
        for &(field, weight) in QUALITY_WEIGHTS {
            if first_usable(fields, &[field]).is_some() {
                score += weight;
            }
        }
        score.clamp(0.0, 1.0)
    }
}

impl PropertyAdapter for PhoenixMlsAdapter {
    fn source_name(&self) -> &'static str {
        PHOENIX_MLS_SOURCE
    }

    fn adapt(&self, raw: &Value) -> Result<Property, IngestError> {
        // Extraction confidence rides along in the object when the pipeline
        // does not pass one explicitly.
        let confidence = raw
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.8)
            .clamp(0.0, 1.0);
        self.adapt_with_confidence(raw, confidence)
    }
}

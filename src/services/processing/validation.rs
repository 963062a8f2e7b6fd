//! Canonical-schema validation.
//!
//! Pure and deterministic: `validate_at` takes the evaluation time
//! explicitly, performs no I/O, and always returns per-field outcomes
//! alongside the aggregate quality metrics.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use super::models::{FieldOutcome, QualityMetrics, ValidationResult};
use crate::models::{
    MAX_PRICE, MIN_SQUARE_FEET, MIN_YEAR_BUILT, Property, max_tax_year, max_year_built,
};
use crate::utils::is_valid_zipcode;

static PROPERTY_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\-]+$").unwrap());

pub struct Validator;

impl Validator {
    pub fn validate(property: &Property) -> ValidationResult {
        Self::validate_at(property, Utc::now())
    }

    pub fn validate_at(property: &Property, now: DateTime<Utc>) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut fields = BTreeMap::new();

        // --- identity ---
        if property.property_id.is_empty() || !PROPERTY_ID.is_match(&property.property_id) {
            errors.push(format!("invalid property_id: {:?}", property.property_id));
            fields.insert("property_id".to_string(), FieldOutcome::Invalid);
        } else {
            fields.insert("property_id".to_string(), FieldOutcome::Valid);
        }

        // --- address ---
        if property.address.street.trim().is_empty() {
            errors.push("address.street is empty".to_string());
            fields.insert("address.street".to_string(), FieldOutcome::Missing);
        } else {
            fields.insert("address.street".to_string(), FieldOutcome::Valid);
        }
        if is_valid_zipcode(&property.address.zipcode) {
            fields.insert("address.zipcode".to_string(), FieldOutcome::Valid);
        } else {
            errors.push(format!("invalid ZIP code format: {}", property.address.zipcode));
            fields.insert("address.zipcode".to_string(), FieldOutcome::Invalid);
        }

        // --- features ---
        match property.features.bedrooms {
            Some(beds) if !(0..=20).contains(&beds) => {
                errors.push(format!("bedrooms out of range: {beds}"));
                fields.insert("features.bedrooms".to_string(), FieldOutcome::Invalid);
            }
            Some(_) => {
                fields.insert("features.bedrooms".to_string(), FieldOutcome::Valid);
            }
            None => {
                fields.insert("features.bedrooms".to_string(), FieldOutcome::Missing);
            }
        }
        match property.features.bathrooms {
            Some(baths) if baths < 0.0 => {
                errors.push(format!("bathrooms negative: {baths}"));
                fields.insert("features.bathrooms".to_string(), FieldOutcome::Invalid);
            }
            Some(_) => {
                fields.insert("features.bathrooms".to_string(), FieldOutcome::Valid);
            }
            None => {
                fields.insert("features.bathrooms".to_string(), FieldOutcome::Missing);
            }
        }
        match property.features.square_feet {
            Some(sqft) if sqft < MIN_SQUARE_FEET => {
                errors.push(format!("square_feet below minimum: {sqft}"));
                fields.insert("features.square_feet".to_string(), FieldOutcome::Invalid);
            }
            Some(_) => {
                fields.insert("features.square_feet".to_string(), FieldOutcome::Valid);
            }
            None => {
                warnings.push("square_feet missing".to_string());
                fields.insert("features.square_feet".to_string(), FieldOutcome::Missing);
            }
        }
        match property.features.year_built {
            Some(year) if !(MIN_YEAR_BUILT..=max_year_built(now)).contains(&year) => {
                errors.push(format!("year_built out of range: {year}"));
                fields.insert("features.year_built".to_string(), FieldOutcome::Invalid);
            }
            Some(_) => {
                fields.insert("features.year_built".to_string(), FieldOutcome::Valid);
            }
            None => {
                fields.insert("features.year_built".to_string(), FieldOutcome::Missing);
            }
        }

        // --- cross-field sanity ---
        if let (Some(sqft), Some(lot)) =
            (property.features.square_feet, property.features.lot_size_sqft)
            && lot < sqft
        {
            warnings.push(format!("lot size {lot} below living area {sqft}"));
        }
        if let Some(listing) = &property.listing
            && let Some(listed) = listing.listing_date
            && listed > now.date_naive()
        {
            warnings.push(format!("listing date {listed} is in the future"));
        }

        // --- prices ---
        let mut prices_ok = true;
        for price in &property.price_history {
            if price.amount < 0.0 || price.amount > MAX_PRICE {
                errors.push(format!("price out of range: {}", price.amount));
                prices_ok = false;
            }
            if !(0.0..=1.0).contains(&price.confidence) {
                errors.push(format!("price confidence out of range: {}", price.confidence));
                prices_ok = false;
            }
        }
        let ordered = property
            .price_history
            .windows(2)
            .all(|pair| pair[0].observed_on <= pair[1].observed_on);
        if !ordered {
            errors.push("price_history not ordered by observation date".to_string());
            prices_ok = false;
        }
        fields.insert(
            "price_history".to_string(),
            if property.price_history.is_empty() {
                FieldOutcome::Missing
            } else if prices_ok {
                FieldOutcome::Valid
            } else {
                FieldOutcome::Invalid
            },
        );

        // --- tax info ---
        if let Some(tax) = &property.tax_info {
            match tax.tax_year {
                Some(year) if !(1900..=max_tax_year(now)).contains(&year) => {
                    errors.push(format!("tax_year out of range: {year}"));
                    fields.insert("tax_info.tax_year".to_string(), FieldOutcome::Invalid);
                }
                Some(_) => {
                    fields.insert("tax_info.tax_year".to_string(), FieldOutcome::Valid);
                }
                None => {
                    fields.insert("tax_info.tax_year".to_string(), FieldOutcome::Missing);
                }
            }
        }

        // --- provenance ---
        if property.sources.is_empty() {
            errors.push("property has no collection sources".to_string());
            fields.insert("sources".to_string(), FieldOutcome::Missing);
        } else {
            fields.insert("sources".to_string(), FieldOutcome::Valid);
        }

        let quality_metrics = Self::quality_metrics(property, &fields, errors.is_empty(), now);
        let confidence_score = 0.4 * quality_metrics.completeness
            + 0.3 * quality_metrics.consistency
            + 0.2 * quality_metrics.accuracy
            + 0.1 * quality_metrics.timeliness;

        ValidationResult {
            is_valid: errors.is_empty(),
            confidence_score,
            errors,
            warnings,
            field_validations: fields,
            quality_metrics,
        }
    }

    fn quality_metrics(
        property: &Property,
        fields: &BTreeMap<String, FieldOutcome>,
        consistent: bool,
        now: DateTime<Utc>,
    ) -> QualityMetrics {
        let total = fields.len().max(1);
        let present =
            fields.values().filter(|outcome| **outcome != FieldOutcome::Missing).count();
        let valid = fields.values().filter(|outcome| **outcome == FieldOutcome::Valid).count();

        let accuracy = if property.sources.is_empty() {
            0.0
        } else {
            property.sources.iter().map(|m| m.quality_score).sum::<f64>()
                / property.sources.len() as f64
        };

        let timeliness = match property.latest_observation() {
            Some(seen) => {
                let age_days = (now - seen).num_days().max(0) as f64;
                // Full credit inside a week, linear decay to zero at 90 days.
                (1.0 - ((age_days - 7.0) / 83.0).clamp(0.0, 1.0)).clamp(0.0, 1.0)
            }
            None => 0.0,
        };

        QualityMetrics {
            completeness: present as f64 / total as f64,
            consistency: if consistent { 1.0 } else { valid as f64 / total as f64 },
            accuracy,
            timeliness,
        }
    }
}

//! Adapter for Maricopa County assessor API records.
//!
//! The assessor nests everything under `address` / `characteristics` /
//! `assessment` / `property_info` / `sales` groups. City, state, and
//! county default to the source convention (Phoenix, AZ, Maricopa).

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{PropertyAdapter, first_usable, object, string_field};
use crate::services::sources::MARICOPA_SOURCE;
use crate::models::{
    Address, DataCollectionMetadata, MIN_YEAR_BUILT, Property, PropertyFeatures, PropertyPrice,
    PropertyType, PriceType, TaxInfo, max_tax_year, max_year_built,
};
use crate::utils::{
    IngestError, hash_raw_payload, is_valid_zipcode, make_property_id, parse_f64_flexible,
    parse_i64_flexible, parse_tristate,
};

/// Weighted critical fields for the quality score; weights sum to 1.
const QUALITY_WEIGHTS: &[(&str, &str, f64)] = &[
    ("address", "house_number", 0.15),
    ("address", "street_name", 0.15),
    ("address", "zipcode", 0.10),
    ("characteristics", "bedrooms", 0.10),
    ("characteristics", "bathrooms", 0.10),
    ("characteristics", "living_area_sqft", 0.10),
    ("characteristics", "year_built", 0.05),
    ("assessment", "market_value", 0.10),
    ("assessment", "assessed_value", 0.10),
    ("property_info", "apn", 0.05),
];

pub struct MaricopaAdapter {
    collector_version: String,
}

impl MaricopaAdapter {
    pub fn new(collector_version: impl Into<String>) -> Self {
        Self { collector_version: collector_version.into() }
    }

    /// Required sections and fields; everything else is optional.
    fn validate_raw(&self, raw: &Value) -> Result<(), IngestError> {
        let Some(address) = object(raw, "address") else {
            return Err(IngestError::validation("missing or invalid address section"));
        };
        for field in ["house_number", "street_name", "zipcode"] {
            if string_field(address, &[field]).is_none() {
                return Err(IngestError::validation(format!(
                    "missing required address field: {field}"
                )));
            }
        }
        Ok(())
    }

    fn extract_address(&self, address: &Map<String, Value>) -> Result<Address, IngestError> {
        let house_number = string_field(address, &["house_number"]).unwrap_or_default();
        let street_name = string_field(address, &["street_name"]).unwrap_or_default();
        let street_type = string_field(address, &["street_type"]).unwrap_or_default();

        let mut street = format!("{house_number} {street_name}");
        if !street_type.is_empty() {
            street.push(' ');
            street.push_str(&street_type);
        }
        if let Some(unit) = string_field(address, &["unit"]) {
            street.push_str(&format!(", Unit {unit}"));
        }

        let zipcode = string_field(address, &["zipcode"]).unwrap_or_default();
        if !is_valid_zipcode(&zipcode) {
            return Err(IngestError::validation(format!("invalid ZIP code format: {zipcode}")));
        }

        Ok(Address {
            street,
            city: string_field(address, &["city"]).unwrap_or_else(|| "Phoenix".to_string()),
            state: string_field(address, &["state"]).unwrap_or_else(|| "AZ".to_string()),
            zipcode,
            county: Some(
                string_field(address, &["county"]).unwrap_or_else(|| "Maricopa".to_string()),
            ),
        })
    }

    fn extract_features(&self, characteristics: &Map<String, Value>) -> PropertyFeatures {
        let now = Utc::now();

        // Zero bedrooms/garage is the assessor's "not recorded" sentinel.
        let bedrooms = first_usable(characteristics, &["bedrooms", "beds"])
            .and_then(parse_i64_flexible)
            .filter(|n| (1..=20).contains(n));
        let garage_spaces = first_usable(characteristics, &["garage_spaces", "garage"])
            .and_then(parse_i64_flexible)
            .filter(|n| *n > 0);

        let year_built = first_usable(characteristics, &["year_built"])
            .and_then(parse_i64_flexible)
            .map(|y| y as i32)
            .filter(|y| (MIN_YEAR_BUILT..=max_year_built(now)).contains(y));

        PropertyFeatures {
            bedrooms,
            bathrooms: first_usable(characteristics, &["bathrooms", "baths"])
                .and_then(parse_f64_flexible)
                .filter(|n| *n >= 0.0),
            half_bathrooms: first_usable(characteristics, &["half_bathrooms"])
                .and_then(parse_i64_flexible),
            square_feet: first_usable(characteristics, &["living_area_sqft", "square_feet"])
                .and_then(parse_i64_flexible)
                .filter(|n| *n >= crate::models::MIN_SQUARE_FEET),
            lot_size_sqft: first_usable(characteristics, &["lot_size_sqft", "lot_size"])
                .and_then(parse_i64_flexible)
                .filter(|n| *n >= crate::models::MIN_SQUARE_FEET),
            year_built,
            floors: first_usable(characteristics, &["floors", "stories"])
                .and_then(parse_f64_flexible),
            garage_spaces,
            pool: characteristics.get("pool").and_then(parse_tristate),
            fireplace: characteristics.get("fireplace").and_then(parse_tristate),
            ac_type: string_field(characteristics, &["ac_type", "cooling"]),
            heating_type: string_field(characteristics, &["heating_type", "heating"]),
        }
    }

    /// Every price type the assessment carries, highest amount first.
    fn extract_prices(&self, raw: &Value) -> Vec<PropertyPrice> {
        let today = Utc::now().date_naive();
        let mut prices = Vec::new();

        if let Some(assessment) = object(raw, "assessment") {
            let mapping: &[(&str, PriceType, f64)] = &[
                ("market_value", PriceType::MarketEstimate, 0.9),
                ("assessed_value", PriceType::Assessed, 0.85),
                ("land_value", PriceType::LandValue, 0.8),
                ("improvement_value", PriceType::ImprovementValue, 0.8),
            ];
            for &(key, price_type, confidence) in mapping {
                if let Some(amount) = first_usable(assessment, &[key]).and_then(parse_f64_flexible)
                    && amount > 0.0
                    && amount <= crate::models::MAX_PRICE
                {
                    prices.push(PropertyPrice {
                        amount,
                        observed_on: today,
                        price_type,
                        source: MARICOPA_SOURCE.to_string(),
                        confidence,
                    });
                }
            }
        }

        if let Some(sales) = object(raw, "sales")
            && let Some(amount) =
                first_usable(sales, &["last_sale_price"]).and_then(parse_f64_flexible)
            && amount > 0.0
            && amount <= crate::models::MAX_PRICE
        {
            let observed_on = string_field(sales, &["last_sale_date"])
                .and_then(|s| s.parse().ok())
                .unwrap_or(today);
            prices.push(PropertyPrice {
                amount,
                observed_on,
                price_type: PriceType::Sale,
                source: MARICOPA_SOURCE.to_string(),
                confidence: 0.9,
            });
        }

        prices.sort_by(|a, b| b.amount.partial_cmp(&a.amount).unwrap_or(std::cmp::Ordering::Equal));
        prices
    }

    fn extract_tax_info(&self, raw: &Value) -> Option<TaxInfo> {
        let assessment = object(raw, "assessment");
        let property_info = object(raw, "property_info");
        let now = Utc::now();

        let tax_info = TaxInfo {
            apn: property_info.and_then(|m| string_field(m, &["apn"])),
            assessed_value: assessment
                .and_then(|m| first_usable(m, &["assessed_value"]))
                .and_then(parse_f64_flexible),
            tax_amount_annual: assessment
                .and_then(|m| first_usable(m, &["tax_amount", "tax_amount_annual"]))
                .and_then(parse_f64_flexible),
            tax_year: assessment
                .and_then(|m| first_usable(m, &["tax_year"]))
                .and_then(parse_i64_flexible)
                .map(|y| y as i32)
                .filter(|y| (1900..=max_tax_year(now)).contains(y)),
        };

        if tax_info.apn.is_none()
            && tax_info.assessed_value.is_none()
            && tax_info.tax_amount_annual.is_none()
            && tax_info.tax_year.is_none()
        {
            None
        } else {
            Some(tax_info)
        }
    }

    /// Weighted completeness over the critical field set.
    fn quality_score(&self, raw: &Value) -> f64 {
        let mut score = 0.0;
        for &(section, field, weight) in QUALITY_WEIGHTS {
            if let Some(map) = object(raw, section)
                && first_usable(map, &[field]).is_some()
            {
                score += weight;
            }
        }
        score.clamp(0.0, 1.0)
    }
}

fn property_type_of(raw: &Value) -> PropertyType {
    object(raw, "property_info")
        .and_then(|m| string_field(m, &["property_type"]))
        .map(|s| PropertyType::parse(&s))
        .unwrap_or_default()
}

impl PropertyAdapter for MaricopaAdapter {
    fn source_name(&self) -> &'static str {
        MARICOPA_SOURCE
    }

    fn adapt(&self, raw: &Value) -> Result<Property, IngestError> {
        self.validate_raw(raw)?;

        let address_map = object(raw, "address").expect("validated above");
        let address = self.extract_address(address_map)?;

        let features = object(raw, "characteristics")
            .map(|m| self.extract_features(m))
            .unwrap_or_default();

        let metadata = DataCollectionMetadata {
            source: self.source_name().to_string(),
            collected_at: Utc::now(),
            collector_version: self.collector_version.clone(),
            raw_data_hash: hash_raw_payload(raw),
            quality_score: self.quality_score(raw),
        };

        let now = Utc::now();
        let mut property = Property {
            property_id: make_property_id("maricopa", &address.street, &address.zipcode),
            address,
            property_type: property_type_of(raw),
            features,
            price_history: Vec::new(),
            current_price: None,
            listing: None,
            tax_info: self.extract_tax_info(raw),
            sources: vec![metadata],
            raw_data: BTreeMap::from([(self.source_name().to_string(), raw.clone())]),
            first_seen: now,
            last_updated: now,
            is_active: true,
        };

        for price in self.extract_prices(raw) {
            property.add_price(price);
        }

        Ok(property)
    }
}

// Common test utilities and helpers

use chrono::Utc;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::models::{
    Address, DataCollectionMetadata, ListingInfo, ListingStatus, Property, PropertyFeatures,
    PropertyPrice, PropertyType, PriceType,
};

/// Create an in-memory SQLite database with the full schema
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    crate::db::create_schema(&pool)
        .await
        .expect("Failed to create schema");

    pool
}

/// Complete assessor API record matching the source's nested convention
pub fn sample_maricopa_record() -> Value {
    json!({
        "address": {
            "house_number": "123",
            "street_name": "Main",
            "street_type": "St",
            "unit": "A",
            "city": "Phoenix",
            "state": "AZ",
            "zipcode": "85001"
        },
        "characteristics": {
            "bedrooms": 3,
            "bathrooms": 2.5,
            "half_bathrooms": 1,
            "living_area_sqft": 1850,
            "lot_size_sqft": 7200,
            "year_built": 2010,
            "floors": 2.0,
            "garage_spaces": 2,
            "pool": "yes",
            "fireplace": "true",
            "ac_type": "Central",
            "heating_type": "Gas"
        },
        "assessment": {
            "assessed_value": 300000,
            "market_value": 350000,
            "land_value": 100000,
            "improvement_value": 250000,
            "tax_amount": 3500,
            "tax_year": 2024
        },
        "property_info": {
            "apn": "123-45-678",
            "property_type": "Single Family",
            "subdivision": "Main Estates"
        },
        "sales": {
            "last_sale_price": 325000,
            "last_sale_date": "2023-05-15"
        }
    })
}

/// Minimal valid assessor record (required address fields only)
pub fn minimal_maricopa_record() -> Value {
    json!({
        "address": {
            "house_number": "456",
            "street_name": "Oak",
            "street_type": "Ave",
            "zipcode": "85002"
        },
        "characteristics": {},
        "assessment": {}
    })
}

/// Canonical property for repository tests
pub fn sample_property(id: &str, zipcode: &str) -> Property {
    let now = Utc::now();
    Property {
        property_id: id.to_string(),
        address: Address {
            street: "123 Main St".to_string(),
            city: "Phoenix".to_string(),
            state: "AZ".to_string(),
            zipcode: zipcode.to_string(),
            county: Some("Maricopa".to_string()),
        },
        property_type: PropertyType::SingleFamily,
        features: PropertyFeatures {
            bedrooms: Some(3),
            bathrooms: Some(2.0),
            square_feet: Some(1500),
            ..Default::default()
        },
        price_history: Vec::new(),
        current_price: None,
        listing: Some(ListingInfo { status: ListingStatus::Active, ..Default::default() }),
        tax_info: None,
        sources: vec![DataCollectionMetadata {
            source: "maricopa_api".to_string(),
            collected_at: now,
            collector_version: "1.0.0".to_string(),
            raw_data_hash: "0".repeat(64),
            quality_score: 0.9,
        }],
        raw_data: BTreeMap::new(),
        first_seen: now,
        last_updated: now,
        is_active: true,
    }
}

pub fn price(amount: f64, date: &str, price_type: PriceType, confidence: f64) -> PropertyPrice {
    PropertyPrice {
        amount,
        observed_on: date.parse().expect("valid date literal"),
        price_type,
        source: "maricopa_api".to_string(),
        confidence,
    }
}

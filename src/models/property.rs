//! Canonical property schema.
//!
//! Every source payload is normalized into [`Property`] before it reaches
//! the pipeline or the repository. Entities are immutable after creation
//! except for the merge points used by upsert (`price_history` append,
//! `sources` union, scalar replacement).

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Upper bound accepted for any price amount.
pub const MAX_PRICE: f64 = 50_000_000.0;

/// Lower bound accepted for living area and lot size.
pub const MIN_SQUARE_FEET: i64 = 100;

/// Oldest acceptable construction year.
pub const MIN_YEAR_BUILT: i32 = 1800;

// ============================================================================
// Enumerations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    SingleFamily,
    Townhouse,
    Condo,
    MultiFamily,
    Manufactured,
    Lot,
    Commercial,
    #[default]
    Unknown,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleFamily => "single_family",
            Self::Townhouse => "townhouse",
            Self::Condo => "condo",
            Self::MultiFamily => "multi_family",
            Self::Manufactured => "manufactured",
            Self::Lot => "lot",
            Self::Commercial => "commercial",
            Self::Unknown => "unknown",
        }
    }

    /// Recognize the free-text spellings the sources use
    /// ("Single Family Residence", "CONDOMINIUM", "Twnhs", ...).
    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        if lower.is_empty() {
            return Self::Unknown;
        }
        if lower.contains("single") || lower.contains("sfr") {
            Self::SingleFamily
        } else if lower.contains("town") || lower.contains("twnhs") {
            Self::Townhouse
        } else if lower.contains("condo") || lower.contains("apartment") {
            Self::Condo
        } else if lower.contains("multi") || lower.contains("duplex") || lower.contains("triplex") {
            Self::MultiFamily
        } else if lower.contains("manufactured") || lower.contains("mobile") {
            Self::Manufactured
        } else if lower.contains("lot") || lower.contains("land") || lower.contains("vacant") {
            Self::Lot
        } else if lower.contains("commercial") || lower.contains("retail") || lower.contains("office")
        {
            Self::Commercial
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    Listing,
    Sale,
    Assessed,
    MarketEstimate,
    LandValue,
    ImprovementValue,
}

impl PriceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::Sale => "sale",
            Self::Assessed => "assessed",
            Self::MarketEstimate => "market_estimate",
            Self::LandValue => "land_value",
            Self::ImprovementValue => "improvement_value",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Pending,
    Sold,
    OffMarket,
    Withdrawn,
    #[default]
    Unknown,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Sold => "sold",
            Self::OffMarket => "off_market",
            Self::Withdrawn => "withdrawn",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        if lower.contains("active") || lower.contains("for sale") {
            Self::Active
        } else if lower.contains("pending") || lower.contains("under contract") {
            Self::Pending
        } else if lower.contains("sold") || lower.contains("closed") {
            Self::Sold
        } else if lower.contains("off") {
            Self::OffMarket
        } else if lower.contains("withdrawn") || lower.contains("cancel") {
            Self::Withdrawn
        } else {
            Self::Unknown
        }
    }

    /// Statuses after which a listing no longer counts as live inventory.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sold | Self::OffMarket | Self::Withdrawn)
    }
}

// ============================================================================
// Components
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zipcode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub county: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PropertyFeatures {
    pub bedrooms: Option<i64>,
    /// Half-step values (2.5 etc.)
    pub bathrooms: Option<f64>,
    pub half_bathrooms: Option<i64>,
    pub square_feet: Option<i64>,
    pub lot_size_sqft: Option<i64>,
    pub year_built: Option<i32>,
    pub floors: Option<f64>,
    pub garage_spaces: Option<i64>,
    /// Tri-state: `None` = unknown
    pub pool: Option<bool>,
    pub fireplace: Option<bool>,
    pub ac_type: Option<String>,
    pub heating_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyPrice {
    pub amount: f64,
    pub observed_on: NaiveDate,
    pub price_type: PriceType,
    pub source: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

impl PropertyPrice {
    /// Identity used for idempotent history appends.
    pub fn dedup_key(&self) -> (NaiveDate, PriceType, &str) {
        (self.observed_on, self.price_type, self.source.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ListingInfo {
    pub status: ListingStatus,
    pub mls_id: Option<String>,
    pub listing_date: Option<NaiveDate>,
    pub agent: Option<String>,
    pub photo_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TaxInfo {
    pub apn: Option<String>,
    pub assessed_value: Option<f64>,
    pub tax_amount_annual: Option<f64>,
    pub tax_year: Option<i32>,
}

/// Provenance of one observation of this property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCollectionMetadata {
    pub source: String,
    pub collected_at: DateTime<Utc>,
    pub collector_version: String,
    /// SHA-256 hex of the canonical-JSON raw payload
    pub raw_data_hash: String,
    /// Weighted completeness score in [0, 1]
    pub quality_score: f64,
}

// ============================================================================
// Property
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// `<source>_<normalized-street>_<zipcode>`, unique in the repository
    pub property_id: String,
    pub address: Address,
    pub property_type: PropertyType,
    pub features: PropertyFeatures,
    /// Append-only, ordered by observation date non-decreasing;
    /// equal dates keep insertion order.
    pub price_history: Vec<PropertyPrice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<ListingInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_info: Option<TaxInfo>,
    pub sources: Vec<DataCollectionMetadata>,
    /// Original payload per source tag, retained for reprocessing
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub raw_data: BTreeMap<String, Value>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub is_active: bool,
}

impl Property {
    /// Insert a price entry keeping `price_history` ordered by observation
    /// date non-decreasing; an entry dated equal to existing ones lands
    /// after them, preserving insertion order. Duplicate
    /// (date, price_type, source) tuples are ignored.
    ///
    /// Returns true when the entry was appended.
    pub fn add_price(&mut self, entry: PropertyPrice) -> bool {
        if self.price_history.iter().any(|p| p.dedup_key() == entry.dedup_key()) {
            return false;
        }
        let pos = self
            .price_history
            .iter()
            .rposition(|p| p.observed_on <= entry.observed_on)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.price_history.insert(pos, entry);
        self.recompute_current_price();
        true
    }

    /// Highest-confidence non-zero amount; ties broken by the most recent
    /// observation date.
    pub fn recompute_current_price(&mut self) {
        self.current_price = self
            .price_history
            .iter()
            .filter(|p| p.amount > 0.0)
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.observed_on.cmp(&b.observed_on))
            })
            .map(|p| p.amount);
    }

    /// Merge a fresh observation of the same property into this record:
    /// scalars replace, price history appends entries not already present
    /// by (date, price_type, source), sources union, raw payloads merge
    /// per source tag.
    pub fn merge_observation(&mut self, incoming: Property) {
        self.address = incoming.address;
        if incoming.property_type != PropertyType::Unknown {
            self.property_type = incoming.property_type;
        }
        self.features = incoming.features;
        if incoming.listing.is_some() {
            self.listing = incoming.listing;
        }
        if incoming.tax_info.is_some() {
            self.tax_info = incoming.tax_info;
        }

        for price in incoming.price_history {
            self.add_price(price);
        }

        for meta in incoming.sources {
            let already = self.sources.iter().any(|m| {
                m.source == meta.source
                    && m.raw_data_hash == meta.raw_data_hash
                    && m.collected_at == meta.collected_at
            });
            if !already {
                self.sources.push(meta);
            }
        }

        for (tag, payload) in incoming.raw_data {
            self.raw_data.insert(tag, payload);
        }

        self.recompute_current_price();
    }

    /// Most recent observation across all sources.
    pub fn latest_observation(&self) -> Option<DateTime<Utc>> {
        self.sources.iter().map(|m| m.collected_at).max()
    }

    /// Activity rule, evaluated by the repository on write: inactive once
    /// the listing status is terminal and no source has observed the
    /// property within `inactive_after_days`.
    pub fn compute_is_active(&self, now: DateTime<Utc>, inactive_after_days: i64) -> bool {
        let terminal = self.listing.as_ref().map(|l| l.status.is_terminal()).unwrap_or(false);
        if !terminal {
            return true;
        }
        match self.latest_observation() {
            Some(seen) => (now - seen).num_days() < inactive_after_days,
            None => false,
        }
    }
}

/// Latest year accepted for `year_built` (builders pre-list future stock).
pub fn max_year_built(now: DateTime<Utc>) -> i32 {
    now.year() + 5
}

/// Latest year accepted for `tax_info.tax_year`.
pub fn max_tax_year(now: DateTime<Utc>) -> i32 {
    now.year() + 1
}

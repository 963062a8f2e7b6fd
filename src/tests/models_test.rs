//! Canonical model tests: price-history ordering, current-price selection,
//! observation merging, and activity transitions.

use chrono::{Duration as ChronoDuration, Utc};

use super::common::{price, sample_property};
use crate::models::{ListingStatus, PriceType, PropertyType};

#[test]
fn price_history_stays_ordered_by_date() {
    let mut property = sample_property("maricopa_123_main_st_85001", "85001");

    property.add_price(price(300_000.0, "2023-06-01", PriceType::Listing, 0.8));
    property.add_price(price(250_000.0, "2021-01-15", PriceType::Sale, 0.9));
    property.add_price(price(280_000.0, "2022-03-10", PriceType::Assessed, 0.85));

    let dates: Vec<_> = property.price_history.iter().map(|p| p.observed_on).collect();
    let mut sorted = dates.clone();
    sorted.sort();
    assert_eq!(dates, sorted, "history ordered by observation date");
}

#[test]
fn equal_dates_keep_insertion_order() {
    let mut property = sample_property("maricopa_123_main_st_85001", "85001");

    property.add_price(price(100_000.0, "2024-01-01", PriceType::LandValue, 0.8));
    property.add_price(price(250_000.0, "2024-01-01", PriceType::ImprovementValue, 0.8));
    property.add_price(price(350_000.0, "2024-01-01", PriceType::MarketEstimate, 0.9));

    let types: Vec<_> = property.price_history.iter().map(|p| p.price_type).collect();
    assert_eq!(
        types,
        vec![PriceType::LandValue, PriceType::ImprovementValue, PriceType::MarketEstimate]
    );
}

#[test]
fn duplicate_price_entries_are_ignored() {
    let mut property = sample_property("maricopa_123_main_st_85001", "85001");

    assert!(property.add_price(price(300_000.0, "2024-01-01", PriceType::Listing, 0.8)));
    assert!(!property.add_price(price(300_000.0, "2024-01-01", PriceType::Listing, 0.8)));
    assert_eq!(property.price_history.len(), 1);

    // Same date and type from a different source is a new observation.
    let mut other = price(300_000.0, "2024-01-01", PriceType::Listing, 0.8);
    other.source = "phoenix_mls".to_string();
    assert!(property.add_price(other));
    assert_eq!(property.price_history.len(), 2);
}

#[test]
fn current_price_prefers_highest_confidence() {
    let mut property = sample_property("maricopa_123_main_st_85001", "85001");

    property.add_price(price(350_000.0, "2024-01-01", PriceType::MarketEstimate, 0.9));
    property.add_price(price(300_000.0, "2024-02-01", PriceType::Assessed, 0.85));

    assert_eq!(property.current_price, Some(350_000.0));
}

#[test]
fn current_price_breaks_confidence_ties_by_recency() {
    let mut property = sample_property("maricopa_123_main_st_85001", "85001");

    property.add_price(price(300_000.0, "2023-01-01", PriceType::Listing, 0.9));
    property.add_price(price(320_000.0, "2024-01-01", PriceType::Listing, 0.9));

    assert_eq!(property.current_price, Some(320_000.0));
}

#[test]
fn current_price_skips_zero_amounts() {
    let mut property = sample_property("maricopa_123_main_st_85001", "85001");

    property.add_price(price(0.0, "2024-06-01", PriceType::Listing, 1.0));
    property.add_price(price(250_000.0, "2023-01-01", PriceType::Sale, 0.7));

    assert_eq!(property.current_price, Some(250_000.0));
}

#[test]
fn merge_observation_unions_sources_and_appends_prices() {
    let mut stored = sample_property("maricopa_123_main_st_85001", "85001");
    stored.add_price(price(300_000.0, "2024-01-01", PriceType::Assessed, 0.85));

    let mut incoming = sample_property("maricopa_123_main_st_85001", "85001");
    incoming.sources[0].source = "phoenix_mls".to_string();
    incoming.add_price(price(300_000.0, "2024-01-01", PriceType::Assessed, 0.85));
    incoming.add_price(price(315_000.0, "2024-03-01", PriceType::Listing, 0.9));

    stored.merge_observation(incoming);

    assert_eq!(stored.price_history.len(), 2, "duplicate assessed entry not re-appended");
    assert_eq!(stored.sources.len(), 2);
    assert_eq!(stored.current_price, Some(315_000.0));
}

#[test]
fn merge_is_idempotent() {
    let mut stored = sample_property("maricopa_123_main_st_85001", "85001");
    let mut incoming = sample_property("maricopa_123_main_st_85001", "85001");
    incoming.add_price(price(300_000.0, "2024-01-01", PriceType::Listing, 0.9));

    stored.merge_observation(incoming.clone());
    let after_first = stored.clone();
    stored.merge_observation(incoming);

    assert_eq!(stored.price_history, after_first.price_history);
    assert_eq!(stored.sources, after_first.sources);
    assert_eq!(stored.current_price, after_first.current_price);
}

#[test]
fn active_while_listing_not_terminal() {
    let property = sample_property("maricopa_123_main_st_85001", "85001");
    assert!(property.compute_is_active(Utc::now(), 30));
}

#[test]
fn terminal_listing_goes_inactive_after_quiet_period() {
    let mut property = sample_property("maricopa_123_main_st_85001", "85001");
    property.listing.as_mut().expect("listing present").status = ListingStatus::Sold;

    let now = Utc::now();
    assert!(property.compute_is_active(now, 30), "fresh observation keeps it active");

    property.sources[0].collected_at = now - ChronoDuration::days(45);
    assert!(!property.compute_is_active(now, 30), "stale terminal listing is inactive");
}

#[test]
fn property_type_parses_source_spellings() {
    assert_eq!(PropertyType::parse("Single Family Residence"), PropertyType::SingleFamily);
    assert_eq!(PropertyType::parse("CONDOMINIUM"), PropertyType::Condo);
    assert_eq!(PropertyType::parse("Townhouse"), PropertyType::Townhouse);
    assert_eq!(PropertyType::parse("Vacant Land"), PropertyType::Lot);
    assert_eq!(PropertyType::parse("duplex"), PropertyType::MultiFamily);
    assert_eq!(PropertyType::parse("something else"), PropertyType::Unknown);
}

#[test]
fn listing_status_parses_and_classifies_terminal() {
    assert_eq!(ListingStatus::parse("For Sale"), ListingStatus::Active);
    assert_eq!(ListingStatus::parse("Under Contract"), ListingStatus::Pending);
    assert_eq!(ListingStatus::parse("SOLD"), ListingStatus::Sold);
    assert!(ListingStatus::Sold.is_terminal());
    assert!(ListingStatus::Withdrawn.is_terminal());
    assert!(!ListingStatus::Active.is_terminal());
}

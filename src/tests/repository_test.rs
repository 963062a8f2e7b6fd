//! Repository tests: uniqueness, upsert merge semantics, indexed queries,
//! price statistics, and report persistence.

use chrono::{Duration as ChronoDuration, Utc};

use super::common::{create_test_db, price, sample_maricopa_record, sample_property};
use crate::models::{DailyReport, ListingStatus, PriceType};
use crate::services::adapters::{MaricopaAdapter, PropertyAdapter};
use crate::services::repository::{PropertyRepository, SortBy, SortOrder};
use crate::utils::ErrorKind;

async fn repository() -> PropertyRepository {
    PropertyRepository::new(create_test_db().await, 30)
}

#[tokio::test]
async fn create_rejects_duplicate_property_id() {
    let repo = repository().await;
    let property = sample_property("maricopa_123_main_st_85001", "85001");

    repo.create(&property).await.expect("first create succeeds");
    let err = repo.create(&property).await.expect_err("duplicate rejected");
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn upsert_creates_then_merges() {
    let repo = repository().await;
    let mut property = sample_property("maricopa_123_main_st_85001", "85001");
    property.add_price(price(300_000.0, "2024-01-01", PriceType::Assessed, 0.85));

    let (id, created) = repo.upsert(&property).await.expect("upsert");
    assert!(created);
    assert_eq!(id, "maricopa_123_main_st_85001");

    let mut update = sample_property("maricopa_123_main_st_85001", "85001");
    update.sources[0].source = "phoenix_mls".to_string();
    update.add_price(price(315_000.0, "2024-03-01", PriceType::Listing, 0.9));

    let (_, created) = repo.upsert(&update).await.expect("second upsert");
    assert!(!created);

    let stored = repo
        .get_by_property_id("maricopa_123_main_st_85001")
        .await
        .expect("query")
        .expect("present");
    assert_eq!(stored.price_history.len(), 2);
    assert_eq!(stored.sources.len(), 2);
    assert_eq!(stored.current_price, Some(315_000.0));
}

#[tokio::test]
async fn upsert_is_idempotent() {
    let repo = repository().await;
    let mut property = sample_property("maricopa_123_main_st_85001", "85001");
    property.add_price(price(300_000.0, "2024-01-01", PriceType::Listing, 0.9));

    repo.upsert(&property).await.expect("first");
    let first = repo
        .get_by_property_id(&property.property_id)
        .await
        .expect("query")
        .expect("present");

    repo.upsert(&property).await.expect("second");
    let second = repo
        .get_by_property_id(&property.property_id)
        .await
        .expect("query")
        .expect("present");

    // Identical except for the write timestamp.
    assert_eq!(first.price_history, second.price_history);
    assert_eq!(first.sources, second.sources);
    assert_eq!(first.current_price, second.current_price);
    assert_eq!(first.first_seen, second.first_seen);
}

#[tokio::test]
async fn duplicate_price_tuples_appear_once_after_upsert() {
    let repo = repository().await;
    let mut property = sample_property("maricopa_123_main_st_85001", "85001");
    property.add_price(price(300_000.0, "2024-01-01", PriceType::Listing, 0.9));

    repo.upsert(&property).await.expect("first");
    repo.upsert(&property).await.expect("second");

    let stored = repo
        .get_by_property_id(&property.property_id)
        .await
        .expect("query")
        .expect("present");
    let matching = stored
        .price_history
        .iter()
        .filter(|p| {
            p.observed_on == "2024-01-01".parse().expect("date")
                && p.price_type == PriceType::Listing
                && p.source == "maricopa_api"
        })
        .count();
    assert_eq!(matching, 1, "idempotent append by (date, type, source)");
}

#[tokio::test]
async fn search_by_zipcode_paginates_and_sorts() {
    let repo = repository().await;

    for i in 0..5 {
        let mut p = sample_property(&format!("maricopa_{i}_main_st_85048"), "85048");
        p.add_price(price(
            100_000.0 + i as f64 * 50_000.0,
            "2024-01-01",
            PriceType::Listing,
            0.9,
        ));
        repo.upsert(&p).await.expect("upsert");
    }
    // A property in another ZIP must not appear.
    repo.upsert(&sample_property("maricopa_9_other_st_85001", "85001"))
        .await
        .expect("upsert");

    let (page, total) = repo
        .search_by_zipcode("85048", 0, 3, SortBy::CurrentPrice, SortOrder::Desc)
        .await
        .expect("search");
    assert_eq!(total, 5);
    assert_eq!(page.len(), 3);
    assert_eq!(page[0].current_price, Some(300_000.0));
    assert!(page[0].current_price >= page[1].current_price);

    let (rest, total) = repo
        .search_by_zipcode("85048", 3, 3, SortBy::CurrentPrice, SortOrder::Desc)
        .await
        .expect("search");
    assert_eq!(total, 5);
    assert_eq!(rest.len(), 2);
}

#[tokio::test]
async fn recent_updates_respects_since_and_limit() {
    let repo = repository().await;
    repo.upsert(&sample_property("maricopa_1_a_st_85001", "85001")).await.expect("upsert");
    repo.upsert(&sample_property("maricopa_2_b_st_85001", "85001")).await.expect("upsert");

    let recent = repo
        .get_recent_updates(Utc::now() - ChronoDuration::minutes(5), 10)
        .await
        .expect("query");
    assert_eq!(recent.len(), 2);

    let none = repo
        .get_recent_updates(Utc::now() + ChronoDuration::minutes(5), 10)
        .await
        .expect("query");
    assert!(none.is_empty());
}

#[tokio::test]
async fn price_statistics_over_active_listings() {
    let repo = repository().await;

    for (i, amount) in [(1, 200_000.0), (2, 300_000.0), (3, 400_000.0)] {
        let mut p = sample_property(&format!("maricopa_{i}_stat_st_85048"), "85048");
        p.add_price(price(amount, "2024-01-01", PriceType::Listing, 0.9));
        repo.upsert(&p).await.expect("upsert");
    }
    // No price: excluded from the statistics.
    repo.upsert(&sample_property("maricopa_4_stat_st_85048", "85048"))
        .await
        .expect("upsert");

    let stats = repo.get_price_statistics("85048").await.expect("stats");
    assert_eq!(stats.count, 3);
    assert_eq!(stats.avg, Some(300_000.0));
    assert_eq!(stats.min, Some(200_000.0));
    assert_eq!(stats.max, Some(400_000.0));
    assert_eq!(stats.median, Some(300_000.0));

    let empty = repo.get_price_statistics("85000").await.expect("stats");
    assert_eq!(empty.count, 0);
    assert_eq!(empty.median, None);
}

#[tokio::test]
async fn add_price_history_dedupes() {
    let repo = repository().await;
    let property = sample_property("maricopa_123_main_st_85001", "85001");
    repo.upsert(&property).await.expect("upsert");

    let entry = price(299_000.0, "2024-05-01", PriceType::Listing, 0.9);
    assert!(repo.add_price_history(&property.property_id, entry.clone()).await.expect("append"));
    assert!(!repo.add_price_history(&property.property_id, entry).await.expect("append"));

    let stored = repo
        .get_by_property_id(&property.property_id)
        .await
        .expect("query")
        .expect("present");
    assert_eq!(stored.price_history.len(), 1);
    assert_eq!(stored.current_price, Some(299_000.0));

    let err = repo
        .add_price_history("missing_id", price(1.0, "2024-05-01", PriceType::Listing, 0.5))
        .await
        .expect_err("unknown id");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn terminal_stale_listing_marked_inactive_on_write() {
    let repo = repository().await;
    let mut property = sample_property("maricopa_old_sold_st_85001", "85001");
    property.listing.as_mut().expect("listing").status = ListingStatus::Sold;
    property.sources[0].collected_at = Utc::now() - ChronoDuration::days(60);

    repo.upsert(&property).await.expect("upsert");
    let stored = repo
        .get_by_property_id(&property.property_id)
        .await
        .expect("query")
        .expect("present");
    assert!(!stored.is_active, "is_active computed during upsert");
}

#[tokio::test]
async fn daily_report_upsert_replaces() {
    let repo = repository().await;
    let date = Utc::now().date_naive();

    let mut report = DailyReport::empty(date);
    report.error_count = 1;
    repo.upsert_daily_report(&report).await.expect("first write");

    report.error_count = 7;
    repo.upsert_daily_report(&report).await.expect("replace");

    let stored = repo.get_daily_report(date).await.expect("query").expect("present");
    assert_eq!(stored.error_count, 7);
}

// Assessor happy path: two adapted records land as two retrievable
// documents and show up in the ZIP statistics.
#[tokio::test]
async fn adapted_records_flow_into_repository() {
    let repo = repository().await;
    let adapter = MaricopaAdapter::new("1.0.0");

    let mut first = sample_maricopa_record();
    first["address"]["zipcode"] = serde_json::json!("85048");
    first["property_info"]["apn"] = serde_json::json!("123-45-678");

    let mut second = sample_maricopa_record();
    second["address"]["zipcode"] = serde_json::json!("85048");
    second["address"]["house_number"] = serde_json::json!("124");
    second["property_info"]["apn"] = serde_json::json!("124-46-789");

    for raw in [&first, &second] {
        let property = adapter.adapt(raw).expect("adapts");
        repo.upsert(&property).await.expect("upsert");
    }

    let stored = repo
        .get_by_property_id("maricopa_123_main_st_unit_a_85048")
        .await
        .expect("query");
    assert!(stored.is_some(), "first record retrievable by canonical id");

    let stats = repo.get_price_statistics("85048").await.expect("stats");
    assert_eq!(stats.count, 2);
}

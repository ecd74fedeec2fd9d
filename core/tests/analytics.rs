use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use upsell_core::{
    analytics::{Analytics, AnalyticsFilters},
    config::EngineConfig,
    event::{ActionType, AnalyticsEvent},
    offer::{OfferPayload, OfferType},
    store::UpsellStore,
    types::OfferId,
};

// ── Test helpers ────────────────────────────────────────────────────────────

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, d, 12, 0, 0).unwrap()
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

fn migrated_store() -> UpsellStore {
    let store = UpsellStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn seed_offer(store: &UpsellStore, offer_type: &str, product_id: i64) -> OfferId {
    let offer = OfferPayload {
        offer_type: Some(offer_type.into()),
        product_id: Some(product_id),
        ..OfferPayload::default()
    }
    .into_offer(0);
    store.insert_offer(&offer, day(1)).unwrap()
}

fn event(offer_type: OfferType, offer_id: OfferId, action: ActionType, at: DateTime<Utc>) -> AnalyticsEvent {
    AnalyticsEvent::new(offer_type, offer_id, action, at).with_context(offer_type.to_string())
}

fn views(analytics: &Analytics<'_>, offer_type: OfferType, offer_id: OfferId, n: usize, at: DateTime<Utc>) {
    for _ in 0..n {
        assert!(analytics.track(&event(offer_type, offer_id, ActionType::View, at)));
    }
}

fn accepts(
    analytics: &Analytics<'_>,
    offer_type: OfferType,
    offer_id: OfferId,
    n: usize,
    revenue: f64,
    at: DateTime<Utc>,
) {
    for _ in 0..n {
        let accepted = event(offer_type, offer_id, ActionType::Accept, at).with_revenue(revenue);
        assert!(analytics.track(&accepted));
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// No views means a 0% conversion rate, not a division error.
#[test]
fn empty_summary_has_zero_rate() {
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let analytics = Analytics::new(&store, &config);

    let summary = analytics.summary(&AnalyticsFilters::default()).unwrap();
    assert_eq!(summary.views, 0);
    assert_eq!(summary.conversions, 0);
    assert_eq!(summary.conversion_rate, 0.0);
    assert_eq!(summary.revenue, 0.0);
}

/// Only views and accepts count; skips and accept clicks do not convert.
#[test]
fn summary_counts_views_and_accepts() {
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let analytics = Analytics::new(&store, &config);
    let offer = seed_offer(&store, "checkout", 10);

    views(&analytics, OfferType::Checkout, offer, 8, day(2));
    accepts(&analytics, OfferType::Checkout, offer, 1, 12.35, day(2));
    accepts(&analytics, OfferType::Checkout, offer, 1, 7.5, day(2));
    analytics.track(&event(OfferType::Checkout, offer, ActionType::Skip, day(2)));
    analytics.track(&event(OfferType::Checkout, offer, ActionType::AcceptClick, day(2)));

    let summary = analytics.summary(&AnalyticsFilters::default()).unwrap();
    assert_eq!(summary.views, 8);
    assert_eq!(summary.conversions, 2);
    assert_eq!(summary.conversion_rate, 25.0);
    assert_eq!(summary.revenue, 19.85);
}

/// Type, product and inclusive date filters narrow the totals.
#[test]
fn summary_filters() {
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let analytics = Analytics::new(&store, &config);
    let checkout = seed_offer(&store, "checkout", 10);
    let cart = seed_offer(&store, "cart", 20);

    views(&analytics, OfferType::Checkout, checkout, 4, day(2));
    views(&analytics, OfferType::Checkout, checkout, 6, day(5));
    views(&analytics, OfferType::Cart, cart, 3, day(3));
    accepts(&analytics, OfferType::Cart, cart, 1, 4.0, day(3));

    let by_type = analytics
        .summary(&AnalyticsFilters { offer_type: Some(OfferType::Cart), ..Default::default() })
        .unwrap();
    assert_eq!((by_type.views, by_type.conversions), (3, 1));
    assert_eq!(by_type.conversion_rate, 33.33);

    let by_product = analytics
        .summary(&AnalyticsFilters { product_id: Some(10), ..Default::default() })
        .unwrap();
    assert_eq!(by_product.views, 10);

    let unknown_product = analytics
        .summary(&AnalyticsFilters { product_id: Some(999), ..Default::default() })
        .unwrap();
    assert_eq!(unknown_product.views, 0, "a product with no offers matches nothing");

    let mismatched = analytics
        .summary(&AnalyticsFilters {
            offer_id: Some(cart),
            product_id: Some(10),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(mismatched.views, 0, "offer and product filters are intersected");

    let window = analytics
        .summary(&AnalyticsFilters {
            start_date: Some(date(2)),
            end_date: Some(date(3)),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(window.views, 7, "both bounds are inclusive whole days");

    let from_fifth = analytics
        .summary(&AnalyticsFilters { start_date: Some(date(5)), ..Default::default() })
        .unwrap();
    assert_eq!(from_fifth.views, 6);
}

/// A zero offer or product id is the same as leaving the filter empty.
#[test]
fn zero_ids_do_not_filter() {
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let analytics = Analytics::new(&store, &config);
    let checkout = seed_offer(&store, "checkout", 10);
    let cart = seed_offer(&store, "cart", 20);

    views(&analytics, OfferType::Checkout, checkout, 2, day(2));
    views(&analytics, OfferType::Cart, cart, 3, day(2));

    let zero = analytics
        .summary(&AnalyticsFilters { offer_id: Some(0), product_id: Some(0), ..Default::default() })
        .unwrap();
    assert_eq!(zero.views, 5);

    let top = analytics
        .top_offers(10, &AnalyticsFilters { offer_id: Some(0), ..Default::default() })
        .unwrap();
    assert_eq!(top.len(), 2);

    let cart_only = analytics
        .summary(&AnalyticsFilters { offer_id: Some(cart), product_id: Some(0), ..Default::default() })
        .unwrap();
    assert_eq!(cart_only.views, 3);
}

/// Leaderboard orders by revenue, then conversions, and honours the limit.
#[test]
fn top_offers_ranking() {
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let analytics = Analytics::new(&store, &config);
    let low = seed_offer(&store, "checkout", 1);
    let high = seed_offer(&store, "cart", 2);
    let busy = seed_offer(&store, "checkout", 3);
    let idle = seed_offer(&store, "post_purchase", 4);

    views(&analytics, OfferType::Checkout, low, 5, day(2));
    accepts(&analytics, OfferType::Checkout, low, 1, 5.0, day(2));
    views(&analytics, OfferType::Cart, high, 5, day(2));
    accepts(&analytics, OfferType::Cart, high, 1, 30.0, day(2));
    views(&analytics, OfferType::Checkout, busy, 5, day(2));
    accepts(&analytics, OfferType::Checkout, busy, 2, 2.5, day(2));
    views(&analytics, OfferType::PostPurchase, idle, 9, day(2));

    let top = analytics.top_offers(10, &AnalyticsFilters::default()).unwrap();
    let ids: Vec<OfferId> = top.iter().map(|r| r.offer_id).collect();
    assert_eq!(ids, vec![high, busy, low, idle], "equal revenue falls back to conversions");
    assert_eq!(top[0].offer_type, OfferType::Cart);
    assert_eq!(top[0].revenue, 30.0);
    assert_eq!(top[3].views, 9);

    let checkout_only = AnalyticsFilters { offer_type: Some(OfferType::Checkout), ..Default::default() };
    let tied = analytics.top_offers(10, &checkout_only).unwrap();
    assert_eq!(tied.iter().map(|r| r.offer_id).collect::<Vec<_>>(), vec![busy, low]);

    assert_eq!(analytics.top_offers(2, &AnalyticsFilters::default()).unwrap().len(), 2);
    assert_eq!(analytics.top_offers(0, &AnalyticsFilters::default()).unwrap().len(), 1, "limit floors at 1");
}

/// With reports disabled nothing is written.
#[test]
fn disabled_analytics_writes_nothing() {
    let store = migrated_store();
    let config = EngineConfig { disable_reports: true, ..EngineConfig::default_test() };
    let analytics = Analytics::new(&store, &config);

    let tracked = analytics.track(&event(OfferType::Checkout, 1, ActionType::View, day(2)));
    assert!(!tracked);

    let enabled = EngineConfig::default_test();
    let summary = Analytics::new(&store, &enabled).summary(&AnalyticsFilters::default()).unwrap();
    assert_eq!(summary.views, 0);
}

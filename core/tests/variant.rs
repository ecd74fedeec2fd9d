use chrono::{DateTime, TimeZone, Utc};
use upsell_core::{
    event::ActionType,
    host::VisitorIdentity,
    offer::{DiscountType, Offer, OfferPayload},
    store::UpsellStore,
    variant::{apply_variant, bucket_for_seed, split_variant, visitor_seed, Variant, VariantResolver},
};

// ── Test helpers ────────────────────────────────────────────────────────────

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

fn migrated_store() -> UpsellStore {
    let store = UpsellStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn ab_offer(id: i64, split: i64, auto_winner: bool) -> Offer {
    OfferPayload {
        product_id: Some(99),
        title: Some("Add gift wrap".into()),
        discount_type: Some("fixed".into()),
        discount_value: Some(1.0),
        ab_testing_enabled: Some(true),
        ab_split_percentage: Some(split),
        ab_auto_winner: Some(auto_winner),
        ab_min_views: Some(100),
        ab_variant_b_title: Some("Make it a gift".into()),
        ab_variant_b_discount_type: Some("percent".into()),
        ab_variant_b_discount_value: Some(25.0),
        ..OfferPayload::default()
    }
    .into_offer(id)
}

fn visitor(n: usize) -> VisitorIdentity {
    VisitorIdentity {
        session_id: Some(format!("session-{n}")),
        ..VisitorIdentity::default()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// The same visitor always lands on the same variant for the same offer.
#[test]
fn resolution_is_stable_per_visitor() {
    let store = migrated_store();
    let resolver = VariantResolver::new(&store);
    let offer = ab_offer(7, 50, false);

    for n in 0..50 {
        let v = visitor(n);
        let expected = split_variant(bucket_for_seed(&visitor_seed(7, &v)), 50);
        for _ in 0..3 {
            assert_eq!(resolver.resolve(&offer, &v), expected, "visitor {n} flipped");
        }
    }
}

/// A 50/50 split serves both variants across a few hundred visitors.
#[test]
fn split_serves_both_variants() {
    let store = migrated_store();
    let resolver = VariantResolver::new(&store);
    let offer = ab_offer(7, 50, false);

    let a_count = (0..400)
        .filter(|n| resolver.resolve(&offer, &visitor(*n)) == Variant::A)
        .count();
    assert!(
        (120..=280).contains(&a_count),
        "50% split gave {a_count}/400 visitors variant A"
    );
}

#[test]
fn disabled_testing_always_serves_a() {
    let store = migrated_store();
    let resolver = VariantResolver::new(&store);
    let mut offer = ab_offer(7, 1, false);
    offer.settings.ab_test.enabled = false;

    for n in 0..20 {
        assert_eq!(resolver.resolve(&offer, &visitor(n)), Variant::A);
    }
    assert_eq!(resolver.assign(&offer, &visitor(0), "s:session-0", now()).unwrap(), Variant::A);
    assert_eq!(resolver.stored(7, "s:session-0").unwrap(), None, "nothing persisted");
}

/// After 100 views each with A converting at 20% and B at 10%, every visitor
/// gets A whatever the split says.
#[test]
fn auto_winner_overrides_split() {
    let store = migrated_store();
    let resolver = VariantResolver::new(&store);

    for _ in 0..100 {
        resolver.record_event(21, "a", ActionType::View).unwrap();
        resolver.record_event(21, "b", ActionType::View).unwrap();
    }
    for _ in 0..20 {
        resolver.record_event(21, "a", ActionType::Accept).unwrap();
    }
    for _ in 0..10 {
        resolver.record_event(21, "b", ActionType::Accept).unwrap();
    }

    let stats = store.variant_stats(21).unwrap();
    assert_eq!((stats.a.views, stats.a.accepts), (100, 20));
    assert_eq!((stats.b.views, stats.b.accepts), (100, 10));

    for split in [1, 50, 99] {
        let offer = ab_offer(21, split, true);
        for n in 0..50 {
            assert_eq!(
                resolver.resolve(&offer, &visitor(n)),
                Variant::A,
                "split {split}, visitor {n} did not get the winner"
            );
        }
    }
}

/// Below the view threshold the split still decides.
#[test]
fn auto_winner_waits_for_min_views() {
    let store = migrated_store();
    let resolver = VariantResolver::new(&store);

    for _ in 0..99 {
        resolver.record_event(22, "a", ActionType::View).unwrap();
        resolver.record_event(22, "b", ActionType::View).unwrap();
    }
    for _ in 0..30 {
        resolver.record_event(22, "a", ActionType::Accept).unwrap();
    }

    let offer = ab_offer(22, 1, true);
    let b_count = (0..100)
        .filter(|n| resolver.resolve(&offer, &visitor(*n)) == Variant::B)
        .count();
    assert!(b_count > 80, "1% split should mostly serve B, got {b_count}/100");
}

/// Once assigned, a scope keeps its variant even if the split changes.
#[test]
fn assignment_is_persisted_per_scope() {
    let store = migrated_store();
    let resolver = VariantResolver::new(&store);
    let v = visitor(3);
    let scope = v.seed_fragment();

    let first = resolver.assign(&ab_offer(30, 50, false), &v, &scope, now()).unwrap();
    assert_eq!(resolver.stored(30, &scope).unwrap(), Some(first));

    let flipped_split = if first == Variant::A { 1 } else { 99 };
    let again = resolver
        .assign(&ab_offer(30, flipped_split, false), &v, &scope, now())
        .unwrap();
    assert_eq!(again, first, "stored assignment was re-rolled");
}

#[test]
fn empty_scope_is_never_persisted() {
    let store = migrated_store();
    let resolver = VariantResolver::new(&store);
    let anonymous = VisitorIdentity::default();

    let offer = ab_offer(31, 50, false);
    resolver.assign(&offer, &anonymous, "", now()).unwrap();
    assert_eq!(resolver.stored(31, "").unwrap(), None);
}

/// Only views and accepts with a known variant on a real offer are counted.
#[test]
fn record_event_ignores_what_it_cannot_attribute() {
    let store = migrated_store();
    let resolver = VariantResolver::new(&store);

    resolver.record_event(0, "a", ActionType::View).unwrap();
    resolver.record_event(-4, "b", ActionType::Accept).unwrap();
    resolver.record_event(40, "c", ActionType::View).unwrap();
    resolver.record_event(40, "", ActionType::Accept).unwrap();
    resolver.record_event(40, "a", ActionType::Skip).unwrap();
    resolver.record_event(40, "b", ActionType::AcceptClick).unwrap();

    let stats = store.variant_stats(40).unwrap();
    assert_eq!(stats, Default::default());
    assert_eq!(store.variant_stats(0).unwrap(), Default::default());

    resolver.record_event(40, "B", ActionType::View).unwrap();
    assert_eq!(store.variant_stats(40).unwrap().b.views, 1);
}

/// Variant B overlays only the fields it configures.
#[test]
fn variant_b_overrides_presentation_fields() {
    let offer = ab_offer(50, 50, false);

    let a = apply_variant(&offer, Variant::A);
    assert_eq!(a.variant, Variant::A);
    assert_eq!(a.offer, offer);

    let b = apply_variant(&offer, Variant::B);
    assert_eq!(b.variant, Variant::B);
    assert_eq!(b.offer.title, "Make it a gift");
    assert_eq!(b.offer.discount_type, DiscountType::Percent);
    assert_eq!(b.offer.discount_value, 25.0);
    assert_eq!(b.offer.description, offer.description, "description has no override");

    let mut disabled = offer.clone();
    disabled.settings.ab_test.enabled = false;
    assert_eq!(apply_variant(&disabled, Variant::B).variant, Variant::A);
}

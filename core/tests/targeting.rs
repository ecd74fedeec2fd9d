use chrono::{DateTime, TimeZone, Utc};
use upsell_core::{
    config::EngineConfig,
    error::{UpsellError, UpsellResult},
    host::{
        Actor, Cart, CustomerRecord, DeviceClass, DismissLedger, InMemoryHost, LineItem,
        OrderContext, OrderSnapshot, PastOrder, RequestContext, User,
    },
    offer::{Offer, OfferPayload},
    store::UpsellStore,
    targeting::TargetingEngine,
    types::OfferId,
};

// ── Test helpers ────────────────────────────────────────────────────────────

fn now() -> DateTime<Utc> {
    // A Monday.
    Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap()
}

fn migrated_store() -> UpsellStore {
    let store = UpsellStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn offer(id: OfferId, payload: OfferPayload) -> Offer {
    OfferPayload {
        product_id: payload.product_id.or(Some(99)),
        ..payload
    }
    .into_offer(id)
}

fn line(product_id: i64, quantity: u32, categories: &[i64]) -> LineItem {
    LineItem { product_id, quantity, category_ids: categories.to_vec() }
}

fn cart_ctx(subtotal: f64, items: Vec<LineItem>) -> RequestContext {
    let mut ctx = RequestContext::new(now());
    ctx.session_id = Some("sess-1".into());
    ctx.cart = Some(Cart { items, subtotal });
    ctx
}

fn logged_in(mut ctx: RequestContext, id: i64, email: &str) -> RequestContext {
    ctx.user = Some(User { id, roles: vec!["customer".into()], email: email.into() });
    ctx
}

fn order_ctx(order_id: i64, customer: Option<i64>, email: Option<&str>) -> OrderContext {
    OrderContext {
        now:    now(),
        device: DeviceClass::Desktop,
        order:  OrderSnapshot {
            id:               order_id,
            customer_id:      customer,
            billing_email:    email.map(str::to_string),
            billing_country:  Some("us".into()),
            shipping_country: None,
            subtotal:         80.0,
            items:            vec![line(7, 1, &[3])],
            ..OrderSnapshot::default()
        },
    }
}

fn past_order(id: i64, status: &str, items: Vec<LineItem>) -> PastOrder {
    PastOrder { id, status: status.into(), items }
}

fn customer(user_id: i64, orders: Vec<PastOrder>) -> CustomerRecord {
    CustomerRecord {
        user_id,
        email: format!("c{user_id}@example.com"),
        lifetime_spent: 120.0,
        orders,
    }
}

/// A dismiss ledger whose backing storage is down.
struct UnavailableLedger;

impl DismissLedger for UnavailableLedger {
    fn dismiss_count(&self, _offer_id: OfferId, _actor: &Actor) -> UpsellResult<u32> {
        Err(UpsellError::StorageUnavailable("dismiss table locked".into()))
    }
}

// ── Cart rules ───────────────────────────────────────────────────────────────

/// Minimum total and trigger product must both hold.
#[test]
fn cart_total_and_trigger_product() {
    let host = InMemoryHost::default();
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);

    let bump = offer(
        1,
        OfferPayload {
            min_cart_total: Some(50.0),
            trigger_product_ids: Some("7".into()),
            ..OfferPayload::default()
        },
    );

    let small = cart_ctx(40.0, vec![line(7, 1, &[])]);
    assert!(!targeting.should_show(&bump, &small), "40 is under the 50 minimum");

    let big = cart_ctx(60.0, vec![line(7, 1, &[])]);
    assert!(targeting.should_show(&bump, &big), "60 with product 7 should qualify");

    let no_trigger = cart_ctx(60.0, vec![line(8, 1, &[])]);
    assert!(!targeting.should_show(&bump, &no_trigger), "trigger product missing");
}

/// Rules that need a cart reject requests that have none.
#[test]
fn missing_cart_fails_cart_rules() {
    let host = InMemoryHost::default();
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);

    let mut ctx = RequestContext::new(now());
    ctx.session_id = Some("sess-1".into());

    let unconstrained = offer(1, OfferPayload::default());
    let needs_quantity = offer(2, OfferPayload { quantity_threshold: Some(2), ..OfferPayload::default() });
    let needs_trigger = offer(3, OfferPayload { trigger_category_ids: Some("3".into()), ..OfferPayload::default() });

    assert!(targeting.should_show(&unconstrained, &ctx));
    assert!(!targeting.should_show(&needs_quantity, &ctx));
    assert!(!targeting.should_show(&needs_trigger, &ctx));
}

#[test]
fn skip_if_in_cart_hides_offer_for_carted_product() {
    let host = InMemoryHost::default();
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);

    let bump = offer(1, OfferPayload { skip_if_in_cart: Some(true), ..OfferPayload::default() });

    assert!(targeting.should_show(&bump, &cart_ctx(20.0, vec![line(5, 1, &[])])));
    assert!(!targeting.should_show(&bump, &cart_ctx(20.0, vec![line(99, 1, &[])])));
}

#[test]
fn offers_without_product_never_show() {
    let host = InMemoryHost::default();
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);
    let ctx = cart_ctx(20.0, vec![line(5, 1, &[])]);

    let mut no_product = offer(1, OfferPayload::default());
    no_product.product_id = 0;
    assert!(!targeting.should_show(&no_product, &ctx));
    assert!(targeting.should_show(&offer(2, OfferPayload::default()), &ctx));
}

// ── Visitor rules ────────────────────────────────────────────────────────────

/// Roles, device and country each gate independently.
#[test]
fn role_device_and_country_rules() {
    let host = InMemoryHost::default();
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);

    let wholesale = offer(1, OfferPayload { user_roles: Some("wholesale".into()), ..OfferPayload::default() });
    let guest = cart_ctx(20.0, vec![line(5, 1, &[])]);
    assert!(!targeting.should_show(&wholesale, &guest), "guest has no roles");
    let mut buyer = logged_in(guest.clone(), 4, "b@example.com");
    assert!(!targeting.should_show(&wholesale, &buyer));
    if let Some(user) = buyer.user.as_mut() {
        user.roles.push("Wholesale".into());
    }
    assert!(targeting.should_show(&wholesale, &buyer), "role match is case-insensitive");

    let mobile_only = offer(2, OfferPayload { device_target: Some("mobile".into()), ..OfferPayload::default() });
    assert!(!targeting.should_show(&mobile_only, &guest));
    let mut phone = guest.clone();
    phone.device = DeviceClass::Mobile;
    assert!(targeting.should_show(&mobile_only, &phone));

    let us_only = offer(3, OfferPayload { country_codes: Some("us".into()), ..OfferPayload::default() });
    assert!(!targeting.should_show(&us_only, &guest), "no country known");
    let mut geo = guest.clone();
    geo.geo_country = Some("us".into());
    assert!(targeting.should_show(&us_only, &geo), "live requests fall back to geolocation");
    geo.billing_country = Some("DE".into());
    assert!(!targeting.should_show(&us_only, &geo), "billing country wins over geolocation");
}

#[test]
fn schedule_window_is_checked_against_request_time() {
    let host = InMemoryHost::default();
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);

    let weekend = offer(1, OfferPayload { weekdays: Some("sat,sun".into()), ..OfferPayload::default() });
    let afternoon = offer(
        2,
        OfferPayload {
            start_time: Some("14:00".into()),
            end_time: Some("14:30".into()),
            ..OfferPayload::default()
        },
    );
    let ctx = cart_ctx(20.0, vec![line(5, 1, &[])]);

    assert!(!targeting.should_show(&weekend, &ctx), "request is on a Monday");
    assert!(targeting.should_show(&afternoon, &ctx), "14:30 is inside an inclusive window");
}

/// With a limit of 3, two dismissals still show the offer and the third hides it.
#[test]
fn dismiss_limit_hides_offer_after_third_dismissal() {
    let host = InMemoryHost::default();
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);

    let bump = offer(11, OfferPayload { dismiss_limit: Some(3), ..OfferPayload::default() });
    let ctx = cart_ctx(20.0, vec![line(5, 1, &[])]);
    let actor = ctx.actor().expect("session actor");

    for expected in 1..=2 {
        assert_eq!(store.increment_dismiss(11, &actor, now()).unwrap(), expected);
        assert!(
            targeting.should_show(&bump, &ctx),
            "offer hidden after only {expected} dismissal(s)"
        );
    }
    assert_eq!(store.increment_dismiss(11, &actor, now()).unwrap(), 3);
    assert!(!targeting.should_show(&bump, &ctx), "offer still shown after 3 dismissals");

    let mut other = ctx.clone();
    other.session_id = Some("sess-2".into());
    assert!(targeting.should_show(&bump, &other), "dismissals are per visitor");

    let unlimited = offer(11, OfferPayload { dismiss_limit: Some(0), ..OfferPayload::default() });
    assert!(targeting.should_show(&unlimited, &ctx), "limit 0 disables the rule");
}

/// An unreadable dismiss counter hides the offer rather than risk over-showing.
#[test]
fn dismiss_storage_failure_fails_closed() {
    let host = InMemoryHost::default();
    let config = EngineConfig::default_test();
    let ledger = UnavailableLedger;
    let targeting = TargetingEngine::new(&host, &ledger, &config);

    let bump = offer(1, OfferPayload::default());
    let ctx = cart_ctx(20.0, vec![line(5, 1, &[])]);
    assert!(!targeting.should_show(&bump, &ctx));

    let no_limit = offer(2, OfferPayload { dismiss_limit: Some(0), ..OfferPayload::default() });
    assert!(targeting.should_show(&no_limit, &ctx), "ledger is not consulted without a limit");
}

// ── Customer rules ───────────────────────────────────────────────────────────

/// The live cart treats a one-order customer as returning; after checkout the
/// same customer is still first-time because the new order is counted.
#[test]
fn first_time_threshold_differs_between_cart_and_order() {
    let host = InMemoryHost::default()
        .with_customer(customer(5, vec![past_order(1, "completed", vec![line(7, 1, &[3])])]));
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);

    let first_time = offer(1, OfferPayload { first_time_only: Some(true), ..OfferPayload::default() });

    let live = logged_in(cart_ctx(20.0, vec![line(5, 1, &[])]), 5, "c5@example.com");
    assert!(
        !targeting.should_show(&first_time, &live),
        "live cart: one prior order is not first-time"
    );

    let order = order_ctx(500, Some(5), Some("c5@example.com"));
    assert!(
        targeting.should_show_for_order(&first_time, &order),
        "after checkout: the order being placed is the only one"
    );

    let returning = offer(2, OfferPayload { returning_only: Some(true), ..OfferPayload::default() });
    assert!(targeting.should_show(&returning, &live));
    assert!(!targeting.should_show_for_order(&returning, &order));
}

#[test]
fn account_rules_reject_guests() {
    let host = InMemoryHost::default();
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);
    let guest = cart_ctx(20.0, vec![line(5, 1, &[])]);

    for payload in [
        OfferPayload { first_time_only: Some(true), ..OfferPayload::default() },
        OfferPayload { lifetime_spend_threshold: Some(10.0), ..OfferPayload::default() },
        OfferPayload { purchase_frequency_min: Some(1), ..OfferPayload::default() },
        OfferPayload { purchased_category_ids: Some("3".into()), ..OfferPayload::default() },
    ] {
        let gated = offer(1, payload);
        assert!(!targeting.should_show(&gated, &guest), "guest passed {:?}", gated.rules);
    }
}

#[test]
fn spend_and_frequency_thresholds() {
    let host = InMemoryHost::default().with_customer(customer(
        5,
        vec![
            past_order(1, "completed", vec![]),
            past_order(2, "completed", vec![]),
        ],
    ));
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);
    let ctx = logged_in(cart_ctx(20.0, vec![line(5, 1, &[])]), 5, "c5@example.com");

    let big_spender = offer(1, OfferPayload { lifetime_spend_threshold: Some(100.0), ..OfferPayload::default() });
    let whale = offer(2, OfferPayload { lifetime_spend_threshold: Some(500.0), ..OfferPayload::default() });
    let regular = offer(3, OfferPayload { purchase_frequency_min: Some(2), ..OfferPayload::default() });
    let loyal = offer(4, OfferPayload { purchase_frequency_min: Some(3), ..OfferPayload::default() });

    assert!(targeting.should_show(&big_spender, &ctx));
    assert!(!targeting.should_show(&whale, &ctx));
    assert!(targeting.should_show(&regular, &ctx));
    assert!(!targeting.should_show(&loyal, &ctx));
}

#[test]
fn customer_email_rule_matches_case_insensitively() {
    let host = InMemoryHost::default();
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);

    let vip = offer(1, OfferPayload { customer_email: Some("VIP@example.com".into()), ..OfferPayload::default() });

    let ctx = logged_in(cart_ctx(20.0, vec![line(5, 1, &[])]), 4, "vip@example.com");
    assert!(targeting.should_show(&vip, &ctx));
    assert!(targeting.should_show_for_order(&vip, &order_ctx(1, None, Some("Vip@Example.com"))));
    assert!(!targeting.should_show_for_order(&vip, &order_ctx(2, None, None)));
    assert!(!targeting.should_show_for_order(&vip, &order_ctx(3, None, Some("  "))));
}

/// Only the most recent `category_history_limit` qualifying orders are scanned.
#[test]
fn purchased_category_scan_respects_history_limit() {
    let host = InMemoryHost::default().with_customer(customer(
        5,
        vec![
            past_order(1, "completed", vec![line(40, 1, &[9])]),
            past_order(2, "completed", vec![line(41, 1, &[1])]),
            past_order(3, "cancelled", vec![line(42, 1, &[9])]),
            past_order(4, "processing", vec![line(43, 1, &[2])]),
        ],
    ));
    let store = migrated_store();
    let ctx = logged_in(cart_ctx(20.0, vec![line(5, 1, &[])]), 5, "c5@example.com");
    let bought_nine = offer(1, OfferPayload { purchased_category_ids: Some("9".into()), ..OfferPayload::default() });

    let wide = EngineConfig::default_test();
    assert!(TargetingEngine::new(&host, &store, &wide).should_show(&bought_nine, &ctx));

    let narrow = EngineConfig { category_history_limit: 2, ..EngineConfig::default_test() };
    assert!(
        !TargetingEngine::new(&host, &store, &narrow).should_show(&bought_nine, &ctx),
        "the category 9 purchase is older than the two most recent qualifying orders"
    );
}

#[test]
fn purchased_products_rule_matches_any_listed_product() {
    let host = InMemoryHost::default()
        .with_customer(customer(5, vec![past_order(1, "completed", vec![line(40, 1, &[])])]));
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);
    let ctx = logged_in(cart_ctx(20.0, vec![line(5, 1, &[])]), 5, "c5@example.com");

    let owners = offer(1, OfferPayload { purchased_product_ids: Some("39,40".into()), ..OfferPayload::default() });
    let others = offer(2, OfferPayload { purchased_product_ids: Some("41".into()), ..OfferPayload::default() });

    assert!(targeting.should_show(&owners, &ctx));
    assert!(!targeting.should_show(&others, &ctx));
    assert!(
        targeting.should_show_for_order(&owners, &order_ctx(9, None, Some("C5@example.com"))),
        "guest orders match history by billing email"
    );
}

/// Logged-in buyers of the offered product are skipped; guests never are on
/// the live path.
#[test]
fn skip_if_purchased_only_applies_to_known_buyers() {
    let host = InMemoryHost::default()
        .with_customer(customer(5, vec![past_order(1, "completed", vec![line(99, 1, &[])])]));
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);

    let bump = offer(1, OfferPayload { skip_if_purchased: Some(true), ..OfferPayload::default() });
    let guest = cart_ctx(20.0, vec![line(5, 1, &[])]);
    let buyer = logged_in(guest.clone(), 5, "c5@example.com");

    assert!(targeting.should_show(&bump, &guest));
    assert!(!targeting.should_show(&bump, &buyer));
    assert!(!targeting.should_show_for_order(&bump, &order_ctx(9, None, Some("c5@example.com"))));
}

// ── Order path ───────────────────────────────────────────────────────────────

#[test]
fn order_path_reads_totals_and_triggers_from_the_order() {
    let host = InMemoryHost::default();
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);

    let follow_up = offer(
        1,
        OfferPayload {
            offer_type: Some("post_purchase".into()),
            min_cart_total: Some(50.0),
            trigger_category_ids: Some("3".into()),
            ..OfferPayload::default()
        },
    );
    let order = order_ctx(77, None, None);
    assert!(targeting.should_show_for_order(&follow_up, &order));

    let mut cheap = order.clone();
    cheap.order.subtotal = 10.0;
    assert!(!targeting.should_show_for_order(&follow_up, &cheap));

    let roles_only = offer(2, OfferPayload { user_roles: Some("wholesale".into()), ..OfferPayload::default() });
    assert!(
        targeting.should_show_for_order(&roles_only, &order),
        "role rules are not evaluated after checkout"
    );
}

#[test]
fn order_country_has_no_geolocation_fallback() {
    let host = InMemoryHost::default();
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);

    let us_only = offer(1, OfferPayload { country_codes: Some("US".into()), ..OfferPayload::default() });
    let mut order = order_ctx(1, None, None);
    assert!(targeting.should_show_for_order(&us_only, &order));

    order.order.billing_country = None;
    order.order.shipping_country = Some("us".into());
    assert!(targeting.should_show_for_order(&us_only, &order));

    order.order.shipping_country = None;
    assert!(!targeting.should_show_for_order(&us_only, &order));
}

/// Order-path dismissals are counted against the customer, or the order
/// itself for guests.
#[test]
fn order_dismissals_use_customer_or_order_actor() {
    let host = InMemoryHost::default();
    let store = migrated_store();
    let config = EngineConfig::default_test();
    let targeting = TargetingEngine::new(&host, &store, &config);

    let once = offer(3, OfferPayload { dismiss_limit: Some(1), ..OfferPayload::default() });
    let guest_order = order_ctx(800, None, None);
    assert!(targeting.should_show_for_order(&once, &guest_order));

    store.increment_dismiss(3, &Actor::Order(800), now()).unwrap();
    assert!(!targeting.should_show_for_order(&once, &guest_order));

    let member_order = order_ctx(801, Some(12), None);
    assert!(targeting.should_show_for_order(&once, &member_order));
    store.increment_dismiss(3, &Actor::User(12), now()).unwrap();
    assert!(!targeting.should_show_for_order(&once, &member_order));
}

//! Eligibility rules.
//!
//! `should_show` evaluates an offer against a live cart request and
//! `should_show_for_order` against a completed order. Both are a
//! short-circuiting AND of independent predicates, cheapest first. Any
//! failing predicate rejects the offer.
//!
//! RULES:
//!   - Missing context (no cart, no user, no country) fails a rule that needs
//!     it. Only unconfigured rules pass without context.
//!   - A storage failure while checking a rule rejects the offer.

use crate::{
    config::EngineConfig,
    host::{Actor, Cart, CustomerHistory, DeviceClass, DismissLedger, LineItem, OrderContext, RequestContext},
    offer::{DeviceTarget, Offer, OfferRules, OfferSchedule},
    types::{CategoryId, ProductId, UserId},
};
use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};

/// How an order count is read for first-time/returning rules.
///
/// On a live cart the customer has not ordered yet, so a first-time buyer has
/// zero orders. After checkout the triggering order is already counted, so a
/// first-time buyer has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderCountBasis {
    LiveCart,
    CompletedOrder,
}

impl OrderCountBasis {
    pub fn is_first_time(&self, order_count: u32) -> bool {
        match self {
            Self::LiveCart       => order_count == 0,
            Self::CompletedOrder => order_count <= 1,
        }
    }

    pub fn is_returning(&self, order_count: u32) -> bool {
        match self {
            Self::LiveCart       => order_count > 0,
            Self::CompletedOrder => order_count > 1,
        }
    }
}

/// Customer identity as seen by one call site.
struct Shopper<'c> {
    user_id: Option<UserId>,
    email:   Option<&'c str>,
    basis:   OrderCountBasis,
}

pub struct TargetingEngine<'a, H: CustomerHistory + ?Sized> {
    history:    &'a H,
    dismissals: &'a dyn DismissLedger,
    config:     &'a EngineConfig,
}

impl<'a, H: CustomerHistory + ?Sized> TargetingEngine<'a, H> {
    pub fn new(history: &'a H, dismissals: &'a dyn DismissLedger, config: &'a EngineConfig) -> Self {
        Self { history, dismissals, config }
    }

    /// Eligibility on a live checkout or cart request.
    pub fn should_show(&self, offer: &Offer, ctx: &RequestContext) -> bool {
        let rules = &offer.rules;
        let cart = ctx.cart.as_ref();

        if !self.basics_allow(offer, ctx.now) {
            return false;
        }
        if !roles_allow(rules, ctx.user.as_ref().map(|u| u.roles.as_slice())) {
            return reject(offer, "role");
        }
        if !device_allows(rules.device_target, ctx.device) {
            return reject(offer, "device");
        }
        if !country_allows(&rules.country_codes, ctx.country().as_deref()) {
            return reject(offer, "country");
        }
        if !cart_totals_allow(rules, cart.map(|c| (c.subtotal, c.item_count()))) {
            return reject(offer, "cart total");
        }
        let items = cart.map(|c| c.items.as_slice());
        if !trigger_products_allow(&rules.trigger_product_ids, items) {
            return reject(offer, "trigger product");
        }
        if !trigger_categories_allow(&rules.trigger_category_ids, items) {
            return reject(offer, "trigger category");
        }
        if offer.settings.skip_if_in_cart && cart.is_some_and(|c: &Cart| c.contains_product(offer.product_id)) {
            return reject(offer, "already in cart");
        }

        let user_email = ctx
            .user
            .as_ref()
            .map(|u| u.email.as_str())
            .filter(|e| !e.is_empty());
        let shopper = Shopper {
            user_id: ctx.user_id(),
            email:   user_email,
            basis:   OrderCountBasis::LiveCart,
        };
        if !self.customer_allows(offer, &shopper) {
            return false;
        }

        // Guests are never excluded for past purchases.
        if offer.settings.skip_if_purchased
            && shopper.user_id.is_some()
            && self
                .history
                .bought_product_before(shopper.email, shopper.user_id, offer.product_id)
        {
            return reject(offer, "already purchased");
        }

        self.dismiss_allows(offer, ctx.actor().as_ref())
    }

    /// Eligibility after checkout, read from the completed order.
    pub fn should_show_for_order(&self, offer: &Offer, ctx: &OrderContext) -> bool {
        let rules = &offer.rules;
        let order = &ctx.order;

        if !self.basics_allow(offer, ctx.now) {
            return false;
        }
        if !device_allows(rules.device_target, ctx.device) {
            return reject(offer, "device");
        }
        if !country_allows(&rules.country_codes, ctx.country().as_deref()) {
            return reject(offer, "country");
        }
        if !cart_totals_allow(rules, Some((order.subtotal, order.item_count()))) {
            return reject(offer, "order total");
        }
        if !trigger_products_allow(&rules.trigger_product_ids, Some(order.items.as_slice())) {
            return reject(offer, "trigger product");
        }
        if !trigger_categories_allow(&rules.trigger_category_ids, Some(order.items.as_slice())) {
            return reject(offer, "trigger category");
        }

        let billing_email = order
            .billing_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty());
        let shopper = Shopper {
            user_id: order.customer(),
            email:   billing_email,
            basis:   OrderCountBasis::CompletedOrder,
        };
        if !self.customer_allows(offer, &shopper) {
            return false;
        }

        if offer.settings.skip_if_purchased
            && (shopper.email.is_some() || shopper.user_id.is_some())
            && self
                .history
                .bought_product_before(shopper.email, shopper.user_id, offer.product_id)
        {
            return reject(offer, "already purchased");
        }

        self.dismiss_allows(offer, Some(&ctx.actor()))
    }

    fn basics_allow(&self, offer: &Offer, now: DateTime<Utc>) -> bool {
        if offer.product_id <= 0 {
            return reject(offer, "no product");
        }
        if !schedule_allows(&offer.schedule, now) {
            return reject(offer, "schedule");
        }
        true
    }

    fn customer_allows(&self, offer: &Offer, shopper: &Shopper<'_>) -> bool {
        let rules = &offer.rules;

        if let Some(required) = rules.customer_email.as_deref() {
            if !shopper.email.is_some_and(|e| e.eq_ignore_ascii_case(required.trim())) {
                return reject(offer, "customer email");
            }
        }

        let needs_order_count = rules.first_time_only
            || rules.returning_only
            || rules.purchase_frequency_min.is_some();
        let needs_user = needs_order_count || rules.lifetime_spend_threshold.is_some();
        let user_id = match shopper.user_id {
            Some(id) => Some(id),
            None if needs_user => return reject(offer, "requires a customer account"),
            None => None,
        };

        if let (Some(threshold), Some(id)) = (rules.lifetime_spend_threshold, user_id) {
            if self.history.lifetime_spent(id) < threshold {
                return reject(offer, "lifetime spend");
            }
        }

        if let (true, Some(id)) = (needs_order_count, user_id) {
            let order_count = self.history.order_count(id);
            if rules.first_time_only && !shopper.basis.is_first_time(order_count) {
                return reject(offer, "first-time only");
            }
            if rules.returning_only && !shopper.basis.is_returning(order_count) {
                return reject(offer, "returning only");
            }
            if rules.purchase_frequency_min.is_some_and(|min| order_count < min) {
                return reject(offer, "purchase frequency");
            }
        }

        if !rules.purchased_product_ids.is_empty() {
            if shopper.email.is_none() && shopper.user_id.is_none() {
                return reject(offer, "purchased products (anonymous)");
            }
            let bought_any = rules
                .purchased_product_ids
                .iter()
                .any(|pid| self.history.bought_product_before(shopper.email, shopper.user_id, *pid));
            if !bought_any {
                return reject(offer, "purchased products");
            }
        }

        if !rules.purchased_category_ids.is_empty() {
            let Some(id) = shopper.user_id else {
                return reject(offer, "purchased categories (anonymous)");
            };
            if !self.bought_from_categories(id, &rules.purchased_category_ids) {
                return reject(offer, "purchased categories");
            }
        }

        true
    }

    /// Scans the customer's most recent qualifying orders, newest first.
    fn bought_from_categories(&self, user_id: UserId, categories: &[CategoryId]) -> bool {
        self.history
            .recent_orders(
                user_id,
                &self.config.category_history_statuses,
                self.config.category_history_limit,
            )
            .iter()
            .flat_map(|o| o.items.iter())
            .any(|item| item.category_ids.iter().any(|c| categories.contains(c)))
    }

    fn dismiss_allows(&self, offer: &Offer, actor: Option<&Actor>) -> bool {
        let (Some(limit), Some(actor)) = (offer.settings.dismiss_limit, actor) else {
            return true;
        };
        match self.dismissals.dismiss_count(offer.id, actor) {
            Ok(count) if count >= limit => reject(offer, "dismiss limit"),
            Ok(_) => true,
            Err(e) => {
                log::warn!("offer {}: dismiss count unavailable, hiding offer: {e}", offer.id);
                false
            }
        }
    }
}

fn reject(offer: &Offer, reason: &str) -> bool {
    log::debug!("offer {} rejected: {reason}", offer.id);
    false
}

// ── Pure predicates ───────────────────────────────────────────────

/// Date bounds and time window are inclusive. Times compare to the minute.
pub fn schedule_allows(schedule: &OfferSchedule, now: DateTime<Utc>) -> bool {
    let today = now.date_naive();
    if schedule.start_date.is_some_and(|start| today < start) {
        return false;
    }
    if schedule.end_date.is_some_and(|end| today > end) {
        return false;
    }
    if !schedule.weekdays.is_empty() && !schedule.weekdays.contains(&today.weekday()) {
        return false;
    }

    let current = to_minute(now.time());
    if schedule.start_time.is_some_and(|start| current < to_minute(start)) {
        return false;
    }
    if schedule.end_time.is_some_and(|end| current > to_minute(end)) {
        return false;
    }
    true
}

fn to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

pub fn roles_allow(rules: &OfferRules, user_roles: Option<&[String]>) -> bool {
    if rules.user_roles.is_empty() {
        return true;
    }
    user_roles.is_some_and(|roles| {
        roles
            .iter()
            .any(|role| rules.user_roles.iter().any(|allowed| allowed.eq_ignore_ascii_case(role)))
    })
}

pub fn device_allows(target: DeviceTarget, device: DeviceClass) -> bool {
    match target {
        DeviceTarget::All     => true,
        DeviceTarget::Mobile  => device == DeviceClass::Mobile,
        DeviceTarget::Desktop => device == DeviceClass::Desktop,
    }
}

pub fn country_allows(allowed: &[String], country: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    country.is_some_and(|c| allowed.iter().any(|a| a.eq_ignore_ascii_case(c)))
}

/// `totals` is `(subtotal, item_count)`; `None` when there is no cart.
pub fn cart_totals_allow(rules: &OfferRules, totals: Option<(f64, u32)>) -> bool {
    let Some((subtotal, item_count)) = totals else {
        return !rules.has_cart_constraints();
    };
    if rules.min_cart_total.is_some_and(|min| subtotal < min) {
        return false;
    }
    if rules.max_cart_total.is_some_and(|max| subtotal > max) {
        return false;
    }
    if rules.quantity_threshold.is_some_and(|threshold| item_count < threshold) {
        return false;
    }
    true
}

pub fn trigger_products_allow(triggers: &[ProductId], items: Option<&[LineItem]>) -> bool {
    if triggers.is_empty() {
        return true;
    }
    items.is_some_and(|items| items.iter().any(|i| triggers.contains(&i.product_id)))
}

pub fn trigger_categories_allow(triggers: &[CategoryId], items: Option<&[LineItem]>) -> bool {
    if triggers.is_empty() {
        return true;
    }
    items.is_some_and(|items| {
        items
            .iter()
            .any(|i| i.category_ids.iter().any(|c| triggers.contains(c)))
    })
}

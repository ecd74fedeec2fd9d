//! Contracts with the host storefront.
//!
//! The engine never reaches into the storefront directly. Everything it needs
//! (catalog, customer history, the current cart or order) arrives through the
//! traits and context snapshots below.

use crate::{
    error::UpsellResult,
    types::{CategoryId, OfferId, OrderId, ProductId, TagId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ── Catalog ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id:                ProductId,
    pub name:              String,
    pub price:             f64,
    #[serde(default)]
    pub category_ids:      Vec<CategoryId>,
    #[serde(default)]
    pub tag_ids:           Vec<TagId>,
    #[serde(default)]
    pub short_description: String,
}

pub trait Catalog {
    fn product(&self, product_id: ProductId) -> Option<Product>;

    /// "Frequently bought together" candidates for a product.
    fn related_products(&self, product_id: ProductId, limit: usize) -> Vec<ProductId>;

    fn products_in_categories(&self, category_ids: &[CategoryId], limit: usize) -> Vec<ProductId>;

    fn products_with_tags(&self, tag_ids: &[TagId], limit: usize) -> Vec<ProductId>;

    /// Times a coupon has been used, or `None` if no such coupon exists.
    fn coupon_usage(&self, code: &str) -> Option<u32>;
}

// ── Customer history ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id:   ProductId,
    #[serde(default = "one")]
    pub quantity:     u32,
    #[serde(default)]
    pub category_ids: Vec<CategoryId>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PastOrder {
    pub id:     OrderId,
    pub status: String,
    #[serde(default)]
    pub items:  Vec<LineItem>,
}

pub trait CustomerHistory {
    fn lifetime_spent(&self, user_id: UserId) -> f64;

    fn order_count(&self, user_id: UserId) -> u32;

    fn bought_product_before(
        &self,
        email: Option<&str>,
        user_id: Option<UserId>,
        product_id: ProductId,
    ) -> bool;

    /// The customer's orders in one of `statuses`, newest first, at most `limit`.
    fn recent_orders(&self, user_id: UserId, statuses: &[String], limit: usize) -> Vec<PastOrder>;
}

/// Everything the engine needs from the storefront.
pub trait Host: Catalog + CustomerHistory {}

impl<T: Catalog + CustomerHistory> Host for T {}

/// Persisted per-actor dismiss counts.
pub trait DismissLedger {
    fn dismiss_count(&self, offer_id: OfferId, actor: &Actor) -> UpsellResult<u32>;
}

// ── Request snapshots ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub items:    Vec<LineItem>,
    pub subtotal: f64,
}

impl Cart {
    /// Total quantity across all lines.
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn contains_product(&self, product_id: ProductId) -> bool {
        self.items.iter().any(|i| i.product_id == product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id:    UserId,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Mobile,
    #[default]
    Desktop,
}

/// Who a dismiss counter belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Actor {
    User(UserId),
    Session(String),
    Order(OrderId),
}

impl Actor {
    pub fn key(&self) -> String {
        match self {
            Actor::User(id)    => format!("user:{id}"),
            Actor::Session(id) => format!("session:{id}"),
            Actor::Order(id)   => format!("order:{id}"),
        }
    }
}

/// The identity fragments that seed A/B bucketing, most stable first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitorIdentity {
    pub user_id:     Option<UserId>,
    pub session_id:  Option<String>,
    pub remote_addr: Option<String>,
}

impl VisitorIdentity {
    /// `u:<id>`, else `s:<session>`, else `ip:<addr>`, else empty.
    pub fn seed_fragment(&self) -> String {
        if let Some(id) = self.user_id.filter(|id| *id > 0) {
            return format!("u:{id}");
        }
        if let Some(session) = self.session_id.as_deref().filter(|s| !s.is_empty()) {
            return format!("s:{session}");
        }
        if let Some(addr) = self.remote_addr.as_deref().filter(|a| !a.is_empty()) {
            return format!("ip:{addr}");
        }
        String::new()
    }
}

/// Snapshot of a live storefront request (checkout or cart page).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub now:              DateTime<Utc>,
    #[serde(default)]
    pub cart:             Option<Cart>,
    #[serde(default)]
    pub user:             Option<User>,
    #[serde(default)]
    pub session_id:       Option<String>,
    #[serde(default)]
    pub remote_addr:      Option<String>,
    #[serde(default)]
    pub device:           DeviceClass,
    #[serde(default)]
    pub billing_country:  Option<String>,
    #[serde(default)]
    pub shipping_country: Option<String>,
    #[serde(default)]
    pub geo_country:      Option<String>,
}

impl RequestContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            cart: None,
            user: None,
            session_id: None,
            remote_addr: None,
            device: DeviceClass::Desktop,
            billing_country: None,
            shipping_country: None,
            geo_country: None,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user.as_ref().map(|u| u.id).filter(|id| *id > 0)
    }

    pub fn visitor(&self) -> VisitorIdentity {
        VisitorIdentity {
            user_id:     self.user_id(),
            session_id:  self.session_id.clone(),
            remote_addr: self.remote_addr.clone(),
        }
    }

    /// Logged-in user, else the session. `None` for anonymous requests
    /// without a session.
    pub fn actor(&self) -> Option<Actor> {
        if let Some(id) = self.user_id() {
            return Some(Actor::User(id));
        }
        self.session_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| Actor::Session(s.to_string()))
    }

    /// Billing country, else shipping, else geolocation. Uppercased.
    pub fn country(&self) -> Option<String> {
        first_country(&[&self.billing_country, &self.shipping_country, &self.geo_country])
    }
}

/// Snapshot of a completed order, used for post-purchase offers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id:               OrderId,
    #[serde(default)]
    pub customer_id:      Option<UserId>,
    #[serde(default)]
    pub billing_email:    Option<String>,
    #[serde(default)]
    pub billing_country:  Option<String>,
    #[serde(default)]
    pub shipping_country: Option<String>,
    #[serde(default)]
    pub subtotal:         f64,
    #[serde(default)]
    pub items:            Vec<LineItem>,
    /// The host already recorded an accepted upsell on this order.
    #[serde(default)]
    pub upsell_accepted:  bool,
    /// The host already recorded an accept click on this order.
    #[serde(default)]
    pub upsell_clicked:   bool,
}

impl OrderSnapshot {
    pub fn customer(&self) -> Option<UserId> {
        self.customer_id.filter(|id| *id > 0)
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderContext {
    pub now:    DateTime<Utc>,
    pub order:  OrderSnapshot,
    #[serde(default)]
    pub device: DeviceClass,
}

impl OrderContext {
    /// The order's customer, else the order itself.
    pub fn actor(&self) -> Actor {
        match self.order.customer() {
            Some(id) => Actor::User(id),
            None => Actor::Order(self.order.id),
        }
    }

    /// Billing country, else shipping. Orders have no geolocation fallback.
    pub fn country(&self) -> Option<String> {
        first_country(&[&self.order.billing_country, &self.order.shipping_country])
    }
}

fn first_country(candidates: &[&Option<String>]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|c| c.as_deref())
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_uppercase)
}

/// Request-scoped record of orders whose post-purchase offer was already
/// rendered, so one request never renders the same order twice.
#[derive(Debug, Default)]
pub struct RenderScope {
    processed_orders: HashSet<OrderId>,
}

impl RenderScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time an order is seen in this scope.
    pub fn claim_order(&mut self, order_id: OrderId) -> bool {
        self.processed_orders.insert(order_id)
    }
}

// ── In-memory host ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub user_id:        UserId,
    #[serde(default)]
    pub email:          String,
    #[serde(default)]
    pub lifetime_spent: f64,
    /// Oldest first.
    #[serde(default)]
    pub orders:         Vec<PastOrder>,
}

/// A self-contained storefront for tests and the runner. Deserializable from
/// a JSON fixture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryHost {
    pub products:  Vec<Product>,
    pub related:   HashMap<ProductId, Vec<ProductId>>,
    pub coupons:   HashMap<String, u32>,
    pub customers: Vec<CustomerRecord>,
}

impl InMemoryHost {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn with_product(mut self, product: Product) -> Self {
        self.products.retain(|p| p.id != product.id);
        self.products.push(product);
        self
    }

    pub fn with_customer(mut self, customer: CustomerRecord) -> Self {
        self.customers.retain(|c| c.user_id != customer.user_id);
        self.customers.push(customer);
        self
    }

    pub fn with_coupon(mut self, code: &str, usage: u32) -> Self {
        self.coupons.insert(code.to_string(), usage);
        self
    }

    fn customer(&self, user_id: UserId) -> Option<&CustomerRecord> {
        self.customers.iter().find(|c| c.user_id == user_id)
    }

    fn collect_products<F>(&self, limit: usize, mut keep: F) -> Vec<ProductId>
    where
        F: FnMut(&Product) -> bool,
    {
        self.products
            .iter()
            .filter(|p| keep(p))
            .map(|p| p.id)
            .take(limit)
            .collect()
    }
}

impl Catalog for InMemoryHost {
    fn product(&self, product_id: ProductId) -> Option<Product> {
        self.products.iter().find(|p| p.id == product_id).cloned()
    }

    fn related_products(&self, product_id: ProductId, limit: usize) -> Vec<ProductId> {
        self.related
            .get(&product_id)
            .map(|ids| ids.iter().copied().take(limit).collect())
            .unwrap_or_default()
    }

    fn products_in_categories(&self, category_ids: &[CategoryId], limit: usize) -> Vec<ProductId> {
        self.collect_products(limit, |p| p.category_ids.iter().any(|c| category_ids.contains(c)))
    }

    fn products_with_tags(&self, tag_ids: &[TagId], limit: usize) -> Vec<ProductId> {
        self.collect_products(limit, |p| p.tag_ids.iter().any(|t| tag_ids.contains(t)))
    }

    fn coupon_usage(&self, code: &str) -> Option<u32> {
        self.coupons.get(code).copied()
    }
}

impl CustomerHistory for InMemoryHost {
    fn lifetime_spent(&self, user_id: UserId) -> f64 {
        self.customer(user_id).map(|c| c.lifetime_spent).unwrap_or(0.0)
    }

    fn order_count(&self, user_id: UserId) -> u32 {
        self.customer(user_id).map(|c| c.orders.len() as u32).unwrap_or(0)
    }

    fn bought_product_before(
        &self,
        email: Option<&str>,
        user_id: Option<UserId>,
        product_id: ProductId,
    ) -> bool {
        self.customers
            .iter()
            .filter(|c| {
                user_id.is_some_and(|id| id == c.user_id)
                    || email.is_some_and(|e| !e.is_empty() && e.eq_ignore_ascii_case(&c.email))
            })
            .flat_map(|c| c.orders.iter())
            .flat_map(|o| o.items.iter())
            .any(|item| item.product_id == product_id)
    }

    fn recent_orders(&self, user_id: UserId, statuses: &[String], limit: usize) -> Vec<PastOrder> {
        let Some(customer) = self.customer(user_id) else {
            return Vec::new();
        };
        customer
            .orders
            .iter()
            .rev()
            .filter(|o| statuses.iter().any(|s| s == &o.status))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visitor_seed_prefers_user_then_session_then_ip() {
        let mut visitor = VisitorIdentity {
            user_id: Some(7),
            session_id: Some("abc".into()),
            remote_addr: Some("10.0.0.1".into()),
        };
        assert_eq!(visitor.seed_fragment(), "u:7");
        visitor.user_id = None;
        assert_eq!(visitor.seed_fragment(), "s:abc");
        visitor.session_id = None;
        assert_eq!(visitor.seed_fragment(), "ip:10.0.0.1");
        visitor.remote_addr = None;
        assert_eq!(visitor.seed_fragment(), "");
    }

    #[test]
    fn order_country_skips_geolocation() {
        let mut ctx = RequestContext::new(Utc::now());
        ctx.geo_country = Some("de".into());
        assert_eq!(ctx.country().as_deref(), Some("DE"));

        let order = OrderContext {
            now: Utc::now(),
            order: OrderSnapshot { id: 4, shipping_country: Some("fr".into()), ..Default::default() },
            device: DeviceClass::Desktop,
        };
        assert_eq!(order.country().as_deref(), Some("FR"));
        assert_eq!(order.actor(), Actor::Order(4));
    }

    #[test]
    fn render_scope_claims_each_order_once() {
        let mut scope = RenderScope::new();
        assert!(scope.claim_order(10));
        assert!(!scope.claim_order(10));
        assert!(scope.claim_order(11));
    }
}

//! Synthetic storefront traffic.
//!
//! Drives an `UpsellEngine` with seeded visitors: each builds a cart, sees
//! whatever checkout and cart offers target them, accepts, skips or dismisses,
//! and may complete an order that then gets a post-purchase offer. The same
//! seed against the same offers always yields the same report.

use crate::{
    clock::FixedClock,
    engine::{Interaction, UpsellEngine},
    host::{Cart, DeviceClass, LineItem, OrderContext, OrderSnapshot, Product, RenderScope, RequestContext, User},
    offer::{round2, OfferType},
    presentation::OfferPresentation,
    rng::{TrafficRng, TrafficStream},
    types::{OrderId, UserId},
    variant::Variant,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const COUNTRIES: [&str; 5] = ["US", "GB", "DE", "CA", "AU"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    pub seed:              u64,
    pub visitors:          u32,
    /// Share of visitors who are logged in as one of `known_customers`.
    pub login_rate:        f64,
    pub mobile_rate:       f64,
    /// Acceptance probability for variant A; B uses `accept_rate_b`.
    pub accept_rate_a:     f64,
    pub accept_rate_b:     f64,
    pub skip_rate:         f64,
    pub dismiss_rate:      f64,
    pub checkout_rate:     f64,
    pub minutes_between:   i64,
    pub known_customers:   Vec<UserId>,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            seed:            42,
            visitors:        500,
            login_rate:      0.4,
            mobile_rate:     0.5,
            accept_rate_a:   0.18,
            accept_rate_b:   0.12,
            skip_rate:       0.5,
            dismiss_rate:    0.1,
            checkout_rate:   0.6,
            minutes_between: 3,
            known_customers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficReport {
    pub visitors:      u32,
    pub offers_shown:  u64,
    pub accepts:       u64,
    pub skips:         u64,
    pub dismissals:    u64,
    pub orders:        u64,
    pub shown_a:       u64,
    pub shown_b:       u64,
    pub revenue:       f64,
}

pub struct TrafficSimulator<'a> {
    engine:   &'a UpsellEngine,
    clock:    Arc<FixedClock>,
    products: &'a [Product],
    config:   TrafficConfig,
    identity: TrafficRng,
    cart:     TrafficRng,
    behaviour: TrafficRng,
    checkout: TrafficRng,
}

impl<'a> TrafficSimulator<'a> {
    /// `clock` must be the clock the engine was built with; the simulator
    /// advances it between visitors.
    pub fn new(
        engine: &'a UpsellEngine,
        clock: Arc<FixedClock>,
        products: &'a [Product],
        config: TrafficConfig,
    ) -> Self {
        let seed = config.seed;
        Self {
            engine,
            clock,
            products,
            config,
            identity:  TrafficRng::new(seed, TrafficStream::Identity),
            cart:      TrafficRng::new(seed, TrafficStream::Cart),
            behaviour: TrafficRng::new(seed, TrafficStream::Behaviour),
            checkout:  TrafficRng::new(seed, TrafficStream::Checkout),
        }
    }

    pub fn run(mut self) -> TrafficReport {
        let mut report = TrafficReport::default();
        let mut next_order_id: OrderId = 1_000;

        for _ in 0..self.config.visitors {
            self.clock
                .advance(chrono::Duration::minutes(self.config.minutes_between.max(1)));
            report.visitors += 1;

            let ctx = self.next_visitor();
            for offer_type in [OfferType::Checkout, OfferType::Cart] {
                if let Some(shown) = self.engine.eligible_offer(offer_type, &ctx) {
                    self.react(&shown, &ctx, None, &mut report);
                }
            }

            if !self.checkout.chance(self.config.checkout_rate) {
                continue;
            }
            next_order_id += 1;
            report.orders += 1;
            let order_ctx = order_from_request(&ctx, next_order_id);
            let mut scope = RenderScope::new();
            if let Some(shown) = self.engine.post_purchase_offer(&order_ctx, &mut scope) {
                self.react(&shown, &ctx, Some(&order_ctx), &mut report);
            }
        }

        report.revenue = round2(report.revenue);
        log::info!(
            "simulated {} visitors: {} offers shown, {} accepted",
            report.visitors,
            report.offers_shown,
            report.accepts
        );
        report
    }

    fn next_visitor(&mut self) -> RequestContext {
        let mut ctx = RequestContext::new(self.engine.now());
        ctx.session_id = Some(self.identity.next_uuid().to_string());
        ctx.remote_addr = Some(format!(
            "10.{}.{}.{}",
            self.identity.next_u64_below(256),
            self.identity.next_u64_below(256),
            self.identity.next_u64_below(256)
        ));
        if self.identity.chance(self.config.login_rate) {
            if let Some(id) = self.identity.pick(&self.config.known_customers).copied() {
                ctx.user = Some(User {
                    id,
                    roles: vec!["customer".into()],
                    email: format!("customer{id}@example.com"),
                });
            }
        }
        ctx.device = if self.identity.chance(self.config.mobile_rate) {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        };
        ctx.billing_country = self.identity.pick(&COUNTRIES).map(|c| c.to_string());

        let lines = 1 + self.cart.next_u64_below(3);
        let mut cart = Cart::default();
        for _ in 0..lines {
            let Some(product) = self.cart.pick(self.products) else {
                break;
            };
            let quantity = 1 + self.cart.next_u64_below(2) as u32;
            cart.subtotal += product.price * f64::from(quantity);
            cart.items.push(LineItem {
                product_id: product.id,
                quantity,
                category_ids: product.category_ids.clone(),
            });
        }
        cart.subtotal = round2(cart.subtotal);
        ctx.cart = Some(cart);
        ctx
    }

    fn react(
        &mut self,
        shown: &OfferPresentation,
        ctx: &RequestContext,
        order: Option<&OrderContext>,
        report: &mut TrafficReport,
    ) {
        let interaction = Interaction {
            offer_id: shown.offer.id,
            variant:  Some(shown.variant.as_str().to_string()),
            order_id: order.map(|o| o.order.id),
            user_id:  ctx.user_id(),
            context:  shown.offer.offer_type.to_string(),
        };
        self.engine.record_view(&interaction);
        report.offers_shown += 1;
        match shown.variant {
            Variant::A => report.shown_a += 1,
            Variant::B => report.shown_b += 1,
        }

        let accept_rate = match shown.variant {
            Variant::A => self.config.accept_rate_a,
            Variant::B => self.config.accept_rate_b,
        };
        if self.behaviour.chance(accept_rate) {
            self.engine.record_accept(&interaction, shown.offer_price);
            report.accepts += 1;
            report.revenue += shown.offer_price;
            return;
        }
        if self.behaviour.chance(self.config.skip_rate) {
            self.engine.record_skip(&interaction);
            report.skips += 1;
        }
        if self.behaviour.chance(self.config.dismiss_rate) {
            let actor = match order {
                Some(order_ctx) => Some(order_ctx.actor()),
                None => ctx.actor(),
            };
            if actor.is_some_and(|a| self.engine.dismiss(shown.offer.id, &a).is_some()) {
                report.dismissals += 1;
            }
        }
    }
}

fn order_from_request(ctx: &RequestContext, order_id: OrderId) -> OrderContext {
    let cart = ctx.cart.clone().unwrap_or_default();
    OrderContext {
        now:    ctx.now,
        device: ctx.device,
        order:  OrderSnapshot {
            id:               order_id,
            customer_id:      ctx.user_id(),
            billing_email:    ctx.user.as_ref().map(|u| u.email.clone()),
            billing_country:  ctx.billing_country.clone(),
            shipping_country: None,
            subtotal:         cart.subtotal,
            items:            cart.items,
            upsell_accepted:  false,
            upsell_clicked:   false,
        },
    }
}

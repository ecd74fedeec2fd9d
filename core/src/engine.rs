//! The upsell engine: the one type a storefront talks to.
//!
//! FLOW (per offer slot):
//!   1. Global toggle for the offer type.
//!   2. Offer store yields active offers in priority order.
//!   3. Targeting picks the first offer that passes every rule.
//!   4. The variant resolver assigns A or B once per visitor/order scope.
//!   5. The presenter prices the offer and resolves countdown, bundle and coupon.
//!
//! RULES:
//!   - Public facade methods never return errors. Internal failures are logged
//!     and answered with "no offer", `false` or an empty summary.
//!   - Component accessors (`offers()`, `targeting()`, ...) expose the
//!     fallible APIs for admin tooling and tests.

use crate::{
    analytics::{Analytics, AnalyticsFilters, AnalyticsSummary, OfferPerformance},
    cache::OfferCache,
    clock::{Clock, SystemClock},
    config::EngineConfig,
    error::{UpsellError, UpsellResult},
    event::{ActionType, AnalyticsEvent, EventSink},
    host::{Actor, Host, OrderContext, RenderScope, RequestContext, VisitorIdentity},
    offer::{Offer, OfferType},
    presentation::{coupon_for_acceptance, OfferPresentation, Presenter},
    repository::OfferRepository,
    store::UpsellStore,
    targeting::TargetingEngine,
    types::{OfferId, OrderId, UserId},
    variant::{apply_variant, Variant, VariantResolver},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One storefront interaction with a rendered offer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interaction {
    pub offer_id: OfferId,
    /// Variant the visitor saw. Unknown or missing variants skip A/B counting.
    pub variant:  Option<String>,
    pub order_id: Option<OrderId>,
    pub user_id:  Option<UserId>,
    pub context:  String,
}

pub struct UpsellEngine {
    config: EngineConfig,
    store:  UpsellStore,
    cache:  OfferCache,
    clock:  Box<dyn Clock>,
    host:   Box<dyn Host>,
    sinks:  Vec<Box<dyn EventSink>>,
}

impl UpsellEngine {
    pub fn new(config: EngineConfig, store: UpsellStore, host: Box<dyn Host>) -> UpsellResult<Self> {
        config
            .validate()
            .map_err(|e| UpsellError::Config(e.to_string()))?;
        let cache = OfferCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_max_entries,
        );
        Ok(Self {
            config,
            store,
            cache,
            clock: Box::new(SystemClock),
            host,
            sinks: Vec::new(),
        })
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Mirror every tracked event to an extra sink (e.g. the host's event bus).
    pub fn with_event_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Apply schema migrations, then import legacy settings if the offer
    /// table is empty. Returns the ids of any imported offers.
    pub fn bootstrap(&self) -> UpsellResult<Vec<OfferId>> {
        self.store.migrate()?;
        self.offers().migrate_legacy_settings(&self.config.legacy)
    }

    /// Remove all offers, analytics and visitor state.
    pub fn uninstall(&self) -> UpsellResult<()> {
        self.store.uninstall()?;
        self.cache.clear();
        Ok(())
    }

    // ── Components ────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &UpsellStore {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn offers(&self) -> OfferRepository<'_> {
        OfferRepository::new(&self.store, &self.cache, &*self.clock)
    }

    pub fn targeting(&self) -> TargetingEngine<'_, dyn Host> {
        TargetingEngine::new(&*self.host, &self.store, &self.config)
    }

    pub fn variants(&self) -> VariantResolver<'_> {
        VariantResolver::new(&self.store)
    }

    pub fn analytics(&self) -> Analytics<'_> {
        Analytics::new(&self.store, &self.config)
    }

    fn presenter(&self) -> Presenter<'_, dyn Host> {
        Presenter::new(&*self.host, &self.store, &self.config)
    }

    // ── Eligibility ───────────────────────────────────────────────

    /// The offer to render in a checkout or cart slot, if any.
    pub fn eligible_offer(&self, offer_type: OfferType, ctx: &RequestContext) -> Option<OfferPresentation> {
        if !self.config.type_enabled(offer_type) {
            return None;
        }
        fail_closed("eligible offer", self.try_eligible(&[offer_type], ctx, |_| true))
    }

    /// The offer to show when a visitor is about to leave. Cart offers are
    /// preferred on the cart page, checkout offers elsewhere.
    pub fn exit_intent_offer(&self, ctx: &RequestContext, on_cart_page: bool) -> Option<OfferPresentation> {
        let order = if on_cart_page {
            [OfferType::Cart, OfferType::Checkout]
        } else {
            [OfferType::Checkout, OfferType::Cart]
        };
        let enabled: Vec<OfferType> = order
            .into_iter()
            .filter(|t| self.config.type_enabled(*t))
            .collect();
        fail_closed(
            "exit-intent offer",
            self.try_eligible(&enabled, ctx, |offer| {
                offer.settings.abandoned_enabled && offer.settings.exit_intent_enabled
            }),
        )
    }

    fn try_eligible<F>(
        &self,
        types: &[OfferType],
        ctx: &RequestContext,
        extra: F,
    ) -> UpsellResult<Option<OfferPresentation>>
    where
        F: Fn(&Offer) -> bool,
    {
        let targeting = self.targeting();
        let repository = self.offers();
        for offer_type in types {
            let found = repository.get_first_active(*offer_type, |offer| {
                extra(offer) && targeting.should_show(offer, ctx)
            })?;
            if let Some(offer) = found {
                let visitor = ctx.visitor();
                let scope_key = visitor.seed_fragment();
                return self.present(&offer, &visitor, &scope_key);
            }
        }
        Ok(None)
    }

    /// The post-purchase offer for a completed order. Each order is rendered
    /// at most once per `scope`, and never again once its upsell was clicked
    /// or accepted.
    pub fn post_purchase_offer(
        &self,
        ctx: &OrderContext,
        scope: &mut RenderScope,
    ) -> Option<OfferPresentation> {
        if !self.config.enable_post_purchase_upsell {
            return None;
        }
        if ctx.order.upsell_accepted || ctx.order.upsell_clicked {
            log::debug!("order {} upsell already taken", ctx.order.id);
            return None;
        }
        if !scope.claim_order(ctx.order.id) {
            log::debug!("order {} already rendered in this request", ctx.order.id);
            return None;
        }
        fail_closed("post-purchase offer", self.try_post_purchase(ctx))
    }

    fn try_post_purchase(&self, ctx: &OrderContext) -> UpsellResult<Option<OfferPresentation>> {
        if self.store.order_upsell_taken(ctx.order.id)? {
            log::debug!("order {} upsell already taken", ctx.order.id);
            return Ok(None);
        }
        let targeting = self.targeting();
        let found = self
            .offers()
            .get_first_active(OfferType::PostPurchase, |offer| {
                targeting.should_show_for_order(offer, ctx)
            })?;
        match found {
            Some(offer) => self.present(&offer, &order_visitor(ctx), &order_scope(ctx.order.id)),
            None => Ok(None),
        }
    }

    fn present(
        &self,
        offer: &Offer,
        visitor: &VisitorIdentity,
        scope_key: &str,
    ) -> UpsellResult<Option<OfferPresentation>> {
        let now = self.clock.now();
        let variant = self.variants().assign(offer, visitor, scope_key, now)?;
        self.presenter().present(apply_variant(offer, variant), scope_key, now)
    }

    // ── Variants ──────────────────────────────────────────────────

    /// Variant for a visitor, without persisting it. Unknown offers get A.
    pub fn resolve_variant(&self, offer_id: OfferId, visitor: &VisitorIdentity) -> Variant {
        match self.offers().get(offer_id) {
            Ok(Some(offer)) => self.variants().resolve(&offer, visitor),
            Ok(None) => Variant::A,
            Err(e) => {
                log::warn!("offer {offer_id}: lookup failed, using variant a: {e}");
                Variant::A
            }
        }
    }

    /// Variant to credit on acceptance: the requested one if valid, else the
    /// scope's stored assignment, else A.
    pub fn accepted_variant(&self, offer_id: OfferId, scope_key: &str, requested: Option<&str>) -> Variant {
        if let Some(variant) = requested.and_then(Variant::parse) {
            return variant;
        }
        match self.variants().stored(offer_id, scope_key) {
            Ok(stored) => stored.unwrap_or(Variant::A),
            Err(e) => {
                log::warn!("offer {offer_id}: stored variant unavailable: {e}");
                Variant::A
            }
        }
    }

    // ── Interactions ──────────────────────────────────────────────

    pub fn record_view(&self, interaction: &Interaction) -> bool {
        self.record(interaction, ActionType::View, 0.0)
    }

    pub fn record_accept(&self, interaction: &Interaction, revenue: f64) -> bool {
        self.record(interaction, ActionType::Accept, revenue)
    }

    pub fn record_accept_click(&self, interaction: &Interaction) -> bool {
        self.record(interaction, ActionType::AcceptClick, 0.0)
    }

    pub fn record_skip(&self, interaction: &Interaction) -> bool {
        self.record(interaction, ActionType::Skip, 0.0)
    }

    /// Track the event and bump variant counters. Returns whether the
    /// analytics event was stored.
    fn record(&self, interaction: &Interaction, action: ActionType, revenue: f64) -> bool {
        let offer = match self.offers().get(interaction.offer_id) {
            Ok(Some(offer)) => offer,
            Ok(None) => {
                log::debug!("ignoring {} for unknown offer {}", action.as_str(), interaction.offer_id);
                return false;
            }
            Err(e) => {
                log::warn!("ignoring {} for offer {}: {e}", action.as_str(), interaction.offer_id);
                return false;
            }
        };

        let event = AnalyticsEvent::new(offer.offer_type, offer.id, action, self.clock.now())
            .with_order(interaction.order_id)
            .with_user(interaction.user_id)
            .with_revenue(revenue)
            .with_context(interaction.context.clone());

        let tracked = self.analytics().track(&event);
        self.mark_order_outcome(&offer, interaction, action);
        for sink in &self.sinks {
            if let Err(e) = sink.record_event(&event) {
                log::warn!("event sink rejected {} for offer {}: {e}", action.as_str(), offer.id);
            }
        }

        if let Some(variant) = interaction.variant.as_deref() {
            if let Err(e) = self.variants().record_event(offer.id, variant, action) {
                log::warn!("offer {}: variant stats not updated: {e}", offer.id);
            }
        }
        tracked
    }

    /// A post-purchase click or accept closes the offer for that order.
    fn mark_order_outcome(&self, offer: &Offer, interaction: &Interaction, action: ActionType) {
        if offer.offer_type != OfferType::PostPurchase {
            return;
        }
        let accepted = match action {
            ActionType::Accept => true,
            ActionType::AcceptClick => false,
            ActionType::View | ActionType::Skip => return,
        };
        let Some(order_id) = interaction.order_id.filter(|id| *id > 0) else {
            return;
        };
        if let Err(e) = self.store.mark_order_upsell(order_id, offer.id, accepted, self.clock.now()) {
            log::warn!("order {order_id}: upsell outcome not recorded: {e}");
        }
    }

    /// Count one dismissal and return the new total.
    pub fn dismiss(&self, offer_id: OfferId, actor: &Actor) -> Option<u32> {
        match self.store.increment_dismiss(offer_id, actor, self.clock.now()) {
            Ok(count) => {
                log::debug!("offer {offer_id} dismissed by {} ({count}x)", actor.key());
                Some(count)
            }
            Err(e) => {
                log::warn!("offer {offer_id}: dismiss not recorded: {e}");
                None
            }
        }
    }

    /// Coupon to apply when the offer is accepted, if any.
    pub fn coupon_for_acceptance(&self, offer_id: OfferId) -> Option<String> {
        let offer = fail_closed("coupon lookup", self.offers().get(offer_id))?;
        coupon_for_acceptance(&offer, &*self.host)
    }

    // ── Reporting ─────────────────────────────────────────────────

    pub fn summary(&self, filters: &AnalyticsFilters) -> AnalyticsSummary {
        self.analytics().summary(filters).unwrap_or_else(|e| {
            log::warn!("analytics summary unavailable: {e}");
            AnalyticsSummary::default()
        })
    }

    pub fn top_offers(&self, limit: usize, filters: &AnalyticsFilters) -> Vec<OfferPerformance> {
        self.analytics().top_offers(limit, filters).unwrap_or_else(|e| {
            log::warn!("top offers unavailable: {e}");
            Vec::new()
        })
    }
}

/// Scope key under which an order's variant and countdown are stored.
pub fn order_scope(order_id: OrderId) -> String {
    format!("order:{order_id}")
}

fn order_visitor(ctx: &OrderContext) -> VisitorIdentity {
    VisitorIdentity {
        user_id:     ctx.order.customer(),
        session_id:  Some(format!("order-{}", ctx.order.id)),
        remote_addr: None,
    }
}

fn fail_closed<T>(what: &str, result: UpsellResult<Option<T>>) -> Option<T> {
    result.unwrap_or_else(|e| {
        log::warn!("{what} failed, showing nothing: {e}");
        None
    })
}

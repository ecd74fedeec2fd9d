//! Turns an eligible, variant-applied offer into what the storefront renders:
//! prices, countdown deadline, bundle items and coupon.

use crate::{
    config::EngineConfig,
    error::UpsellResult,
    host::Catalog,
    offer::{BundleMode, CountdownMode, Offer},
    store::UpsellStore,
    types::ProductId,
    variant::{Variant, VariantOffer},
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferPresentation {
    pub offer:              Offer,
    pub variant:            Variant,
    pub product_name:       String,
    pub short_description:  String,
    pub regular_price:      f64,
    pub offer_price:        f64,
    pub countdown_ends_at:  Option<DateTime<Utc>>,
    pub bundle_product_ids: Vec<ProductId>,
    pub coupon_code:        Option<String>,
}

pub struct Presenter<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
    store:   &'a UpsellStore,
    config:  &'a EngineConfig,
}

impl<'a, C: Catalog + ?Sized> Presenter<'a, C> {
    pub fn new(catalog: &'a C, store: &'a UpsellStore, config: &'a EngineConfig) -> Self {
        Self { catalog, store, config }
    }

    /// `None` when the offered product is not in the catalog.
    pub fn present(
        &self,
        applied: VariantOffer,
        scope_key: &str,
        now: DateTime<Utc>,
    ) -> UpsellResult<Option<OfferPresentation>> {
        let VariantOffer { offer, variant } = applied;
        let Some(product) = self.catalog.product(offer.product_id) else {
            log::debug!("offer {}: product {} not in catalog", offer.id, offer.product_id);
            return Ok(None);
        };

        let countdown_ends_at = self.countdown_deadline(&offer, scope_key, now)?;
        let bundle_product_ids = bundle_products(&offer, self.catalog);
        Ok(Some(OfferPresentation {
            variant,
            product_name: product.name,
            short_description: product.short_description,
            regular_price: product.price,
            offer_price: offer.discounted_price(product.price),
            countdown_ends_at,
            bundle_product_ids,
            coupon_code: offer.settings.coupon.code.clone(),
            offer,
        }))
    }

    /// Fixed countdowns show their end while it is still ahead. Evergreen
    /// countdowns get one deadline per scope, renewed once it has passed.
    pub fn countdown_deadline(
        &self,
        offer: &Offer,
        scope_key: &str,
        now: DateTime<Utc>,
    ) -> UpsellResult<Option<DateTime<Utc>>> {
        let countdown = &offer.settings.countdown;
        match countdown.mode {
            CountdownMode::None => Ok(None),
            CountdownMode::Fixed => Ok(countdown.fixed_end.filter(|end| *end > now)),
            CountdownMode::Evergreen => {
                let minutes = match countdown.evergreen_minutes {
                    0 => self.config.evergreen_default_minutes,
                    m => m,
                }
                .max(1);
                if scope_key.is_empty() {
                    return Ok(Some(now + Duration::minutes(i64::from(minutes))));
                }
                self.store
                    .evergreen_deadline(offer.id, scope_key, now, minutes)
                    .map(Some)
            }
        }
    }
}

/// Bundle items for an offer: distinct, existing, never the offered product
/// itself, at most `bundle.limit`.
pub fn bundle_products<C: Catalog + ?Sized>(offer: &Offer, catalog: &C) -> Vec<ProductId> {
    let bundle = &offer.settings.bundle;
    let limit = usize::from(bundle.limit.clamp(1, 8));
    let fetch = limit + 2;

    let candidates: Vec<ProductId> = match bundle.mode {
        BundleMode::None => return Vec::new(),
        BundleMode::Manual => bundle.product_ids.clone(),
        BundleMode::Fbt => catalog.related_products(offer.product_id, fetch),
        BundleMode::SameCategory => match catalog.product(offer.product_id) {
            Some(p) if !p.category_ids.is_empty() => {
                catalog.products_in_categories(&p.category_ids, fetch)
            }
            _ => Vec::new(),
        },
        BundleMode::TagMatch => match catalog.product(offer.product_id) {
            Some(p) if !p.tag_ids.is_empty() => catalog.products_with_tags(&p.tag_ids, fetch),
            _ => Vec::new(),
        },
    };

    let mut picked: Vec<ProductId> = Vec::with_capacity(limit);
    for id in candidates {
        if picked.len() == limit {
            break;
        }
        if id <= 0 || id == offer.product_id || picked.contains(&id) {
            continue;
        }
        if catalog.product(id).is_some() {
            picked.push(id);
        }
    }
    picked
}

/// Coupon to apply automatically when the offer is accepted: a code is set,
/// auto-apply is on, the coupon exists and is under its usage limit
/// (0 = unlimited).
pub fn coupon_for_acceptance<C: Catalog + ?Sized>(offer: &Offer, catalog: &C) -> Option<String> {
    let coupon = &offer.settings.coupon;
    let code = coupon.code.as_deref().filter(|c| !c.is_empty())?;
    if !coupon.auto_apply {
        return None;
    }
    let used = catalog.coupon_usage(code)?;
    if coupon.usage_limit > 0 && used >= coupon.usage_limit {
        log::debug!("coupon {code} exhausted ({used}/{})", coupon.usage_limit);
        return None;
    }
    Some(code.to_string())
}

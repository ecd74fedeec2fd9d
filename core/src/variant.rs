//! A/B variant resolution.
//!
//! A visitor is bucketed into 0..100 by hashing the offer id together with
//! their most stable identity fragment. Buckets below the split percentage
//! get variant A. Once auto-winner has enough data on both sides, the
//! better-converting variant is served to everyone.
//!
//! RULE: A resolved variant is persisted per scope (visitor or order) and
//! reused; it is never re-rolled within that scope.

use crate::{
    error::UpsellResult,
    event::ActionType,
    host::VisitorIdentity,
    offer::{AbTestSettings, Offer},
    store::UpsellStore,
    types::OfferId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Rates closer than this are a tie.
const RATE_EPSILON: f64 = 0.0001;
/// Floor applied to the configured min-views setting.
const MIN_VIEWS_FLOOR: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    A,
    B,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "a",
            Variant::B => "b",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "a" | "A" => Some(Variant::A),
            "b" | "B" => Some(Variant::B),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCounts {
    pub views:   u64,
    pub accepts: u64,
}

impl VariantCounts {
    pub fn acceptance_rate(&self) -> f64 {
        if self.views == 0 {
            0.0
        } else {
            self.accepts as f64 / self.views as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantStats {
    pub a: VariantCounts,
    pub b: VariantCounts,
}

impl VariantStats {
    pub fn counts_mut(&mut self, variant: Variant) -> &mut VariantCounts {
        match variant {
            Variant::A => &mut self.a,
            Variant::B => &mut self.b,
        }
    }
}

/// An offer with a variant's overrides applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantOffer {
    pub offer:   Offer,
    pub variant: Variant,
}

// ── Pure resolution ───────────────────────────────────────────────

/// Seed string for a visitor on one offer.
pub fn visitor_seed(offer_id: OfferId, visitor: &VisitorIdentity) -> String {
    format!("{offer_id}|{}", visitor.seed_fragment())
}

/// Stable bucket in 0..100 for a seed string.
pub fn bucket_for_seed(seed: &str) -> u8 {
    let digest = Sha256::digest(seed.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % 100) as u8
}

pub fn split_variant(bucket: u8, split_percentage: u8) -> Variant {
    if bucket < split_percentage {
        Variant::A
    } else {
        Variant::B
    }
}

/// The variant with the strictly higher acceptance rate, once both variants
/// have at least `min_views` views (never fewer than 10). `None` means keep
/// splitting.
pub fn auto_winner(stats: &VariantStats, min_views: u32) -> Option<Variant> {
    let required = u64::from(min_views.max(MIN_VIEWS_FLOOR));
    if stats.a.views < required || stats.b.views < required {
        return None;
    }
    let rate_a = stats.a.acceptance_rate();
    let rate_b = stats.b.acceptance_rate();
    if (rate_a - rate_b).abs() < RATE_EPSILON {
        return None;
    }
    Some(if rate_a > rate_b { Variant::A } else { Variant::B })
}

/// Overlay variant B's configured overrides. A returns the offer unchanged,
/// as does B when A/B testing is off.
pub fn apply_variant(offer: &Offer, variant: Variant) -> VariantOffer {
    let ab: &AbTestSettings = &offer.settings.ab_test;
    if variant == Variant::A || !ab.enabled {
        return VariantOffer { offer: offer.clone(), variant: Variant::A };
    }

    let mut applied = offer.clone();
    let overrides = &ab.variant_b;
    if let Some(title) = overrides.title.as_ref().filter(|t| !t.is_empty()) {
        applied.title = title.clone();
    }
    if let Some(description) = overrides.description.as_ref().filter(|d| !d.is_empty()) {
        applied.description = description.clone();
    }
    if let Some(discount_type) = overrides.discount_type {
        applied.discount_type = discount_type;
    }
    if let Some(discount_value) = overrides.discount_value {
        applied.discount_value = discount_value;
    }
    VariantOffer { offer: applied, variant: Variant::B }
}

// ── Stateful resolver ─────────────────────────────────────────────

pub struct VariantResolver<'a> {
    store: &'a UpsellStore,
}

impl<'a> VariantResolver<'a> {
    pub fn new(store: &'a UpsellStore) -> Self {
        Self { store }
    }

    /// Pick a variant for this visitor without persisting it.
    ///
    /// A stats read failure skips auto-winner and falls back to the split.
    pub fn resolve(&self, offer: &Offer, visitor: &VisitorIdentity) -> Variant {
        let ab = &offer.settings.ab_test;
        if !ab.enabled || offer.id <= 0 {
            return Variant::A;
        }

        if ab.auto_winner {
            match self.store.variant_stats(offer.id) {
                Ok(stats) => {
                    if let Some(winner) = auto_winner(&stats, ab.min_views) {
                        log::debug!("offer {}: auto-winner is {}", offer.id, winner.as_str());
                        return winner;
                    }
                }
                Err(e) => log::warn!("offer {}: variant stats unavailable: {e}", offer.id),
            }
        }

        let bucket = bucket_for_seed(&visitor_seed(offer.id, visitor));
        split_variant(bucket, ab.split_percentage)
    }

    /// Resolve once per scope and reuse the stored answer afterwards.
    ///
    /// An empty `scope_key` (anonymous visitor with no session or address)
    /// resolves without persisting.
    pub fn assign(
        &self,
        offer: &Offer,
        visitor: &VisitorIdentity,
        scope_key: &str,
        now: DateTime<Utc>,
    ) -> UpsellResult<Variant> {
        if !offer.settings.ab_test.enabled || offer.id <= 0 {
            return Ok(Variant::A);
        }
        if scope_key.is_empty() {
            return Ok(self.resolve(offer, visitor));
        }
        if let Some(stored) = self.store.stored_variant(offer.id, scope_key)? {
            return Ok(stored);
        }
        let resolved = self.resolve(offer, visitor);
        self.store.assign_variant_once(offer.id, scope_key, resolved, now)
    }

    /// Previously stored variant for a scope, if any.
    pub fn stored(&self, offer_id: OfferId, scope_key: &str) -> UpsellResult<Option<Variant>> {
        if scope_key.is_empty() {
            return Ok(None);
        }
        self.store.stored_variant(offer_id, scope_key)
    }

    /// Count a view or accept against a variant. Other actions, unknown
    /// variants and non-positive offer ids are ignored.
    pub fn record_event(&self, offer_id: OfferId, variant: &str, action: ActionType) -> UpsellResult<()> {
        if offer_id <= 0 {
            return Ok(());
        }
        let Some(variant) = Variant::parse(variant) else {
            return Ok(());
        };
        match action {
            ActionType::View   => self.store.increment_variant_views(offer_id, variant),
            ActionType::Accept => self.store.increment_variant_accepts(offer_id, variant),
            ActionType::AcceptClick | ActionType::Skip => Ok(()),
        }
    }
}

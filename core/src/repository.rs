//! Offer store: cached CRUD over the `offer` table.
//!
//! Reads go through `OfferCache`; every write invalidates the written offer,
//! the per-type listings and the count before returning.

use crate::{
    cache::{CacheKey, CachedValue, OfferCache},
    clock::Clock,
    config::LegacySettings,
    error::{UpsellError, UpsellResult},
    offer::{Offer, OfferPayload, OfferStatus, OfferType},
    store::UpsellStore,
    types::{OfferId, ProductId},
};

pub struct OfferRepository<'a> {
    store: &'a UpsellStore,
    cache: &'a OfferCache,
    clock: &'a dyn Clock,
}

impl<'a> OfferRepository<'a> {
    pub fn new(store: &'a UpsellStore, cache: &'a OfferCache, clock: &'a dyn Clock) -> Self {
        Self { store, cache, clock }
    }

    /// Every offer of a type, priority ascending, newest first on ties.
    pub fn get_by_type(&self, offer_type: OfferType) -> UpsellResult<Vec<Offer>> {
        let key = CacheKey::ByType(offer_type);
        if let Some(CachedValue::Offers(offers)) = self.cache.get(&key) {
            return Ok(offers);
        }
        let offers = self.store.offers_by_type(offer_type)?;
        self.cache.put(key, CachedValue::Offers(offers.clone()));
        Ok(offers)
    }

    pub fn get_active_by_type(&self, offer_type: OfferType) -> UpsellResult<Vec<Offer>> {
        Ok(self
            .get_by_type(offer_type)?
            .into_iter()
            .filter(|o| o.status == OfferStatus::Active)
            .collect())
    }

    /// First active offer of the type accepted by `predicate`. Stops calling
    /// `predicate` at the first match.
    pub fn get_first_active<F>(&self, offer_type: OfferType, mut predicate: F) -> UpsellResult<Option<Offer>>
    where
        F: FnMut(&Offer) -> bool,
    {
        Ok(self
            .get_active_by_type(offer_type)?
            .into_iter()
            .find(|offer| predicate(offer)))
    }

    pub fn get(&self, offer_id: OfferId) -> UpsellResult<Option<Offer>> {
        if offer_id <= 0 {
            return Ok(None);
        }
        let key = CacheKey::Offer(offer_id);
        if let Some(CachedValue::Offer(offer)) = self.cache.get(&key) {
            return Ok(offer);
        }
        let offer = self.store.offer_by_id(offer_id)?;
        self.cache.put(key, CachedValue::Offer(offer.clone()));
        Ok(offer)
    }

    /// Like `get`, but a missing offer is an error.
    pub fn require(&self, offer_id: OfferId) -> UpsellResult<Offer> {
        self.get(offer_id)?.ok_or(UpsellError::NotFound { offer_id })
    }

    /// Clamp and persist a submission. With `offer_id` the row is written
    /// under that id (created if absent); without, a new id is assigned.
    pub fn save(&self, payload: OfferPayload, offer_id: Option<OfferId>) -> UpsellResult<OfferId> {
        let now = self.clock.now();
        let id = match offer_id.filter(|id| *id > 0) {
            Some(id) => {
                let offer = payload.into_offer(id);
                self.store.upsert_offer(&offer, now)?;
                log::info!("offer {id} updated ({} '{}')", offer.offer_type, offer.name);
                id
            }
            None => {
                let offer = payload.into_offer(0);
                let id = self.store.insert_offer(&offer, now)?;
                log::info!("offer {id} created ({} '{}')", offer.offer_type, offer.name);
                id
            }
        };
        self.cache.invalidate_offer(id);
        Ok(id)
    }

    /// Returns true if the offer existed. Variant stats are kept.
    pub fn delete(&self, offer_id: OfferId) -> UpsellResult<bool> {
        let removed = self.store.delete_offer(offer_id)?;
        self.cache.invalidate_offer(offer_id);
        if removed {
            log::info!("offer {offer_id} deleted");
        }
        Ok(removed)
    }

    pub fn count(&self) -> UpsellResult<i64> {
        if let Some(CachedValue::Count(count)) = self.cache.get(&CacheKey::Count) {
            return Ok(count);
        }
        let count = self.store.offer_count()?;
        self.cache.put(CacheKey::Count, CachedValue::Count(count));
        Ok(count)
    }

    pub fn offer_ids_for_product(&self, product_id: ProductId) -> UpsellResult<Vec<OfferId>> {
        let key = CacheKey::ProductOffers(product_id);
        if let Some(CachedValue::Ids(ids)) = self.cache.get(&key) {
            return Ok(ids);
        }
        let ids = self.store.offer_ids_for_product(product_id)?;
        self.cache.put(key, CachedValue::Ids(ids.clone()));
        Ok(ids)
    }

    /// Import legacy single-offer settings, once. Does nothing when any offer
    /// already exists. Returns the ids created.
    pub fn migrate_legacy_settings(&self, legacy: &LegacySettings) -> UpsellResult<Vec<OfferId>> {
        if self.store.offer_count()? > 0 {
            return Ok(Vec::new());
        }

        let mut created = Vec::new();
        for (offer_type, block) in legacy.blocks() {
            if block.fields.product_id.map(i64::abs).unwrap_or(0) == 0 {
                log::debug!("legacy {offer_type} block has no product, skipped");
                continue;
            }

            let mut payload = block.fields.clone();
            payload.name = Some(
                payload
                    .title
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| offer_type.default_offer_name()),
            );
            payload.offer_type = Some(offer_type.to_string());
            let status = if block.enabled.unwrap_or(false) {
                OfferStatus::Active
            } else {
                OfferStatus::Draft
            };
            payload.status = Some(status.to_string());
            payload.priority = Some(10);

            created.push(self.save(payload, None)?);
        }

        if !created.is_empty() {
            log::info!("migrated {} legacy offer(s)", created.len());
        }
        Ok(created)
    }
}

//! Read-through cache for offer lookups.
//!
//! Entries expire after a fixed TTL. Writes must call the matching
//! `invalidate_*` before returning so no reader sees a stale offer past the
//! write.

use crate::{
    offer::{Offer, OfferType, SlugEnum},
    types::{OfferId, ProductId},
};
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Offer(OfferId),
    ByType(OfferType),
    Count,
    ProductOffers(ProductId),
}

#[derive(Debug, Clone)]
pub enum CachedValue {
    Offer(Option<Offer>),
    Offers(Vec<Offer>),
    Count(i64),
    Ids(Vec<OfferId>),
}

struct CacheEntry {
    value:       CachedValue,
    inserted_at: Instant,
}

pub struct OfferCache {
    entries:     DashMap<CacheKey, CacheEntry>,
    ttl:         Duration,
    max_entries: usize,
}

impl OfferCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        log::debug!("offer cache hit: {key:?}");
        Some(entry.value.clone())
    }

    pub fn put(&self, key: CacheKey, value: CachedValue) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
        }
        self.entries.insert(key, CacheEntry { value, inserted_at: Instant::now() });
    }

    /// Drop everything a write to `offer_id` could have changed. Product
    /// listings are dropped wholesale since the previous product id is unknown.
    pub fn invalidate_offer(&self, offer_id: OfferId) {
        self.entries.remove(&CacheKey::Offer(offer_id));
        for offer_type in OfferType::ALL {
            self.entries.remove(&CacheKey::ByType(*offer_type));
        }
        self.entries.remove(&CacheKey::Count);
        self.entries.retain(|key, _| !matches!(key, CacheKey::ProductOffers(_)));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entries_are_misses() {
        let cache = OfferCache::new(Duration::from_millis(0), 10);
        cache.put(CacheKey::Count, CachedValue::Count(3));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&CacheKey::Count).is_none());
    }

    #[test]
    fn invalidation_drops_listings_and_count() {
        let cache = OfferCache::new(Duration::from_secs(300), 10);
        cache.put(CacheKey::Count, CachedValue::Count(1));
        cache.put(CacheKey::ByType(OfferType::Cart), CachedValue::Offers(Vec::new()));
        cache.put(CacheKey::Offer(1), CachedValue::Offer(None));
        cache.put(CacheKey::Offer(2), CachedValue::Offer(None));
        cache.put(CacheKey::ProductOffers(9), CachedValue::Ids(vec![1]));

        cache.invalidate_offer(1);

        assert!(cache.get(&CacheKey::Count).is_none());
        assert!(cache.get(&CacheKey::ByType(OfferType::Cart)).is_none());
        assert!(cache.get(&CacheKey::Offer(1)).is_none());
        assert!(cache.get(&CacheKey::ProductOffers(9)).is_none());
        assert!(cache.get(&CacheKey::Offer(2)).is_some());
    }

    #[test]
    fn capacity_is_bounded() {
        let cache = OfferCache::new(Duration::from_secs(300), 2);
        cache.put(CacheKey::Offer(1), CachedValue::Offer(None));
        cache.put(CacheKey::Offer(2), CachedValue::Offer(None));
        cache.put(CacheKey::Offer(3), CachedValue::Offer(None));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&CacheKey::Offer(3)).is_some());
    }
}

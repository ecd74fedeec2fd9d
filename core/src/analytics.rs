//! Analytics aggregation: event tracking plus summary and leaderboard queries.
//!
//! Tracking is best-effort. A failed write is logged and dropped; it never
//! reaches the storefront.

use crate::{
    config::EngineConfig,
    error::UpsellResult,
    event::{AnalyticsEvent, EventSink},
    offer::{round2, OfferType},
    store::UpsellStore,
    types::{OfferId, ProductId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Caller-facing filters. Dates are inclusive and compare against the
/// event's UTC calendar date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsFilters {
    pub offer_type: Option<OfferType>,
    pub offer_id:   Option<OfferId>,
    pub product_id: Option<ProductId>,
    pub start_date: Option<NaiveDate>,
    pub end_date:   Option<NaiveDate>,
}

/// Filters with the product lookup already resolved to offer ids.
/// `Some(vec![])` matches nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub offer_type: Option<OfferType>,
    pub offer_ids:  Option<Vec<OfferId>>,
    pub start_date: Option<NaiveDate>,
    pub end_date:   Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub views:           u64,
    pub conversions:     u64,
    /// Percent, two decimals. 0 when there are no views.
    pub conversion_rate: f64,
    pub revenue:         f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferPerformance {
    pub offer_type:  OfferType,
    pub offer_id:    OfferId,
    pub views:       u64,
    pub conversions: u64,
    pub revenue:     f64,
}

pub fn conversion_rate(views: u64, conversions: u64) -> f64 {
    if views == 0 {
        return 0.0;
    }
    round2(conversions as f64 / views as f64 * 100.0)
}

pub struct Analytics<'a> {
    store:  &'a UpsellStore,
    config: &'a EngineConfig,
}

impl<'a> Analytics<'a> {
    pub fn new(store: &'a UpsellStore, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Append an event. Returns whether it was written.
    pub fn track(&self, event: &AnalyticsEvent) -> bool {
        if !self.config.analytics_enabled() {
            return false;
        }
        match self.store.record_event(event) {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "dropping {} event for offer {}: {e}",
                    event.action.as_str(),
                    event.offer_id
                );
                false
            }
        }
    }

    pub fn summary(&self, filters: &AnalyticsFilters) -> UpsellResult<AnalyticsSummary> {
        let filter = self.resolve(filters)?;
        if matches_nothing(&filter) {
            return Ok(AnalyticsSummary::default());
        }
        let (views, conversions, revenue) = self.store.event_totals(&filter)?;
        Ok(AnalyticsSummary {
            views,
            conversions,
            conversion_rate: conversion_rate(views, conversions),
            revenue: round2(revenue),
        })
    }

    /// Best offers by revenue, then conversions. `limit` is at least 1.
    pub fn top_offers(
        &self,
        limit: usize,
        filters: &AnalyticsFilters,
    ) -> UpsellResult<Vec<OfferPerformance>> {
        let filter = self.resolve(filters)?;
        if matches_nothing(&filter) {
            return Ok(Vec::new());
        }
        let mut rows = self.store.offer_performance(&filter, limit.max(1))?;
        for row in &mut rows {
            row.revenue = round2(row.revenue);
        }
        Ok(rows)
    }

    /// Ids of zero or below mean "no filter".
    fn resolve(&self, filters: &AnalyticsFilters) -> UpsellResult<EventFilter> {
        let mut offer_ids = filters.offer_id.filter(|id| *id > 0).map(|id| vec![id]);

        if let Some(product_id) = filters.product_id.filter(|id| *id > 0) {
            let for_product = self.store.offer_ids_for_product(product_id)?;
            offer_ids = Some(match offer_ids {
                Some(ids) => ids.into_iter().filter(|id| for_product.contains(id)).collect(),
                None => for_product,
            });
        }

        Ok(EventFilter {
            offer_type: filters.offer_type,
            offer_ids,
            start_date: filters.start_date,
            end_date: filters.end_date,
        })
    }
}

fn matches_nothing(filter: &EventFilter) -> bool {
    filter.offer_ids.as_ref().is_some_and(Vec::is_empty)
}

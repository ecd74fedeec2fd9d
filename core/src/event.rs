//! Analytics facts and the sink that receives them.
//!
//! RULE: Events are append-only. Nothing updates or deletes them except a
//! full uninstall.

use crate::{
    error::UpsellResult,
    offer::OfferType,
    types::{OfferId, OrderId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    View,
    Accept,
    AcceptClick,
    Skip,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View        => "view",
            Self::Accept      => "accept",
            Self::AcceptClick => "accept_click",
            Self::Skip        => "skip",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "view"         => Some(Self::View),
            "accept"       => Some(Self::Accept),
            "accept_click" => Some(Self::AcceptClick),
            "skip"         => Some(Self::Skip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub offer_type: OfferType,
    pub offer_id:   OfferId,
    pub action:     ActionType,
    pub order_id:   Option<OrderId>,
    pub user_id:    Option<UserId>,
    pub revenue:    f64,
    /// Free-form tag naming where the event came from ("checkout", "thankyou", ...).
    pub context:    String,
    pub created_at: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn new(
        offer_type: OfferType,
        offer_id: OfferId,
        action: ActionType,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            offer_type,
            offer_id,
            action,
            order_id: None,
            user_id: None,
            revenue: 0.0,
            context: String::new(),
            created_at,
        }
    }

    pub fn with_order(mut self, order_id: Option<OrderId>) -> Self {
        self.order_id = order_id.filter(|id| *id > 0);
        self
    }

    pub fn with_user(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id.filter(|id| *id > 0);
        self
    }

    pub fn with_revenue(mut self, revenue: f64) -> Self {
        self.revenue = revenue.max(0.0);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// Receiver for analytics events. The store is one; hosts may add their own
/// to mirror events onto an external bus.
pub trait EventSink {
    fn record_event(&self, event: &AnalyticsEvent) -> UpsellResult<()>;
}

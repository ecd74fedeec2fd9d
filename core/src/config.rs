use crate::offer::{OfferPayload, OfferType};
use serde::{Deserialize, Serialize};

/// Engine-wide settings. Injected at construction; nothing in the engine
/// reads ambient global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub enable_order_bumps:          bool,
    pub enable_post_purchase_upsell: bool,
    pub enable_cart_bumps:           bool,
    pub enable_analytics:            bool,
    pub disable_reports:             bool,

    /// Staleness window for cached offer reads.
    pub cache_ttl_secs:            u64,
    /// Upper bound on cached offer lookups before the oldest entries are dropped.
    pub cache_max_entries:         usize,
    /// How many recent orders the "purchased from category" rule scans.
    pub category_history_limit:    usize,
    /// Order statuses counted as purchases by the category rule.
    pub category_history_statuses: Vec<String>,
    /// Evergreen countdown length when an offer leaves it at 0.
    pub evergreen_default_minutes: u32,

    /// Single-offer settings from before the offer table existed.
    pub legacy: LegacySettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_order_bumps:          true,
            enable_post_purchase_upsell: true,
            enable_cart_bumps:           false,
            enable_analytics:            true,
            disable_reports:             false,
            cache_ttl_secs:              300,
            cache_max_entries:           1_000,
            category_history_limit:      50,
            category_history_statuses:   vec![
                "processing".into(),
                "completed".into(),
                "on-hold".into(),
            ],
            evergreen_default_minutes:   15,
            legacy:                      LegacySettings::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing keys take their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.category_history_limit == 0 {
            anyhow::bail!("category_history_limit must be at least 1");
        }
        if self.cache_max_entries == 0 {
            anyhow::bail!("cache_max_entries must be at least 1");
        }
        Ok(())
    }

    /// Fixture used by tests: every offer type switched on, analytics on.
    pub fn default_test() -> Self {
        Self {
            enable_cart_bumps: true,
            ..Self::default()
        }
    }

    /// Global toggle gating eligibility for an offer type.
    pub fn type_enabled(&self, offer_type: OfferType) -> bool {
        match offer_type {
            OfferType::Checkout     => self.enable_order_bumps,
            OfferType::Cart         => self.enable_cart_bumps,
            OfferType::PostPurchase => self.enable_post_purchase_upsell,
        }
    }

    /// Analytics writes happen only with analytics on and reports not disabled.
    pub fn analytics_enabled(&self) -> bool {
        self.enable_analytics && !self.disable_reports
    }
}

/// One legacy block per offer type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacySettings {
    pub checkout_bump:        Option<LegacyOfferBlock>,
    pub cart_bump:            Option<LegacyOfferBlock>,
    pub post_purchase_upsell: Option<LegacyOfferBlock>,
}

impl LegacySettings {
    /// Present blocks paired with the offer type they migrate to.
    pub fn blocks(&self) -> Vec<(OfferType, &LegacyOfferBlock)> {
        [
            (OfferType::Checkout, self.checkout_bump.as_ref()),
            (OfferType::Cart, self.cart_bump.as_ref()),
            (OfferType::PostPurchase, self.post_purchase_upsell.as_ref()),
        ]
        .into_iter()
        .filter_map(|(ty, block)| block.map(|b| (ty, b)))
        .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyOfferBlock {
    #[serde(default, deserialize_with = "crate::offer::flex::flag")]
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub fields:  OfferPayload,
}

//! Offer data model.
//!
//! An `Offer` is the typed form of one row of the `offer` table plus its three
//! JSON sub-documents (rules, schedule, settings). Admin submissions arrive as
//! a loosely typed `OfferPayload`; `OfferPayload::into_offer` is the only place
//! where raw input is clamped into the typed model.
//!
//! RULE: invalid enumerated input never fails. It falls back to the documented
//! default for that field.

use crate::types::{CategoryId, OfferId, ProductId};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

// ── Enumerated fields ─────────────────────────────────────────────

/// Shared parsing for the string-backed enums stored in offer rows.
pub trait SlugEnum: Sized + Copy + Default + 'static {
    const ALL: &'static [Self];

    fn as_str(&self) -> &'static str;

    /// Parse a raw slug, falling back to `Self::default()` on anything unknown.
    fn parse_or_default(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|| {
            if !raw.is_empty() {
                log::debug!("unknown value '{raw}', using '{}'", Self::default().as_str());
            }
            Self::default()
        })
    }

    fn parse(raw: &str) -> Option<Self> {
        let key = sanitize_key(raw);
        Self::ALL.iter().copied().find(|v| v.as_str() == key)
    }
}

macro_rules! slug_enum_conversions {
    ($ty:ty) => {
        impl From<String> for $ty {
            fn from(raw: String) -> Self {
                <$ty as SlugEnum>::parse_or_default(&raw)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.as_str().to_string()
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OfferType {
    #[default]
    Checkout,
    Cart,
    PostPurchase,
}

impl SlugEnum for OfferType {
    const ALL: &'static [Self] = &[Self::Checkout, Self::Cart, Self::PostPurchase];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Checkout     => "checkout",
            Self::Cart         => "cart",
            Self::PostPurchase => "post_purchase",
        }
    }
}

impl OfferType {
    /// Human label used when synthesizing offer names ("Post purchase offer").
    pub fn default_offer_name(&self) -> String {
        let spaced = self.as_str().replace('_', " ");
        let mut chars = spaced.chars();
        match chars.next() {
            Some(first) => format!("{}{} offer", first.to_uppercase(), chars.as_str()),
            None => "Offer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OfferStatus {
    Active,
    #[default]
    Draft,
}

impl SlugEnum for OfferStatus {
    const ALL: &'static [Self] = &[Self::Active, Self::Draft];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Draft  => "draft",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DisplayType {
    #[default]
    Checkbox,
    Highlight,
    Inline,
    Popup,
    Grid,
}

impl SlugEnum for DisplayType {
    const ALL: &'static [Self] = &[
        Self::Checkbox,
        Self::Highlight,
        Self::Inline,
        Self::Popup,
        Self::Grid,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Checkbox  => "checkbox",
            Self::Highlight => "highlight",
            Self::Inline    => "inline",
            Self::Popup     => "popup",
            Self::Grid      => "grid",
        }
    }
}

/// Where a checkout offer renders. Ignored for other offer types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Position {
    #[default]
    BeforePayment,
    AfterOrderSummary,
}

impl SlugEnum for Position {
    const ALL: &'static [Self] = &[Self::BeforePayment, Self::AfterOrderSummary];

    fn as_str(&self) -> &'static str {
        match self {
            Self::BeforePayment     => "before_payment",
            Self::AfterOrderSummary => "after_order_summary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DiscountType {
    #[default]
    Fixed,
    Percent,
}

impl SlugEnum for DiscountType {
    const ALL: &'static [Self] = &[Self::Fixed, Self::Percent];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed   => "fixed",
            Self::Percent => "percent",
        }
    }
}

impl DiscountType {
    /// Price after applying `value` under this discount type, floored at zero
    /// and rounded to cents.
    pub fn apply(&self, base_price: f64, value: f64) -> f64 {
        let discounted = match self {
            Self::Fixed   => base_price - value,
            Self::Percent => base_price - base_price * (value / 100.0),
        };
        round2(discounted).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceTarget {
    #[default]
    All,
    Mobile,
    Desktop,
}

impl SlugEnum for DeviceTarget {
    const ALL: &'static [Self] = &[Self::All, Self::Mobile, Self::Desktop];

    fn as_str(&self) -> &'static str {
        match self {
            Self::All     => "all",
            Self::Mobile  => "mobile",
            Self::Desktop => "desktop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CountdownMode {
    #[default]
    None,
    Fixed,
    Evergreen,
}

impl SlugEnum for CountdownMode {
    const ALL: &'static [Self] = &[Self::None, Self::Fixed, Self::Evergreen];

    fn as_str(&self) -> &'static str {
        match self {
            Self::None      => "none",
            Self::Fixed     => "fixed",
            Self::Evergreen => "evergreen",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BundleMode {
    #[default]
    None,
    Fbt,
    SameCategory,
    TagMatch,
    Manual,
}

impl SlugEnum for BundleMode {
    const ALL: &'static [Self] = &[
        Self::None,
        Self::Fbt,
        Self::SameCategory,
        Self::TagMatch,
        Self::Manual,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::None         => "none",
            Self::Fbt          => "fbt",
            Self::SameCategory => "same_category",
            Self::TagMatch     => "tag_match",
            Self::Manual       => "manual",
        }
    }
}

slug_enum_conversions!(OfferType);
slug_enum_conversions!(OfferStatus);
slug_enum_conversions!(DisplayType);
slug_enum_conversions!(Position);
slug_enum_conversions!(DiscountType);
slug_enum_conversions!(DeviceTarget);
slug_enum_conversions!(CountdownMode);
slug_enum_conversions!(BundleMode);

// ── Sub-documents ─────────────────────────────────────────────────

/// Targeting rules (`rules_json`). Every `None`/empty field means "no constraint".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferRules {
    pub trigger_product_ids:      Vec<ProductId>,
    pub trigger_category_ids:     Vec<CategoryId>,
    pub min_cart_total:           Option<f64>,
    pub max_cart_total:           Option<f64>,
    pub quantity_threshold:       Option<u32>,
    pub user_roles:               Vec<String>,
    pub customer_email:           Option<String>,
    pub lifetime_spend_threshold: Option<f64>,
    pub purchase_frequency_min:   Option<u32>,
    pub country_codes:            Vec<String>,
    pub device_target:            DeviceTarget,
    pub first_time_only:          bool,
    pub returning_only:           bool,
    pub purchased_product_ids:    Vec<ProductId>,
    pub purchased_category_ids:   Vec<CategoryId>,
}

impl OfferRules {
    /// True if any cart-total or quantity bound is configured.
    pub fn has_cart_constraints(&self) -> bool {
        self.min_cart_total.is_some()
            || self.max_cart_total.is_some()
            || self.quantity_threshold.is_some()
    }
}

/// Schedule window (`schedule_json`). Date and time bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferSchedule {
    pub start_date: Option<NaiveDate>,
    pub end_date:   Option<NaiveDate>,
    #[serde(with = "weekday_slugs")]
    pub weekdays:   Vec<Weekday>,
    pub start_time: Option<NaiveTime>,
    pub end_time:   Option<NaiveTime>,
}

/// Variant-B presentation overrides. `None` keeps variant A's value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantOverrides {
    pub title:          Option<String>,
    pub description:    Option<String>,
    pub discount_type:  Option<DiscountType>,
    pub discount_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbTestSettings {
    pub enabled:          bool,
    /// Share of visitors (percent, 1..=99) routed to variant A.
    pub split_percentage: u8,
    pub auto_winner:      bool,
    /// Views each variant needs before auto-winner may decide. Never below 10.
    pub min_views:        u32,
    pub variant_b:        VariantOverrides,
}

impl Default for AbTestSettings {
    fn default() -> Self {
        Self {
            enabled:          false,
            split_percentage: 50,
            auto_winner:      false,
            min_views:        100,
            variant_b:        VariantOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CountdownSettings {
    pub mode:              CountdownMode,
    pub fixed_end:         Option<DateTime<Utc>>,
    /// Per-visitor duration for evergreen countdowns. 0 means "use the default".
    pub evergreen_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CouponSettings {
    pub code:        Option<String>,
    pub auto_apply:  bool,
    /// 0 means unlimited.
    pub usage_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleSettings {
    pub mode:        BundleMode,
    pub product_ids: Vec<ProductId>,
    /// Maximum bundle items shown, 1..=8.
    pub limit:       u8,
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self { mode: BundleMode::None, product_ids: Vec::new(), limit: 3 }
    }
}

/// Behaviour settings (`settings_json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferSettings {
    pub skip_if_in_cart:         bool,
    pub skip_if_purchased:       bool,
    pub dismiss_limit:           Option<u32>,
    pub thank_you_message:       String,
    pub skip_label:              String,
    pub show_image:              bool,
    pub auto_charge:             bool,
    pub abandoned_enabled:       bool,
    pub exit_intent_enabled:     bool,
    pub abandoned_delay_seconds: u32,
    pub coupon:                  CouponSettings,
    pub countdown:               CountdownSettings,
    pub ab_test:                 AbTestSettings,
    pub bundle:                  BundleSettings,
}

impl Default for OfferSettings {
    fn default() -> Self {
        Self {
            skip_if_in_cart:         false,
            skip_if_purchased:       false,
            dismiss_limit:           Some(3),
            thank_you_message:       String::new(),
            skip_label:              String::new(),
            show_image:              false,
            auto_charge:             false,
            abandoned_enabled:       false,
            exit_intent_enabled:     false,
            abandoned_delay_seconds: 0,
            coupon:                  CouponSettings::default(),
            countdown:               CountdownSettings::default(),
            ab_test:                 AbTestSettings::default(),
            bundle:                  BundleSettings::default(),
        }
    }
}

impl OfferSettings {
    /// Re-assert the numeric invariants on values read back from storage.
    pub fn normalized(mut self) -> Self {
        self.ab_test.split_percentage = self.ab_test.split_percentage.clamp(1, 99);
        self.ab_test.min_views = self.ab_test.min_views.max(10);
        self.bundle.limit = self.bundle.limit.clamp(1, 8);
        self.dismiss_limit = self.dismiss_limit.filter(|l| *l > 0);
        self
    }
}

// ── Offer ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id:             OfferId,
    pub name:           String,
    pub offer_type:     OfferType,
    pub status:         OfferStatus,
    /// Lower sorts first.
    pub priority:       u32,
    pub product_id:     ProductId,
    pub discount_type:  DiscountType,
    pub discount_value: f64,
    pub title:          String,
    pub description:    String,
    pub display_type:   DisplayType,
    pub position:       Position,
    pub rules:          OfferRules,
    pub schedule:       OfferSchedule,
    pub settings:       OfferSettings,
}

impl Offer {
    pub fn is_active(&self) -> bool {
        self.status == OfferStatus::Active
    }

    /// Price of the offered product after this offer's discount.
    pub fn discounted_price(&self, base_price: f64) -> f64 {
        self.discount_type.apply(base_price, self.discount_value)
    }
}

// ── Admin payload ─────────────────────────────────────────────────

/// Raw offer submission. Every field is optional and loosely typed; numbers
/// and flags accept either JSON numbers/bools or their string forms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferPayload {
    pub name:           Option<String>,
    pub offer_type:     Option<String>,
    pub status:         Option<String>,
    #[serde(deserialize_with = "flex::int")]
    pub priority:       Option<i64>,
    #[serde(deserialize_with = "flex::int")]
    pub product_id:     Option<i64>,
    pub discount_type:  Option<String>,
    #[serde(deserialize_with = "flex::decimal")]
    pub discount_value: Option<f64>,
    pub title:          Option<String>,
    pub description:    Option<String>,
    pub display_type:   Option<String>,
    pub position:       Option<String>,

    pub trigger_product_ids:  Option<String>,
    pub trigger_category_ids: Option<String>,
    #[serde(deserialize_with = "flex::decimal")]
    pub min_cart_total:       Option<f64>,
    #[serde(deserialize_with = "flex::decimal")]
    pub max_cart_total:       Option<f64>,
    #[serde(deserialize_with = "flex::int")]
    pub quantity_threshold:   Option<i64>,
    pub user_roles:           Option<String>,
    pub customer_email:       Option<String>,
    #[serde(deserialize_with = "flex::decimal")]
    pub lifetime_spend_threshold: Option<f64>,
    #[serde(deserialize_with = "flex::int")]
    pub purchase_frequency_min: Option<i64>,
    pub country_codes:        Option<String>,
    pub device_target:        Option<String>,
    #[serde(deserialize_with = "flex::flag")]
    pub first_time_only:      Option<bool>,
    #[serde(deserialize_with = "flex::flag")]
    pub returning_only:       Option<bool>,
    pub purchased_product_ids:  Option<String>,
    pub purchased_category_ids: Option<String>,

    pub schedule_start: Option<String>,
    pub schedule_end:   Option<String>,
    pub weekdays:       Option<String>,
    pub start_time:     Option<String>,
    pub end_time:       Option<String>,

    #[serde(deserialize_with = "flex::flag")]
    pub skip_if_in_cart:     Option<bool>,
    #[serde(deserialize_with = "flex::flag")]
    pub skip_if_purchased:   Option<bool>,
    #[serde(deserialize_with = "flex::int")]
    pub dismiss_limit:       Option<i64>,
    pub thank_you_message:   Option<String>,
    pub skip_label:          Option<String>,
    #[serde(deserialize_with = "flex::flag")]
    pub show_image:          Option<bool>,
    #[serde(deserialize_with = "flex::flag")]
    pub auto_charge:         Option<bool>,
    #[serde(deserialize_with = "flex::flag")]
    pub abandoned_enabled:   Option<bool>,
    #[serde(deserialize_with = "flex::flag")]
    pub exit_intent_enabled: Option<bool>,
    #[serde(deserialize_with = "flex::int")]
    pub abandoned_delay_seconds: Option<i64>,
    pub coupon_code:         Option<String>,
    #[serde(deserialize_with = "flex::flag")]
    pub coupon_auto_apply:   Option<bool>,
    #[serde(deserialize_with = "flex::int")]
    pub coupon_usage_limit:  Option<i64>,
    pub countdown_mode:      Option<String>,
    pub countdown_end:       Option<String>,
    #[serde(deserialize_with = "flex::int")]
    pub countdown_minutes:   Option<i64>,
    #[serde(deserialize_with = "flex::flag")]
    pub ab_testing_enabled:  Option<bool>,
    #[serde(deserialize_with = "flex::int")]
    pub ab_split_percentage: Option<i64>,
    #[serde(deserialize_with = "flex::flag")]
    pub ab_auto_winner:      Option<bool>,
    #[serde(deserialize_with = "flex::int")]
    pub ab_min_views:        Option<i64>,
    pub ab_variant_b_title:         Option<String>,
    pub ab_variant_b_description:   Option<String>,
    pub ab_variant_b_discount_type: Option<String>,
    #[serde(deserialize_with = "flex::decimal")]
    pub ab_variant_b_discount_value: Option<f64>,
    pub bundle_mode:         Option<String>,
    pub bundle_product_ids:  Option<String>,
    #[serde(deserialize_with = "flex::int")]
    pub bundle_limit:        Option<i64>,
}

impl OfferPayload {
    /// Clamp the submission into a typed offer carrying `id`.
    ///
    /// Missing `status` means active; an unrecognised one means draft.
    pub fn into_offer(self, id: OfferId) -> Offer {
        let status = match self.status.as_deref() {
            None => OfferStatus::Active,
            Some(raw) => OfferStatus::parse_or_default(raw),
        };

        let rules = OfferRules {
            trigger_product_ids:      sanitize_id_csv(self.trigger_product_ids.as_deref()),
            trigger_category_ids:     sanitize_id_csv(self.trigger_category_ids.as_deref()),
            min_cart_total:           positive_decimal(self.min_cart_total),
            max_cart_total:           positive_decimal(self.max_cart_total),
            quantity_threshold:       positive_count(self.quantity_threshold),
            user_roles:               sanitize_slug_csv(self.user_roles.as_deref()),
            customer_email:           sanitize_email(self.customer_email.as_deref()),
            lifetime_spend_threshold: positive_decimal(self.lifetime_spend_threshold),
            purchase_frequency_min:   positive_count(self.purchase_frequency_min),
            country_codes:            sanitize_slug_csv(self.country_codes.as_deref())
                .into_iter()
                .map(|c| c.to_uppercase())
                .collect(),
            device_target:            DeviceTarget::parse_or_default(
                self.device_target.as_deref().unwrap_or_default(),
            ),
            first_time_only:          self.first_time_only.unwrap_or(false),
            returning_only:           self.returning_only.unwrap_or(false),
            purchased_product_ids:    sanitize_id_csv(self.purchased_product_ids.as_deref()),
            purchased_category_ids:   sanitize_id_csv(self.purchased_category_ids.as_deref()),
        };

        let schedule = OfferSchedule {
            start_date: self.schedule_start.as_deref().and_then(parse_date),
            end_date:   self.schedule_end.as_deref().and_then(parse_date),
            weekdays:   parse_weekday_csv(self.weekdays.as_deref()),
            start_time: self.start_time.as_deref().and_then(parse_time),
            end_time:   self.end_time.as_deref().and_then(parse_time),
        };

        let variant_b = VariantOverrides {
            title:          non_empty(self.ab_variant_b_title),
            description:    non_empty(self.ab_variant_b_description),
            discount_type:  self
                .ab_variant_b_discount_type
                .as_deref()
                .and_then(DiscountType::parse),
            discount_value: self.ab_variant_b_discount_value.map(|v| round2(v.max(0.0))),
        };

        let settings = OfferSettings {
            skip_if_in_cart:         self.skip_if_in_cart.unwrap_or(false),
            skip_if_purchased:       self.skip_if_purchased.unwrap_or(false),
            dismiss_limit:           match self.dismiss_limit {
                None => Some(3),
                Some(raw) => positive_count(Some(raw)),
            },
            thank_you_message:       self.thank_you_message.map(|s| s.trim().to_string()).unwrap_or_default(),
            skip_label:              sanitize_text(self.skip_label),
            show_image:              self.show_image.unwrap_or(false),
            auto_charge:             self.auto_charge.unwrap_or(false),
            abandoned_enabled:       self.abandoned_enabled.unwrap_or(false),
            exit_intent_enabled:     self.exit_intent_enabled.unwrap_or(false),
            abandoned_delay_seconds: absint(self.abandoned_delay_seconds) as u32,
            coupon: CouponSettings {
                code:        non_empty(self.coupon_code),
                auto_apply:  self.coupon_auto_apply.unwrap_or(false),
                usage_limit: absint(self.coupon_usage_limit) as u32,
            },
            countdown: CountdownSettings {
                mode:              CountdownMode::parse_or_default(
                    self.countdown_mode.as_deref().unwrap_or_default(),
                ),
                fixed_end:         self.countdown_end.as_deref().and_then(parse_timestamp),
                evergreen_minutes: absint(self.countdown_minutes) as u32,
            },
            ab_test: AbTestSettings {
                enabled:          self.ab_testing_enabled.unwrap_or(false),
                split_percentage: absint(self.ab_split_percentage.or(Some(50))).clamp(1, 99) as u8,
                auto_winner:      self.ab_auto_winner.unwrap_or(false),
                min_views:        absint(self.ab_min_views.or(Some(100))).max(10) as u32,
                variant_b,
            },
            bundle: BundleSettings {
                mode:        BundleMode::parse_or_default(
                    self.bundle_mode.as_deref().unwrap_or_default(),
                ),
                product_ids: sanitize_id_csv(self.bundle_product_ids.as_deref()),
                limit:       absint(self.bundle_limit.or(Some(3))).clamp(1, 8) as u8,
            },
        };

        Offer {
            id,
            name:           sanitize_text(self.name),
            offer_type:     OfferType::parse_or_default(self.offer_type.as_deref().unwrap_or_default()),
            status,
            priority:       absint(self.priority.or(Some(10))).min(u32::MAX as u64) as u32,
            product_id:     absint(self.product_id) as ProductId,
            discount_type:  DiscountType::parse_or_default(
                self.discount_type.as_deref().unwrap_or_default(),
            ),
            discount_value: round2(self.discount_value.unwrap_or(0.0).max(0.0)),
            title:          sanitize_text(self.title),
            description:    self.description.map(|s| s.trim().to_string()).unwrap_or_default(),
            display_type:   DisplayType::parse_or_default(
                self.display_type.as_deref().unwrap_or_default(),
            ),
            position:       Position::parse_or_default(self.position.as_deref().unwrap_or_default()),
            rules,
            schedule,
            settings,
        }
    }
}

impl From<&Offer> for OfferPayload {
    fn from(offer: &Offer) -> Self {
        let rules = &offer.rules;
        let schedule = &offer.schedule;
        let settings = &offer.settings;
        let ab = &settings.ab_test;

        Self {
            name:           Some(offer.name.clone()),
            offer_type:     Some(offer.offer_type.to_string()),
            status:         Some(offer.status.to_string()),
            priority:       Some(offer.priority as i64),
            product_id:     Some(offer.product_id),
            discount_type:  Some(offer.discount_type.to_string()),
            discount_value: Some(offer.discount_value),
            title:          Some(offer.title.clone()),
            description:    Some(offer.description.clone()),
            display_type:   Some(offer.display_type.to_string()),
            position:       Some(offer.position.to_string()),

            trigger_product_ids:      Some(join_ids(&rules.trigger_product_ids)),
            trigger_category_ids:     Some(join_ids(&rules.trigger_category_ids)),
            min_cart_total:           rules.min_cart_total,
            max_cart_total:           rules.max_cart_total,
            quantity_threshold:       rules.quantity_threshold.map(i64::from),
            user_roles:               Some(rules.user_roles.join(",")),
            customer_email:           rules.customer_email.clone(),
            lifetime_spend_threshold: rules.lifetime_spend_threshold,
            purchase_frequency_min:   rules.purchase_frequency_min.map(i64::from),
            country_codes:            Some(rules.country_codes.join(",")),
            device_target:            Some(rules.device_target.to_string()),
            first_time_only:          Some(rules.first_time_only),
            returning_only:           Some(rules.returning_only),
            purchased_product_ids:    Some(join_ids(&rules.purchased_product_ids)),
            purchased_category_ids:   Some(join_ids(&rules.purchased_category_ids)),

            schedule_start: schedule.start_date.map(|d| d.format("%Y-%m-%d").to_string()),
            schedule_end:   schedule.end_date.map(|d| d.format("%Y-%m-%d").to_string()),
            weekdays:       Some(
                schedule
                    .weekdays
                    .iter()
                    .map(|d| weekday_slug(*d))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            start_time:     schedule.start_time.map(|t| t.format("%H:%M").to_string()),
            end_time:       schedule.end_time.map(|t| t.format("%H:%M").to_string()),

            skip_if_in_cart:     Some(settings.skip_if_in_cart),
            skip_if_purchased:   Some(settings.skip_if_purchased),
            dismiss_limit:       Some(settings.dismiss_limit.map(i64::from).unwrap_or(0)),
            thank_you_message:   Some(settings.thank_you_message.clone()),
            skip_label:          Some(settings.skip_label.clone()),
            show_image:          Some(settings.show_image),
            auto_charge:         Some(settings.auto_charge),
            abandoned_enabled:   Some(settings.abandoned_enabled),
            exit_intent_enabled: Some(settings.exit_intent_enabled),
            abandoned_delay_seconds: Some(i64::from(settings.abandoned_delay_seconds)),
            coupon_code:         settings.coupon.code.clone(),
            coupon_auto_apply:   Some(settings.coupon.auto_apply),
            coupon_usage_limit:  Some(i64::from(settings.coupon.usage_limit)),
            countdown_mode:      Some(settings.countdown.mode.to_string()),
            countdown_end:       settings.countdown.fixed_end.map(|t| t.to_rfc3339()),
            countdown_minutes:   Some(i64::from(settings.countdown.evergreen_minutes)),
            ab_testing_enabled:  Some(ab.enabled),
            ab_split_percentage: Some(i64::from(ab.split_percentage)),
            ab_auto_winner:      Some(ab.auto_winner),
            ab_min_views:        Some(i64::from(ab.min_views)),
            ab_variant_b_title:         ab.variant_b.title.clone(),
            ab_variant_b_description:   ab.variant_b.description.clone(),
            ab_variant_b_discount_type: ab.variant_b.discount_type.map(|d| d.to_string()),
            ab_variant_b_discount_value: ab.variant_b.discount_value,
            bundle_mode:         Some(settings.bundle.mode.to_string()),
            bundle_product_ids:  Some(join_ids(&settings.bundle.product_ids)),
            bundle_limit:        Some(i64::from(settings.bundle.limit)),
        }
    }
}

// ── Sanitizers ────────────────────────────────────────────────────

/// Lowercase and keep only `[a-z0-9_-]`.
pub fn sanitize_key(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn absint(raw: Option<i64>) -> u64 {
    raw.map(i64::unsigned_abs).unwrap_or(0)
}

fn positive_count(raw: Option<i64>) -> Option<u32> {
    let value = absint(raw);
    (value > 0).then(|| value.min(u32::MAX as u64) as u32)
}

fn positive_decimal(raw: Option<f64>) -> Option<f64> {
    raw.map(|v| round2(v.max(0.0))).filter(|v| *v > 0.0)
}

fn sanitize_text(raw: Option<String>) -> String {
    raw.map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn sanitize_email(raw: Option<&str>) -> Option<String> {
    let email = raw?.trim();
    let valid = email.len() >= 3
        && !email.chars().any(char::is_whitespace)
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    valid.then(|| email.to_string())
}

/// Parse a comma-separated id list, keeping positive ids in first-seen order.
pub fn sanitize_id_csv(raw: Option<&str>) -> Vec<i64> {
    let mut ids: Vec<i64> = Vec::new();
    for part in raw.unwrap_or_default().split(',') {
        let id = part.trim().parse::<i64>().map(i64::abs).unwrap_or(0);
        if id > 0 && !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn sanitize_slug_csv(raw: Option<&str>) -> Vec<String> {
    let mut slugs: Vec<String> = Vec::new();
    for part in raw.unwrap_or_default().split(',') {
        let slug = sanitize_key(part.trim());
        if !slug.is_empty() && !slugs.contains(&slug) {
            slugs.push(slug);
        }
    }
    slugs
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",")
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM[:SS]`, `YYYY-MM-DDTHH:MM` or a bare
/// date (midnight). Naive forms are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    parse_date(raw)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_weekday_csv(raw: Option<&str>) -> Vec<Weekday> {
    let mut days = Vec::new();
    for part in raw.unwrap_or_default().split(',') {
        if let Ok(day) = part.trim().parse::<Weekday>() {
            if !days.contains(&day) {
                days.push(day);
            }
        }
    }
    days
}

/// Three-letter lowercase weekday abbreviation ("mon".."sun").
pub fn weekday_slug(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

mod weekday_slugs {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(days: &[Weekday], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(days.iter().map(|d| super::weekday_slug(*d)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Weekday>, D::Error> {
        let raw: Vec<String> = Vec::deserialize(d)?;
        Ok(raw.iter().filter_map(|s| s.parse::<Weekday>().ok()).collect())
    }
}

/// Lenient deserializers for admin form values.
pub(crate) mod flex {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(b),
            Some(Value::Number(n)) => Some(n.as_f64().is_some_and(|v| v != 0.0)),
            Some(Value::String(s)) => {
                let s = s.trim().to_ascii_lowercase();
                Some(!(s.is_empty() || s == "0" || s == "false" || s == "no" || s == "off"))
            }
            Some(_) => Some(true),
        })
    }

    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
            }
            Some(Value::Bool(b)) => Some(i64::from(b)),
            _ => None,
        })
    }

    pub fn decimal<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
    }
}

use super::{to_sql_timestamp, UpsellStore};
use crate::{
    error::UpsellResult,
    offer::{
        DiscountType, DisplayType, Offer, OfferStatus, OfferType, Position, SlugEnum,
    },
    types::{OfferId, ProductId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::de::DeserializeOwned;

const OFFER_COLUMNS: &str = "id, name, offer_type, status, priority, product_id,
    discount_type, discount_value, title, description, display_type, position,
    rules_json, schedule_json, settings_json";

impl UpsellStore {
    // ── Offer ─────────────────────────────────────────────────────

    /// Insert a new offer and return its assigned id. `offer.id` is ignored.
    pub fn insert_offer(&self, offer: &Offer, now: DateTime<Utc>) -> UpsellResult<OfferId> {
        let ts = to_sql_timestamp(now);
        self.conn.execute(
            "INSERT INTO offer (
                name, offer_type, status, priority, product_id, discount_type,
                discount_value, title, description, display_type, position,
                rules_json, schedule_json, settings_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
            params![
                offer.name,
                offer.offer_type.as_str(),
                offer.status.as_str(),
                offer.priority as i64,
                offer.product_id,
                offer.discount_type.as_str(),
                offer.discount_value,
                offer.title,
                offer.description,
                offer.display_type.as_str(),
                offer.position.as_str(),
                serde_json::to_string(&offer.rules)?,
                serde_json::to_string(&offer.schedule)?,
                serde_json::to_string(&offer.settings)?,
                ts,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Write `offer` under `offer.id`, creating the row if it does not exist.
    pub fn upsert_offer(&self, offer: &Offer, now: DateTime<Utc>) -> UpsellResult<()> {
        let ts = to_sql_timestamp(now);
        self.conn.execute(
            "INSERT INTO offer (
                id, name, offer_type, status, priority, product_id, discount_type,
                discount_value, title, description, display_type, position,
                rules_json, schedule_json, settings_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                offer_type = excluded.offer_type,
                status = excluded.status,
                priority = excluded.priority,
                product_id = excluded.product_id,
                discount_type = excluded.discount_type,
                discount_value = excluded.discount_value,
                title = excluded.title,
                description = excluded.description,
                display_type = excluded.display_type,
                position = excluded.position,
                rules_json = excluded.rules_json,
                schedule_json = excluded.schedule_json,
                settings_json = excluded.settings_json,
                updated_at = excluded.updated_at",
            params![
                offer.id,
                offer.name,
                offer.offer_type.as_str(),
                offer.status.as_str(),
                offer.priority as i64,
                offer.product_id,
                offer.discount_type.as_str(),
                offer.discount_value,
                offer.title,
                offer.description,
                offer.display_type.as_str(),
                offer.position.as_str(),
                serde_json::to_string(&offer.rules)?,
                serde_json::to_string(&offer.schedule)?,
                serde_json::to_string(&offer.settings)?,
                ts,
            ],
        )?;
        Ok(())
    }

    pub fn offer_by_id(&self, offer_id: OfferId) -> UpsellResult<Option<Offer>> {
        let sql = format!("SELECT {OFFER_COLUMNS} FROM offer WHERE id = ?1");
        let offer = self
            .conn
            .query_row(&sql, params![offer_id], hydrate_offer)
            .optional()?;
        Ok(offer)
    }

    /// All offers of a type, by priority ascending then newest first.
    pub fn offers_by_type(&self, offer_type: OfferType) -> UpsellResult<Vec<Offer>> {
        let sql = format!(
            "SELECT {OFFER_COLUMNS} FROM offer
             WHERE offer_type = ?1
             ORDER BY priority ASC, id DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let offers = stmt
            .query_map(params![offer_type.as_str()], hydrate_offer)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(offers)
    }

    /// Returns true if a row was removed.
    pub fn delete_offer(&self, offer_id: OfferId) -> UpsellResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM offer WHERE id = ?1", params![offer_id])?;
        Ok(removed > 0)
    }

    pub fn offer_count(&self) -> UpsellResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM offer", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Ids of every offer selling `product_id`, any type or status.
    pub fn offer_ids_for_product(&self, product_id: ProductId) -> UpsellResult<Vec<OfferId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM offer WHERE product_id = ?1 ORDER BY id ASC")?;
        let ids = stmt
            .query_map(params![product_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

fn hydrate_offer(row: &Row<'_>) -> rusqlite::Result<Offer> {
    let id: OfferId = row.get(0)?;
    let offer_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    let discount_type: String = row.get(6)?;
    let display_type: String = row.get(10)?;
    let position: String = row.get(11)?;
    let rules_json: String = row.get(12)?;
    let schedule_json: String = row.get(13)?;
    let settings_json: String = row.get(14)?;

    Ok(Offer {
        id,
        name:           row.get(1)?,
        offer_type:     OfferType::parse_or_default(&offer_type),
        status:         OfferStatus::parse_or_default(&status),
        priority:       row.get::<_, i64>(4)?.clamp(0, u32::MAX as i64) as u32,
        product_id:     row.get(5)?,
        discount_type:  DiscountType::parse_or_default(&discount_type),
        discount_value: row.get(7)?,
        title:          row.get(8)?,
        description:    row.get(9)?,
        display_type:   DisplayType::parse_or_default(&display_type),
        position:       Position::parse_or_default(&position),
        rules:          decode_document(id, "rules_json", &rules_json),
        schedule:       decode_document(id, "schedule_json", &schedule_json),
        settings:       decode_document::<crate::offer::OfferSettings>(
            id,
            "settings_json",
            &settings_json,
        )
        .normalized(),
    })
}

/// Malformed sub-documents hydrate as their defaults rather than failing the row.
fn decode_document<T: DeserializeOwned + Default>(offer_id: OfferId, column: &str, raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        log::warn!("offer {offer_id}: unreadable {column} ({e}), using defaults");
        T::default()
    })
}

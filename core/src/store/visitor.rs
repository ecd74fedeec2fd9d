use super::{from_sql_timestamp, to_sql_timestamp, UpsellStore};
use crate::{
    error::UpsellResult,
    host::{Actor, DismissLedger},
    types::{OfferId, OrderId},
};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

impl UpsellStore {
    // ── Dismiss counters ──────────────────────────────────────────

    /// Add one dismissal and return the new count.
    pub fn increment_dismiss(
        &self,
        offer_id: OfferId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> UpsellResult<u32> {
        let count: i64 = self.conn.query_row(
            "INSERT INTO dismiss_count (offer_id, actor_key, count, updated_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(offer_id, actor_key) DO UPDATE
                 SET count = count + 1, updated_at = excluded.updated_at
             RETURNING count",
            params![offer_id, actor.key(), to_sql_timestamp(now)],
            |row| row.get(0),
        )?;
        Ok(count.clamp(0, u32::MAX as i64) as u32)
    }

    pub fn stored_dismiss_count(&self, offer_id: OfferId, actor: &Actor) -> UpsellResult<u32> {
        let count: Option<i64> = self
            .conn
            .query_row(
                "SELECT count FROM dismiss_count WHERE offer_id = ?1 AND actor_key = ?2",
                params![offer_id, actor.key()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0).clamp(0, u32::MAX as i64) as u32)
    }

    // ── Post-purchase outcomes ────────────────────────────────────

    /// Remember that `order_id`'s upsell was clicked (`accepted == false`) or
    /// accepted. Flags only ever go from 0 to 1.
    pub fn mark_order_upsell(
        &self,
        order_id: OrderId,
        offer_id: OfferId,
        accepted: bool,
        now: DateTime<Utc>,
    ) -> UpsellResult<()> {
        let (clicked, accepted) = if accepted { (0, 1) } else { (1, 0) };
        self.conn.execute(
            "INSERT INTO order_upsell_state (order_id, offer_id, clicked, accepted, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(order_id) DO UPDATE
                 SET clicked    = MAX(clicked, excluded.clicked),
                     accepted   = MAX(accepted, excluded.accepted),
                     offer_id   = excluded.offer_id,
                     updated_at = excluded.updated_at",
            params![order_id, offer_id, clicked, accepted, to_sql_timestamp(now)],
        )?;
        Ok(())
    }

    /// Whether the order's upsell was already clicked or accepted.
    pub fn order_upsell_taken(&self, order_id: OrderId) -> UpsellResult<bool> {
        let taken: Option<i64> = self
            .conn
            .query_row(
                "SELECT clicked + accepted FROM order_upsell_state WHERE order_id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(taken.unwrap_or(0) > 0)
    }

    // ── Evergreen countdowns ──────────────────────────────────────

    /// Deadline for an evergreen countdown in `scope_key`. A stored deadline
    /// still in the future is reused; otherwise a fresh one `minutes` from
    /// `now` replaces it.
    pub fn evergreen_deadline(
        &self,
        offer_id: OfferId,
        scope_key: &str,
        now: DateTime<Utc>,
        minutes: u32,
    ) -> UpsellResult<DateTime<Utc>> {
        let fresh_raw = to_sql_timestamp(now + Duration::minutes(i64::from(minutes.max(1))));
        let fresh = from_sql_timestamp(&fresh_raw).unwrap_or(now);

        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT deadline FROM countdown_deadline WHERE offer_id = ?1 AND scope_key = ?2",
                params![offer_id, scope_key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(deadline) = stored.as_deref().and_then(from_sql_timestamp) {
            if deadline > now {
                return Ok(deadline);
            }
        }

        self.conn.execute(
            "INSERT INTO countdown_deadline (offer_id, scope_key, deadline) VALUES (?1, ?2, ?3)
             ON CONFLICT(offer_id, scope_key) DO UPDATE SET deadline = excluded.deadline",
            params![offer_id, scope_key, fresh_raw],
        )?;
        Ok(fresh)
    }
}

impl DismissLedger for UpsellStore {
    fn dismiss_count(&self, offer_id: OfferId, actor: &Actor) -> UpsellResult<u32> {
        self.stored_dismiss_count(offer_id, actor)
    }
}

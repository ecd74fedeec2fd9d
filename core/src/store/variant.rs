use super::{to_sql_timestamp, UpsellStore};
use crate::{
    error::UpsellResult,
    types::OfferId,
    variant::{Variant, VariantStats},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl UpsellStore {
    // ── Variant stats ─────────────────────────────────────────────

    pub fn variant_stats(&self, offer_id: OfferId) -> UpsellResult<VariantStats> {
        let mut stmt = self.conn.prepare(
            "SELECT variant, views, accepts FROM variant_stats WHERE offer_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![offer_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stats = VariantStats::default();
        for (variant, views, accepts) in rows {
            if let Some(variant) = Variant::parse(&variant) {
                let counts = stats.counts_mut(variant);
                counts.views = views.max(0) as u64;
                counts.accepts = accepts.max(0) as u64;
            }
        }
        Ok(stats)
    }

    pub fn increment_variant_views(&self, offer_id: OfferId, variant: Variant) -> UpsellResult<()> {
        self.conn.execute(
            "INSERT INTO variant_stats (offer_id, variant, views, accepts) VALUES (?1, ?2, 1, 0)
             ON CONFLICT(offer_id, variant) DO UPDATE SET views = views + 1",
            params![offer_id, variant.as_str()],
        )?;
        Ok(())
    }

    pub fn increment_variant_accepts(&self, offer_id: OfferId, variant: Variant) -> UpsellResult<()> {
        self.conn.execute(
            "INSERT INTO variant_stats (offer_id, variant, views, accepts) VALUES (?1, ?2, 0, 1)
             ON CONFLICT(offer_id, variant) DO UPDATE SET accepts = accepts + 1",
            params![offer_id, variant.as_str()],
        )?;
        Ok(())
    }

    // ── Variant assignment ────────────────────────────────────────

    pub fn stored_variant(&self, offer_id: OfferId, scope_key: &str) -> UpsellResult<Option<Variant>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT variant FROM variant_assignment WHERE offer_id = ?1 AND scope_key = ?2",
                params![offer_id, scope_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.as_deref().and_then(Variant::parse))
    }

    /// Store `variant` for the scope unless one is already stored, and
    /// return whichever variant the scope ends up with.
    pub fn assign_variant_once(
        &self,
        offer_id: OfferId,
        scope_key: &str,
        variant: Variant,
        now: DateTime<Utc>,
    ) -> UpsellResult<Variant> {
        self.conn.execute(
            "INSERT OR IGNORE INTO variant_assignment (offer_id, scope_key, variant, assigned_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![offer_id, scope_key, variant.as_str(), to_sql_timestamp(now)],
        )?;
        Ok(self.stored_variant(offer_id, scope_key)?.unwrap_or(variant))
    }
}

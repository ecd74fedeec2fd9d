use super::{to_sql_timestamp, UpsellStore};
use crate::{
    analytics::{EventFilter, OfferPerformance},
    error::UpsellResult,
    event::{AnalyticsEvent, EventSink},
    offer::{OfferType, SlugEnum},
};
use rusqlite::{params, params_from_iter, types::Value};

impl UpsellStore {
    // ── Analytics events ──────────────────────────────────────────

    pub fn insert_event(&self, event: &AnalyticsEvent) -> UpsellResult<()> {
        self.conn.execute(
            "INSERT INTO analytics_event (
                offer_type, offer_id, action_type, order_id, user_id,
                revenue, context, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.offer_type.as_str(),
                event.offer_id,
                event.action.as_str(),
                event.order_id,
                event.user_id,
                event.revenue,
                event.context,
                to_sql_timestamp(event.created_at),
            ],
        )?;
        Ok(())
    }

    /// (views, conversions, accepted revenue) over matching events.
    pub fn event_totals(&self, filter: &EventFilter) -> UpsellResult<(u64, u64, f64)> {
        let (clause, values) = where_clause(filter);
        let sql = format!(
            "SELECT
                COALESCE(SUM(CASE WHEN action_type = 'view' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN action_type = 'accept' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN action_type = 'accept' THEN revenue ELSE 0 END), 0)
             FROM analytics_event {clause}"
        );
        let totals = self.conn.query_row(&sql, params_from_iter(values.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?.max(0) as u64,
                row.get::<_, i64>(1)?.max(0) as u64,
                row.get::<_, f64>(2)?,
            ))
        })?;
        Ok(totals)
    }

    /// Per-offer totals, best revenue first, then most conversions.
    pub fn offer_performance(
        &self,
        filter: &EventFilter,
        limit: usize,
    ) -> UpsellResult<Vec<OfferPerformance>> {
        let (clause, mut values) = where_clause(filter);
        values.push(Value::Integer(limit as i64));
        let sql = format!(
            "SELECT offer_type, offer_id,
                SUM(CASE WHEN action_type = 'view' THEN 1 ELSE 0 END) AS views,
                SUM(CASE WHEN action_type = 'accept' THEN 1 ELSE 0 END) AS conversions,
                SUM(CASE WHEN action_type = 'accept' THEN revenue ELSE 0 END) AS revenue
             FROM analytics_event {clause}
             GROUP BY offer_type, offer_id
             ORDER BY revenue DESC, conversions DESC, offer_id ASC
             LIMIT ?{}",
            values.len()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let offer_type: String = row.get(0)?;
                Ok(OfferPerformance {
                    offer_type:  OfferType::parse_or_default(&offer_type),
                    offer_id:    row.get(1)?,
                    views:       row.get::<_, i64>(2)?.max(0) as u64,
                    conversions: row.get::<_, i64>(3)?.max(0) as u64,
                    revenue:     row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl EventSink for UpsellStore {
    fn record_event(&self, event: &AnalyticsEvent) -> UpsellResult<()> {
        self.insert_event(event)
    }
}

/// Numbered placeholders (`?1`, `?2`, ...) so callers can append more.
fn where_clause(filter: &EventFilter) -> (String, Vec<Value>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(offer_type) = filter.offer_type {
        values.push(Value::Text(offer_type.as_str().to_string()));
        conditions.push(format!("offer_type = ?{}", values.len()));
    }
    if let Some(ids) = &filter.offer_ids {
        if ids.is_empty() {
            conditions.push("0 = 1".to_string());
        } else {
            let mut placeholders = Vec::with_capacity(ids.len());
            for id in ids {
                values.push(Value::Integer(*id));
                placeholders.push(format!("?{}", values.len()));
            }
            conditions.push(format!("offer_id IN ({})", placeholders.join(", ")));
        }
    }
    if let Some(start) = filter.start_date {
        values.push(Value::Text(start.format("%Y-%m-%d").to_string()));
        conditions.push(format!("DATE(created_at) >= ?{}", values.len()));
    }
    if let Some(end) = filter.end_date {
        values.push(Value::Text(end.format("%Y-%m-%d").to_string()));
        conditions.push(format!("DATE(created_at) <= ?{}", values.len()));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (clause, values)
}

//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Components call store methods; they never execute SQL directly.
//!
//! Counters (variant stats, dismiss counts) are single-statement upserts so
//! concurrent writers can at worst lose a count, never corrupt a row.

mod analytics;
mod offer;
mod variant;
mod visitor;

use crate::error::UpsellResult;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{Connection, OpenFlags};

/// Storage format for every timestamp column.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct UpsellStore {
    conn: Connection,
}

impl UpsellStore {
    /// Open (or create) the database at `path`. `file:` URIs are accepted.
    pub fn open(path: &str) -> UpsellResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only matters for real files; in-memory databases ignore it.
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            log::warn!("{path}: WAL mode unavailable, keeping default journal: {e}");
        }
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> UpsellResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order. Safe to run repeatedly.
    pub fn migrate(&self) -> UpsellResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_offers.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_analytics.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_ab_testing.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_visitor_state.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_order_state.sql"))?;
        log::info!("schema migrations applied");
        Ok(())
    }

    /// Remove every row the engine has written. Tables are kept.
    pub fn uninstall(&self) -> UpsellResult<()> {
        self.conn.execute_batch(
            "DELETE FROM analytics_event;
             DELETE FROM variant_stats;
             DELETE FROM variant_assignment;
             DELETE FROM dismiss_count;
             DELETE FROM countdown_deadline;
             DELETE FROM order_upsell_state;
             DELETE FROM offer;",
        )?;
        log::info!("all offer data removed");
        Ok(())
    }
}

pub(crate) fn to_sql_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn from_sql_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

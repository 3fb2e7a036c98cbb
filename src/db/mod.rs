//! SQLite database module for members, episodes, the coin ledger and
//! durable view counters
//!
//! ## Tables
//!
//! - `members` - Reader identity and coin balance
//! - `works` / `episodes` - Serialized works and their chapters
//! - `coin_ledger` - Append-only coin spend records (entitlement proof)
//! - `recent_reads` - Latest opened episode per (member, work)
//! - `daily_view_counts` - Reconciled views per (episode, date)
//! - `work_rankings` - Ranked snapshot per (work, date, period)

pub mod schema;
pub mod members;
pub mod episodes;
pub mod ledger;
pub mod recent_reads;
pub mod view_counts;
pub mod rankings;

use std::path::Path;
use std::sync::Mutex;

use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::CoreError;

/// Text format used for calendar dates in every table
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, CoreError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| CoreError::Internal(format!("Bad stored date '{}': {}", value, e)))
}

/// SQLite database shared by every service
pub struct CoreDb {
    conn: Mutex<Connection>,
}

impl CoreDb {
    /// Open or create the database file
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        info!("Opening SQLite database at {:?}", path);

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, CoreError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), CoreError> {
        self.with_conn(schema::init_schema)
    }

    /// Run a read against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Connection) -> Result<T, CoreError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| CoreError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, CoreError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| CoreError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, CoreError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, CoreError> {
                let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                member_count: count("members")?,
                episode_count: count("episodes")?,
                ledger_entries: count("coin_ledger")?,
                daily_counter_rows: count("daily_view_counts")?,
                ranking_rows: count("work_rankings")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub member_count: u64,
    pub episode_count: u64,
    pub ledger_entries: u64,
    pub daily_counter_rows: u64,
    pub ranking_rows: u64,
}

// Re-exports
pub use members::Member;
pub use episodes::{Episode, EpisodeStatus, NewEpisode, Work};
pub use ledger::{CoinHistoryRow, LedgerEntry, WorkRevenue};
pub use recent_reads::RecentRead;
pub use view_counts::{DailyViewCount, WorkDayViews};

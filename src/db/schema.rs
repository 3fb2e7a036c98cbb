//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::CoreError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), CoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, CoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), CoreError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), CoreError> {
    conn.execute_batch(CATALOG_SCHEMA)
        .map_err(|e| CoreError::StorageFailure(format!("Failed to create catalog tables: {}", e)))?;

    conn.execute_batch(LEDGER_SCHEMA)
        .map_err(|e| CoreError::StorageFailure(format!("Failed to create ledger tables: {}", e)))?;

    conn.execute_batch(COUNTER_SCHEMA)
        .map_err(|e| CoreError::StorageFailure(format!("Failed to create counter tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| CoreError::StorageFailure(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), CoreError> {
    info!(from_version, "No migration steps registered");
    set_schema_version(conn, SCHEMA_VERSION)
}

/// Members, works and episodes
const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS members (
    provider_id TEXT PRIMARY KEY NOT NULL,
    coin_balance INTEGER NOT NULL DEFAULT 0 CHECK (coin_balance >= 0),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS works (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    author_id TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

-- chapter is unique within a work; navigation walks it in both directions
CREATE TABLE IF NOT EXISTS episodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    work_id INTEGER NOT NULL,
    chapter INTEGER NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'active',
    coin_cost INTEGER NOT NULL DEFAULT 0 CHECK (coin_cost >= 0),
    total_views INTEGER NOT NULL DEFAULT 0 CHECK (total_views >= 0),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    UNIQUE (work_id, chapter),
    FOREIGN KEY (work_id) REFERENCES works(id) ON DELETE CASCADE
);
"#;

/// Coin ledger and reading markers
const LEDGER_SCHEMA: &str = r#"
-- Append-only. One row per (member, episode) is the entitlement proof.
CREATE TABLE IF NOT EXISTS coin_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    member_id TEXT NOT NULL,
    episode_id INTEGER NOT NULL,
    amount INTEGER NOT NULL CHECK (amount > 0),
    created_at TEXT NOT NULL,
    UNIQUE (member_id, episode_id),
    FOREIGN KEY (member_id) REFERENCES members(provider_id),
    FOREIGN KEY (episode_id) REFERENCES episodes(id)
);

CREATE TABLE IF NOT EXISTS recent_reads (
    member_id TEXT NOT NULL,
    work_id INTEGER NOT NULL,
    episode_id INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (member_id, work_id),
    FOREIGN KEY (member_id) REFERENCES members(provider_id),
    FOREIGN KEY (episode_id) REFERENCES episodes(id)
);
"#;

/// Durable view counters and rankings
const COUNTER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS daily_view_counts (
    episode_id INTEGER NOT NULL,
    view_date TEXT NOT NULL,
    view_count INTEGER NOT NULL CHECK (view_count >= 0),
    PRIMARY KEY (episode_id, view_date),
    FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS work_rankings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    work_id INTEGER NOT NULL,
    ranking_date TEXT NOT NULL,
    ranking_period TEXT NOT NULL,
    rank INTEGER NOT NULL,
    score INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (work_id, ranking_date, ranking_period),
    FOREIGN KEY (work_id) REFERENCES works(id) ON DELETE CASCADE
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_episodes_work ON episodes(work_id);
CREATE INDEX IF NOT EXISTS idx_ledger_member_created ON coin_ledger(member_id, created_at);
CREATE INDEX IF NOT EXISTS idx_ledger_created ON coin_ledger(created_at);
CREATE INDEX IF NOT EXISTS idx_recent_reads_member ON recent_reads(member_id, updated_at);
CREATE INDEX IF NOT EXISTS idx_daily_views_date ON daily_view_counts(view_date);
CREATE INDEX IF NOT EXISTS idx_rankings_date_period ON work_rankings(ranking_date, ranking_period, rank);
"#;

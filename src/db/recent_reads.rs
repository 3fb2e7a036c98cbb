//! Recent-read markers: latest opened episode per (member, work)

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize)]
pub struct RecentRead {
    pub work_id: i64,
    pub work_title: String,
    pub author_id: String,
    pub episode_id: i64,
    pub episode_title: String,
    pub updated_at: String,
}

/// Point the member's marker for the episode's work at this episode
pub fn record(
    conn: &Connection,
    member_id: &str,
    work_id: i64,
    episode_id: i64,
    at: DateTime<Utc>,
) -> Result<(), CoreError> {
    conn.execute(
        r#"
        INSERT INTO recent_reads (member_id, work_id, episode_id, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (member_id, work_id)
        DO UPDATE SET episode_id = excluded.episode_id, updated_at = excluded.updated_at
        "#,
        params![member_id, work_id, episode_id, super::ledger::timestamp(at)],
    )?;
    Ok(())
}

/// A member's markers, most recently updated first
pub fn list(conn: &Connection, member_id: &str, limit: u32) -> Result<Vec<RecentRead>, CoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT r.work_id, w.title, w.author_id, r.episode_id, e.title, r.updated_at
        FROM recent_reads r
        INNER JOIN works w ON w.id = r.work_id
        INNER JOIN episodes e ON e.id = r.episode_id
        WHERE r.member_id = ?
        ORDER BY r.updated_at DESC, r.work_id
        LIMIT ?
        "#,
    )?;

    let rows = stmt.query_map(params![member_id, limit as i64], |row| {
        Ok(RecentRead {
            work_id: row.get(0)?,
            work_title: row.get(1)?,
            author_id: row.get(2)?,
            episode_id: row.get(3)?,
            episode_title: row.get(4)?,
            updated_at: row.get(5)?,
        })
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

//! Works and episodes
//!
//! Episodes reference their work by id; there are no back-pointers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;

/// Publication state of an episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Active,
    Hidden,
    Deleted,
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpisodeStatus::Active => write!(f, "active"),
            EpisodeStatus::Hidden => write!(f, "hidden"),
            EpisodeStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for EpisodeStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EpisodeStatus::Active),
            "hidden" => Ok(EpisodeStatus::Hidden),
            "deleted" => Ok(EpisodeStatus::Deleted),
            other => Err(CoreError::InvalidInput(format!("unknown episode status '{}'", other))),
        }
    }
}

/// Work row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Work {
    pub id: i64,
    pub title: String,
    pub author_id: String,
}

/// Episode row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Episode {
    pub id: i64,
    pub work_id: i64,
    pub chapter: i64,
    pub title: String,
    pub content: String,
    pub status: EpisodeStatus,
    pub coin_cost: i64,
    pub total_views: i64,
}

impl Episode {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        let status = status.parse::<EpisodeStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
            )
        })?;

        Ok(Self {
            id: row.get("id")?,
            work_id: row.get("work_id")?,
            chapter: row.get("chapter")?,
            title: row.get("title")?,
            content: row.get("content")?,
            status,
            coin_cost: row.get("coin_cost")?,
            total_views: row.get("total_views")?,
        })
    }

    pub fn is_free(&self) -> bool {
        self.coin_cost == 0
    }
}

/// Input for creating an episode
#[derive(Debug, Clone, Deserialize)]
pub struct NewEpisode {
    pub work_id: i64,
    pub chapter: i64,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_status")]
    pub status: EpisodeStatus,
    #[serde(default)]
    pub coin_cost: i64,
}

fn default_status() -> EpisodeStatus { EpisodeStatus::Active }

/// Create a work
pub fn create_work(conn: &Connection, title: &str, author_id: &str) -> Result<Work, CoreError> {
    if title.is_empty() {
        return Err(CoreError::InvalidInput("title is required".into()));
    }

    conn.execute(
        "INSERT INTO works (title, author_id) VALUES (?, ?)",
        params![title, author_id],
    )?;

    Ok(Work {
        id: conn.last_insert_rowid(),
        title: title.to_string(),
        author_id: author_id.to_string(),
    })
}

/// Get work by ID
pub fn get_work(conn: &Connection, id: i64) -> Result<Option<Work>, CoreError> {
    Ok(conn
        .query_row(
            "SELECT id, title, author_id FROM works WHERE id = ?",
            params![id],
            |row| {
                Ok(Work {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    author_id: row.get(2)?,
                })
            },
        )
        .optional()?)
}

/// Create an episode
pub fn create_episode(conn: &Connection, input: &NewEpisode) -> Result<Episode, CoreError> {
    if input.title.is_empty() {
        return Err(CoreError::InvalidInput("title is required".into()));
    }
    if input.chapter < 1 {
        return Err(CoreError::InvalidInput("chapter must be >= 1".into()));
    }
    if input.coin_cost < 0 {
        return Err(CoreError::InvalidInput("coin_cost must be >= 0".into()));
    }

    conn.execute(
        r#"
        INSERT INTO episodes (work_id, chapter, title, content, status, coin_cost)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![
            input.work_id,
            input.chapter,
            input.title,
            input.content,
            input.status.to_string(),
            input.coin_cost,
        ],
    )?;

    let id = conn.last_insert_rowid();
    get_episode(conn, id)?
        .ok_or_else(|| CoreError::Internal("Episode not found after insert".to_string()))
}

/// Get episode by ID
pub fn get_episode(conn: &Connection, id: i64) -> Result<Option<Episode>, CoreError> {
    Ok(conn
        .query_row("SELECT * FROM episodes WHERE id = ?", params![id], |row| Episode::from_row(row))
        .optional()?)
}

/// Bulk lookup keyed by episode id. Unknown ids are simply absent.
pub fn get_episodes_by_ids(conn: &Connection, ids: &[i64]) -> Result<HashMap<i64, Episode>, CoreError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<_> = ids.iter().map(|_| "?").collect();
    let sql = format!(
        "SELECT * FROM episodes WHERE id IN ({})",
        placeholders.join(", ")
    );
    debug!(count = ids.len(), "Bulk episode lookup");

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();

    let rows = stmt.query_map(param_refs.as_slice(), |row| Episode::from_row(row))?;

    let mut found = HashMap::with_capacity(ids.len());
    for row in rows {
        let episode = row?;
        found.insert(episode.id, episode);
    }
    Ok(found)
}

/// Sibling episode at a chapter ordinal within a work
pub fn find_by_chapter(conn: &Connection, work_id: i64, chapter: i64) -> Result<Option<Episode>, CoreError> {
    Ok(conn
        .query_row(
            "SELECT * FROM episodes WHERE work_id = ? AND chapter = ?",
            params![work_id, chapter],
            |row| Episode::from_row(row),
        )
        .optional()?)
}

/// Change an episode's publication state
pub fn set_status(conn: &Connection, id: i64, status: EpisodeStatus) -> Result<(), CoreError> {
    let changes = conn.execute(
        "UPDATE episodes SET status = ? WHERE id = ?",
        params![status.to_string(), id],
    )?;
    if changes == 0 {
        return Err(CoreError::NotFound(format!("episode {}", id)));
    }
    Ok(())
}

/// Add reconciled views to an episode's cumulative total
pub fn add_total_views(conn: &Connection, id: i64, delta: i64) -> Result<(), CoreError> {
    let changes = conn.execute(
        "UPDATE episodes SET total_views = total_views + ? WHERE id = ?",
        params![delta, id],
    )?;
    if changes == 0 {
        return Err(CoreError::StorageFailure(format!("episode {} vanished during update", id)));
    }
    Ok(())
}

/// Sum of cumulative views over a work's episodes
pub fn work_total_views(conn: &Connection, work_id: i64) -> Result<i64, CoreError> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(total_views), 0) FROM episodes WHERE work_id = ?",
        params![work_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn episode(work_id: i64, chapter: i64) -> NewEpisode {
        NewEpisode {
            work_id,
            chapter,
            title: format!("Chapter {}", chapter),
            content: String::new(),
            status: EpisodeStatus::Active,
            coin_cost: 0,
        }
    }

    #[test]
    fn test_chapter_unique_within_work() {
        let conn = conn();
        let work = create_work(&conn, "Moonlit Sword", "author-1").unwrap();
        create_episode(&conn, &episode(work.id, 1)).unwrap();
        assert!(create_episode(&conn, &episode(work.id, 1)).is_err());

        let other = create_work(&conn, "Other", "author-2").unwrap();
        create_episode(&conn, &episode(other.id, 1)).unwrap();
    }

    #[test]
    fn test_bulk_lookup_skips_unknown_ids() {
        let conn = conn();
        let work = create_work(&conn, "W", "a").unwrap();
        let e1 = create_episode(&conn, &episode(work.id, 1)).unwrap();
        let e2 = create_episode(&conn, &episode(work.id, 2)).unwrap();

        let found = get_episodes_by_ids(&conn, &[e1.id, e2.id, 999]).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains_key(&e1.id));
        assert!(!found.contains_key(&999));
        assert!(get_episodes_by_ids(&conn, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_status_round_trip_and_views() {
        let conn = conn();
        let work = create_work(&conn, "W", "a").unwrap();
        let e = create_episode(&conn, &episode(work.id, 1)).unwrap();
        set_status(&conn, e.id, EpisodeStatus::Hidden).unwrap();
        add_total_views(&conn, e.id, 4).unwrap();

        let stored = find_by_chapter(&conn, work.id, 1).unwrap().unwrap();
        assert_eq!(stored.status, EpisodeStatus::Hidden);
        assert_eq!(stored.total_views, 4);
        assert_eq!(work_total_views(&conn, work.id).unwrap(), 4);
        assert!(find_by_chapter(&conn, work.id, 2).unwrap().is_none());
    }

    #[test]
    fn test_invalid_episode_rejected() {
        let conn = conn();
        let work = create_work(&conn, "W", "a").unwrap();
        let mut bad = episode(work.id, 0);
        assert!(matches!(create_episode(&conn, &bad), Err(CoreError::InvalidInput(_))));
        bad.chapter = 1;
        bad.coin_cost = -5;
        assert!(matches!(create_episode(&conn, &bad), Err(CoreError::InvalidInput(_))));
    }
}

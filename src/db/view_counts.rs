//! Durable per-day view counters

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::{format_date, parse_date};
use crate::error::CoreError;

/// Reconciled views for one episode on one date
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyViewCount {
    pub episode_id: i64,
    pub view_date: NaiveDate,
    pub view_count: i64,
}

/// A work's summed episode views on one date
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkDayViews {
    pub work_id: i64,
    pub view_date: NaiveDate,
    pub views: i64,
}

/// Create the (episode, date) row with `delta`, or add `delta` to it
pub fn upsert_daily(conn: &Connection, episode_id: i64, date: NaiveDate, delta: i64) -> Result<(), CoreError> {
    if delta < 0 {
        return Err(CoreError::InvalidInput(format!("negative view delta {} for episode {}", delta, episode_id)));
    }

    conn.execute(
        r#"
        INSERT INTO daily_view_counts (episode_id, view_date, view_count)
        VALUES (?, ?, ?)
        ON CONFLICT (episode_id, view_date)
        DO UPDATE SET view_count = view_count + excluded.view_count
        "#,
        params![episode_id, format_date(date), delta],
    )?;
    Ok(())
}

pub fn get_daily(conn: &Connection, episode_id: i64, date: NaiveDate) -> Result<Option<DailyViewCount>, CoreError> {
    let count: Option<i64> = conn
        .query_row(
            "SELECT view_count FROM daily_view_counts WHERE episode_id = ? AND view_date = ?",
            params![episode_id, format_date(date)],
            |row| row.get(0),
        )
        .optional()?;

    Ok(count.map(|view_count| DailyViewCount {
        episode_id,
        view_date: date,
        view_count,
    }))
}

/// Sum of every daily row for an episode
pub fn episode_daily_sum(conn: &Connection, episode_id: i64) -> Result<i64, CoreError> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(view_count), 0) FROM daily_view_counts WHERE episode_id = ?",
        params![episode_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Per-work view totals for each of the given dates, in one query.
/// Works with no views on a date produce no row for it.
pub fn work_totals_for_dates(conn: &Connection, dates: &[NaiveDate]) -> Result<Vec<WorkDayViews>, CoreError> {
    if dates.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<_> = dates.iter().map(|_| "?").collect();
    let sql = format!(
        r#"
        SELECT e.work_id, d.view_date, SUM(d.view_count)
        FROM daily_view_counts d
        INNER JOIN episodes e ON e.id = d.episode_id
        WHERE d.view_date IN ({})
        GROUP BY e.work_id, d.view_date
        ORDER BY e.work_id, d.view_date
        "#,
        placeholders.join(", ")
    );

    let formatted: Vec<String> = dates.iter().map(|d| format_date(*d)).collect();
    let param_refs: Vec<&dyn rusqlite::ToSql> = formatted.iter().map(|d| d as &dyn rusqlite::ToSql).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
    })?;

    let mut totals = vec![];
    for row in rows {
        let (work_id, view_date, views) = row?;
        totals.push(WorkDayViews {
            work_id,
            view_date: parse_date(&view_date)?,
            views,
        });
    }
    Ok(totals)
}

//! Coin ledger: append-only spend records
//!
//! A row for (member, episode) is the sole proof of entitlement. Rows are
//! never updated or deleted, and the UNIQUE(member_id, episode_id)
//! constraint rejects a second purchase of the same episode.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;

use crate::error::CoreError;

/// Ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub member_id: String,
    pub episode_id: i64,
    pub amount: i64,
    pub created_at: String,
}

impl LedgerEntry {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            member_id: row.get("member_id")?,
            episode_id: row.get("episode_id")?,
            amount: row.get("amount")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A member's purchase, joined with what was bought
#[derive(Debug, Clone, Serialize)]
pub struct CoinHistoryRow {
    pub episode_id: i64,
    pub episode_title: String,
    pub chapter: i64,
    pub work_title: String,
    pub used_coins: i64,
    pub created_at: String,
}

/// Coins earned by a work over a settlement window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkRevenue {
    pub work_id: i64,
    pub work_title: String,
    pub author_id: String,
    pub total_coins: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn day_start(date: NaiveDate) -> String {
    format!("{}T00:00:00Z", crate::db::format_date(date))
}

/// Whether the member already owns the episode
pub fn has_entry(conn: &Connection, member_id: &str, episode_id: i64) -> Result<bool, CoreError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT amount FROM coin_ledger WHERE member_id = ? AND episode_id = ?",
            params![member_id, episode_id],
            |row| row.get(0),
        )
        .optional()?;

    match found {
        Some(amount) if amount > 0 => Ok(true),
        Some(amount) => Err(CoreError::Internal(format!(
            "ledger entry for {}/{} has non-positive amount {}",
            member_id, episode_id, amount
        ))),
        None => Ok(false),
    }
}

/// Append a spend record.
///
/// A duplicate (member, episode) pair is reported as `StorageFailure`
/// rather than silently creating a second entitlement.
pub fn append_entry(
    conn: &Connection,
    member_id: &str,
    episode_id: i64,
    amount: i64,
    at: DateTime<Utc>,
) -> Result<LedgerEntry, CoreError> {
    if amount <= 0 {
        return Err(CoreError::InvalidInput("ledger amount must be > 0".into()));
    }

    let result = conn.execute(
        "INSERT INTO coin_ledger (member_id, episode_id, amount, created_at) VALUES (?, ?, ?, ?)",
        params![member_id, episode_id, amount, timestamp(at)],
    );

    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            return Err(CoreError::StorageFailure(format!(
                "ledger already holds an entry for member {} episode {}",
                member_id, episode_id
            )));
        }
        Err(e) => return Err(e.into()),
    }

    let id = conn.last_insert_rowid();
    conn.query_row("SELECT * FROM coin_ledger WHERE id = ?", params![id], |row| LedgerEntry::from_row(row))
        .map_err(CoreError::from)
}

/// Entries for a member, newest first
#[cfg(test)]
pub(crate) fn entries_for_member(conn: &Connection, member_id: &str) -> Result<Vec<LedgerEntry>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM coin_ledger WHERE member_id = ? ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt.query_map(params![member_id], |row| LedgerEntry::from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Paged purchase history for a member, newest first
pub fn coin_history(
    conn: &Connection,
    member_id: &str,
    limit: u32,
    offset: u32,
) -> Result<Vec<CoinHistoryRow>, CoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT l.episode_id, e.title, e.chapter, w.title, l.amount, l.created_at
        FROM coin_ledger l
        INNER JOIN episodes e ON e.id = l.episode_id
        INNER JOIN works w ON w.id = e.work_id
        WHERE l.member_id = ?
        ORDER BY l.created_at DESC, l.id DESC
        LIMIT ? OFFSET ?
        "#,
    )?;

    let rows = stmt.query_map(params![member_id, limit as i64, offset as i64], |row| {
        Ok(CoinHistoryRow {
            episode_id: row.get(0)?,
            episode_title: row.get(1)?,
            chapter: row.get(2)?,
            work_title: row.get(3)?,
            used_coins: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Coins spent on each work's episodes between `start` and `end`, both
/// dates inclusive. Works with no spend in the window are omitted.
pub fn revenue_by_works(
    conn: &Connection,
    work_ids: &[i64],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<WorkRevenue>, CoreError> {
    if work_ids.is_empty() {
        return Ok(vec![]);
    }
    if end < start {
        return Err(CoreError::InvalidInput(format!("end date {} precedes start date {}", end, start)));
    }
    let end_exclusive = end
        .succ_opt()
        .ok_or_else(|| CoreError::InvalidInput(format!("end date {} out of range", end)))?;

    let placeholders: Vec<_> = work_ids.iter().map(|_| "?").collect();
    let sql = format!(
        r#"
        SELECT w.id, w.title, w.author_id, SUM(l.amount)
        FROM coin_ledger l
        INNER JOIN episodes e ON e.id = l.episode_id
        INNER JOIN works w ON w.id = e.work_id
        WHERE w.id IN ({}) AND l.created_at >= ? AND l.created_at < ?
        GROUP BY w.id, w.title, w.author_id
        ORDER BY w.id
        "#,
        placeholders.join(", ")
    );

    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];
    for id in work_ids {
        params.push(Box::new(*id));
    }
    params.push(Box::new(day_start(start)));
    params.push(Box::new(day_start(end_exclusive)));
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok(WorkRevenue {
            work_id: row.get(0)?,
            work_title: row.get(1)?,
            author_id: row.get(2)?,
            total_coins: row.get(3)?,
            start_date: start,
            end_date: end,
        })
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::episodes::{create_episode, create_work, EpisodeStatus, NewEpisode};
    use crate::db::members::create_member;
    use crate::db::schema::init_schema;
    use chrono::TimeZone;

    fn setup() -> (Connection, i64, i64) {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        create_member(&conn, "reader", 100).unwrap();
        let work = create_work(&conn, "Iron Lotus", "author-1").unwrap();
        let episode = create_episode(&conn, &NewEpisode {
            work_id: work.id,
            chapter: 1,
            title: "Opening".into(),
            content: "...".into(),
            status: EpisodeStatus::Active,
            coin_cost: 10,
        }).unwrap();
        (conn, work.id, episode.id)
    }

    #[test]
    fn test_append_then_has_entry() {
        let (conn, _, episode_id) = setup();
        assert!(!has_entry(&conn, "reader", episode_id).unwrap());

        let entry = append_entry(&conn, "reader", episode_id, 10, Utc::now()).unwrap();
        assert_eq!(entry.amount, 10);
        assert!(has_entry(&conn, "reader", episode_id).unwrap());
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let (conn, _, episode_id) = setup();
        append_entry(&conn, "reader", episode_id, 10, Utc::now()).unwrap();
        let second = append_entry(&conn, "reader", episode_id, 10, Utc::now());
        assert!(matches!(second, Err(CoreError::StorageFailure(_))));
        assert_eq!(entries_for_member(&conn, "reader").unwrap().len(), 1);
    }

    #[test]
    fn test_zero_amount_rejected() {
        let (conn, _, episode_id) = setup();
        assert!(matches!(
            append_entry(&conn, "reader", episode_id, 0, Utc::now()),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_history_joins_titles() {
        let (conn, _, episode_id) = setup();
        append_entry(&conn, "reader", episode_id, 10, Utc::now()).unwrap();

        let history = coin_history(&conn, "reader", 10, 0).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].episode_title, "Opening");
        assert_eq!(history[0].work_title, "Iron Lotus");
        assert_eq!(history[0].used_coins, 10);
        assert!(coin_history(&conn, "reader", 10, 1).unwrap().is_empty());
    }

    #[test]
    fn test_revenue_window_is_inclusive_of_end_date() {
        let (conn, work_id, episode_id) = setup();
        create_member(&conn, "late", 100).unwrap();
        create_member(&conn, "outside", 100).unwrap();

        let in_window = Utc.with_ymd_and_hms(2024, 8, 1, 9, 0, 0).unwrap();
        let last_day = Utc.with_ymd_and_hms(2024, 8, 31, 23, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        append_entry(&conn, "reader", episode_id, 10, in_window).unwrap();
        append_entry(&conn, "late", episode_id, 10, last_day).unwrap();
        append_entry(&conn, "outside", episode_id, 10, after).unwrap();

        let start = NaiveDate::from_ymd_opt(2024, 8, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 8, 31).unwrap();
        let revenue = revenue_by_works(&conn, &[work_id], start, end).unwrap();

        assert_eq!(revenue.len(), 1);
        assert_eq!(revenue[0].total_coins, 20);
        assert_eq!(revenue[0].author_id, "author-1");
        assert!(revenue_by_works(&conn, &[work_id], end, start).is_err());
    }
}

//! Persisted ranking rows

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};

use super::{format_date, ledger::timestamp};
use crate::error::CoreError;
use crate::ranking::{RankingEntry, RankingPeriod};

/// Replace every row for (date, period) with `entries`.
///
/// Runs on the caller's connection; wrap it in a transaction so readers
/// never see a half-replaced ranking.
pub fn replace_rankings(
    conn: &Connection,
    period: RankingPeriod,
    ranking_date: NaiveDate,
    entries: &[RankingEntry],
    at: DateTime<Utc>,
) -> Result<usize, CoreError> {
    let date = format_date(ranking_date);
    let period_name = period.to_string();
    let updated_at = timestamp(at);

    let removed = conn.execute(
        "DELETE FROM work_rankings WHERE ranking_date = ? AND ranking_period = ?",
        params![date, period_name],
    )?;

    let mut stmt = conn.prepare(
        r#"
        INSERT INTO work_rankings (work_id, ranking_date, ranking_period, rank, score, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )?;
    for entry in entries {
        stmt.execute(params![
            entry.work_id,
            date,
            period_name,
            entry.rank as i64,
            entry.score,
            updated_at,
        ])?;
    }

    Ok(removed)
}

/// Persisted ranking for (date, period), ordered by rank
pub fn list_rankings(
    conn: &Connection,
    period: RankingPeriod,
    ranking_date: NaiveDate,
) -> Result<Vec<RankingEntry>, CoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT work_id, rank, score FROM work_rankings
        WHERE ranking_date = ? AND ranking_period = ?
        ORDER BY rank
        "#,
    )?;

    let rows = stmt.query_map(params![format_date(ranking_date), period.to_string()], |row| {
        Ok(RankingEntry {
            work_id: row.get(0)?,
            ranking_date,
            period,
            rank: row.get::<_, i64>(1)? as u32,
            score: row.get(2)?,
        })
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::episodes::create_work;
    use crate::db::schema::init_schema;

    fn entry(work_id: i64, rank: u32, score: i64, date: NaiveDate) -> RankingEntry {
        RankingEntry { work_id, ranking_date: date, period: RankingPeriod::Daily, rank, score }
    }

    #[test]
    fn test_replace_drops_stale_rows() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let a = create_work(&conn, "A", "x").unwrap().id;
        let b = create_work(&conn, "B", "x").unwrap().id;
        let date = NaiveDate::from_ymd_opt(2024, 8, 8).unwrap();

        replace_rankings(&conn, RankingPeriod::Daily, date, &[entry(a, 1, 40, date), entry(b, 2, 10, date)], Utc::now()).unwrap();
        let removed = replace_rankings(&conn, RankingPeriod::Daily, date, &[entry(b, 1, 50, date)], Utc::now()).unwrap();
        assert_eq!(removed, 2);

        let stored = list_rankings(&conn, RankingPeriod::Daily, date).unwrap();
        assert_eq!(stored, vec![entry(b, 1, 50, date)]);
        assert!(list_rankings(&conn, RankingPeriod::Weekly, date).unwrap().is_empty());
    }
}

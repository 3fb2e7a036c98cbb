//! Member balance operations

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::CoreError;

/// Member row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub provider_id: String,
    pub coin_balance: i64,
    pub created_at: String,
}

impl Member {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            provider_id: row.get("provider_id")?,
            coin_balance: row.get("coin_balance")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Create a member with an opening balance
pub fn create_member(conn: &Connection, provider_id: &str, coin_balance: i64) -> Result<Member, CoreError> {
    if provider_id.is_empty() {
        return Err(CoreError::InvalidInput("provider_id is required".into()));
    }
    if coin_balance < 0 {
        return Err(CoreError::InvalidInput("coin_balance must be >= 0".into()));
    }

    conn.execute(
        "INSERT INTO members (provider_id, coin_balance) VALUES (?, ?)",
        params![provider_id, coin_balance],
    )?;

    get_member(conn, provider_id)?
        .ok_or_else(|| CoreError::Internal("Member not found after insert".to_string()))
}

/// Get member by provider id
pub fn get_member(conn: &Connection, provider_id: &str) -> Result<Option<Member>, CoreError> {
    Ok(conn
        .query_row(
            "SELECT * FROM members WHERE provider_id = ?",
            params![provider_id],
            |row| Member::from_row(row),
        )
        .optional()?)
}

/// Overwrite a member's balance.
///
/// Callers doing read-modify-write must hold a write transaction across
/// the read and this call.
pub fn set_balance(conn: &Connection, provider_id: &str, new_balance: i64) -> Result<(), CoreError> {
    if new_balance < 0 {
        return Err(CoreError::InvalidInput(format!(
            "balance for {} would become negative ({})",
            provider_id, new_balance
        )));
    }

    let changes = conn.execute(
        "UPDATE members SET coin_balance = ? WHERE provider_id = ?",
        params![new_balance, provider_id],
    )?;

    if changes == 0 {
        return Err(CoreError::NotFound(format!("member {}", provider_id)));
    }
    Ok(())
}

/// Add coins to a member in a single statement, returning the new balance
pub fn add_coins(conn: &Connection, provider_id: &str, amount: i64) -> Result<i64, CoreError> {
    if amount <= 0 {
        return Err(CoreError::InvalidInput("amount must be > 0".into()));
    }

    let balance: Option<i64> = conn
        .query_row(
            "UPDATE members SET coin_balance = coin_balance + ? WHERE provider_id = ? RETURNING coin_balance",
            params![amount, provider_id],
            |row| row.get(0),
        )
        .optional()?;

    balance.ok_or_else(|| CoreError::NotFound(format!("member {}", provider_id)))
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

    #[test]
    fn test_create_and_get() {
        let conn = conn();
        let member = create_member(&conn, "naver_123", 15).unwrap();
        assert_eq!(member.coin_balance, 15);
        assert_eq!(get_member(&conn, "naver_123").unwrap(), Some(member));
        assert!(get_member(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_set_balance_rejects_negative() {
        let conn = conn();
        create_member(&conn, "m", 5).unwrap();
        assert!(matches!(set_balance(&conn, "m", -1), Err(CoreError::InvalidInput(_))));
        assert_eq!(get_member(&conn, "m").unwrap().unwrap().coin_balance, 5);
    }

    #[test]
    fn test_set_balance_unknown_member() {
        let conn = conn();
        assert!(matches!(set_balance(&conn, "ghost", 1), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_add_coins() {
        let conn = conn();
        create_member(&conn, "m", 5).unwrap();
        assert_eq!(add_coins(&conn, "m", 20).unwrap(), 25);
        assert!(matches!(add_coins(&conn, "m", 0), Err(CoreError::InvalidInput(_))));
        assert!(matches!(add_coins(&conn, "ghost", 3), Err(CoreError::NotFound(_))));
    }
}

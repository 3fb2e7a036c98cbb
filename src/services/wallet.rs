//! Wallet service - balances, top-ups, purchase history and settlement

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use crate::db::{self, episodes, ledger, members, recent_reads, CoreDb};
use crate::error::{CoreError, Result};

use super::events::{CoreEvent, EventBus};

pub struct WalletService {
    db: Arc<CoreDb>,
    events: Arc<EventBus>,
}

impl WalletService {
    pub fn new(db: Arc<CoreDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn balance(&self, member_id: &str) -> Result<i64> {
        self.db
            .with_conn(|conn| members::get_member(conn, member_id))?
            .map(|m| m.coin_balance)
            .ok_or_else(|| CoreError::NotFound(format!("member {}", member_id)))
    }

    /// Purchases newest first, one page at a time
    pub fn coin_history(&self, member_id: &str, limit: u32, offset: u32) -> Result<Vec<db::CoinHistoryRow>> {
        if limit == 0 {
            return Err(CoreError::InvalidInput("limit must be > 0".into()));
        }
        self.db.with_conn(|conn| ledger::coin_history(conn, member_id, limit, offset))
    }

    /// Coins earned per work between two dates, both inclusive
    pub fn revenue(&self, work_ids: &[i64], start: NaiveDate, end: NaiveDate) -> Result<Vec<db::WorkRevenue>> {
        self.db.with_conn(|conn| ledger::revenue_by_works(conn, work_ids, start, end))
    }

    pub fn recent_reads(&self, member_id: &str, limit: u32) -> Result<Vec<db::RecentRead>> {
        self.db.with_conn(|conn| recent_reads::list(conn, member_id, limit))
    }

    /// Cumulative reconciled views over a work's episodes
    pub fn work_total_views(&self, work_id: i64) -> Result<i64> {
        self.db.with_conn(|conn| {
            episodes::get_work(conn, work_id)?
                .ok_or_else(|| CoreError::NotFound(format!("work {}", work_id)))?;
            episodes::work_total_views(conn, work_id)
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    pub fn register_member(&self, member_id: &str, opening_balance: i64) -> Result<db::Member> {
        self.db.with_conn_mut(|conn| members::create_member(conn, member_id, opening_balance))
    }

    /// Top up a member's balance, returning the new balance
    pub fn credit_coins(&self, member_id: &str, amount: i64) -> Result<i64> {
        let balance = self.db.with_conn_mut(|conn| members::add_coins(conn, member_id, amount))?;

        info!(member_id = %member_id, amount, balance, "Coins credited");
        self.events.emit(CoreEvent::CoinsCredited {
            member_id: member_id.to_string(),
            amount,
            balance,
        });

        Ok(balance)
    }
}

//! Access gate - opens an episode for a reader
//!
//! Free episodes are served to anyone. Paid episodes need an authenticated
//! member who either already owns the episode (a ledger entry exists) or
//! can pay for it now. The ownership check, the debit and the ledger append
//! run inside one `BEGIN IMMEDIATE` transaction, so concurrent opens of the
//! same episode by the same member charge at most once.
//!
//! Every successful open bumps the view buffer. Counter failures are logged
//! and never fail the read.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::TransactionBehavior;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::buffer::CounterStore;
use crate::db::{episodes, ledger, members, recent_reads, CoreDb, Episode};
use crate::error::{CoreError, Result};

use super::events::{CoreEvent, EventBus};

/// Who is asking to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    Member(String),
}

impl Viewer {
    pub fn member(id: impl Into<String>) -> Self {
        Viewer::Member(id.into())
    }

    pub fn member_id(&self) -> Option<&str> {
        match self {
            Viewer::Anonymous => None,
            Viewer::Member(id) => Some(id.as_str()),
        }
    }
}

impl From<Option<String>> for Viewer {
    fn from(id: Option<String>) -> Self {
        match id {
            Some(id) if !id.is_empty() => Viewer::Member(id),
            _ => Viewer::Anonymous,
        }
    }
}

/// What a reader gets back: the text, never pricing or ledger state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentView {
    pub episode_id: i64,
    pub work_id: i64,
    pub chapter: i64,
    pub title: String,
    pub content: String,
}

impl From<Episode> for ContentView {
    fn from(e: Episode) -> Self {
        Self {
            episode_id: e.id,
            work_id: e.work_id,
            chapter: e.chapter,
            title: e.title,
            content: e.content,
        }
    }
}

/// Outcome of the paid-access transaction
enum Entitlement {
    AlreadyOwned,
    Charged { coins: i64, balance: i64 },
}

pub struct AccessGate {
    db: Arc<CoreDb>,
    buffer: Arc<dyn CounterStore>,
    events: Arc<EventBus>,
}

impl AccessGate {
    pub fn new(db: Arc<CoreDb>, buffer: Arc<dyn CounterStore>, events: Arc<EventBus>) -> Self {
        Self { db, buffer, events }
    }

    /// Open an episode for a viewer, charging on first access to paid content
    pub fn open_episode(&self, viewer: &Viewer, episode_id: i64) -> Result<ContentView> {
        let episode = self
            .db
            .with_conn(|conn| episodes::get_episode(conn, episode_id))?
            .ok_or_else(|| CoreError::NotFound(format!("episode {}", episode_id)))?;

        self.grant(viewer, &episode)?;
        self.count_view(episode.id);

        Ok(episode.into())
    }

    /// Open an already resolved episode
    pub(crate) fn open_resolved(&self, viewer: &Viewer, episode: Episode) -> Result<ContentView> {
        self.grant(viewer, &episode)?;
        self.count_view(episode.id);
        Ok(episode.into())
    }

    fn grant(&self, viewer: &Viewer, episode: &Episode) -> Result<()> {
        if episode.is_free() {
            if let Viewer::Member(member_id) = viewer {
                self.db.with_conn(|conn| {
                    require_member(conn, member_id)?;
                    recent_reads::record(conn, member_id, episode.work_id, episode.id, Utc::now())
                })?;
            }
            return Ok(());
        }

        let member_id = match viewer {
            Viewer::Anonymous => {
                debug!(episode_id = episode.id, "Anonymous viewer refused paid episode");
                return Err(CoreError::AuthenticationRequired { episode_id: episode.id });
            }
            Viewer::Member(id) => id.as_str(),
        };

        let outcome = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let outcome = charge_once(&tx, member_id, episode)?;
            recent_reads::record(&tx, member_id, episode.work_id, episode.id, Utc::now())?;
            tx.commit()?;
            Ok(outcome)
        })?;

        match outcome {
            Entitlement::AlreadyOwned => {
                debug!(member_id = %member_id, episode_id = episode.id, "Episode already owned");
            }
            Entitlement::Charged { coins, balance } => {
                info!(member_id = %member_id, episode_id = episode.id, coins, balance, "Charged for episode");
                self.events.emit(CoreEvent::EpisodeCharged {
                    member_id: member_id.to_string(),
                    episode_id: episode.id,
                    coins,
                    balance,
                });
            }
        }
        Ok(())
    }

    fn count_view(&self, episode_id: i64) {
        if let Err(e) = self.buffer.increment(episode_id) {
            warn!(episode_id, error = %e, "Failed to buffer view");
        }
    }
}

fn require_member(conn: &rusqlite::Connection, member_id: &str) -> Result<members::Member> {
    members::get_member(conn, member_id)?
        .ok_or_else(|| CoreError::NotFound(format!("member {}", member_id)))
}

/// Check ownership and, if absent, debit and append the ledger entry.
/// Must run inside a write transaction.
fn charge_once(conn: &rusqlite::Connection, member_id: &str, episode: &Episode) -> Result<Entitlement> {
    let member = require_member(conn, member_id)?;

    if ledger::has_entry(conn, member_id, episode.id)? {
        return Ok(Entitlement::AlreadyOwned);
    }

    if member.coin_balance < episode.coin_cost {
        return Err(CoreError::InsufficientCoins {
            episode_id: episode.id,
            title: episode.title.clone(),
            coin_cost: episode.coin_cost,
            balance: member.coin_balance,
        });
    }

    let balance = member.coin_balance - episode.coin_cost;
    members::set_balance(conn, member_id, balance)?;
    ledger::append_entry(conn, member_id, episode.id, episode.coin_cost, Utc::now())?;

    Ok(Entitlement::Charged { coins: episode.coin_cost, balance })
}

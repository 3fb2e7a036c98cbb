//! Event system for ledger and counter operations
//!
//! Provides an event bus for notifying listeners about charges, top-ups,
//! reconciliation passes and ranking publications. Useful for:
//! - Audit logging
//! - Read-cache invalidation in front ends

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ranking::RankingPeriod;

/// Events emitted by the core
#[derive(Debug, Clone)]
pub enum CoreEvent {
    // Ledger events
    EpisodeCharged {
        member_id: String,
        episode_id: i64,
        coins: i64,
        balance: i64,
    },
    CoinsCredited {
        member_id: String,
        amount: i64,
        balance: i64,
    },

    // Counter events
    ViewsReconciled {
        view_date: NaiveDate,
        episodes: usize,
        views: u64,
    },
    ReconciliationGap {
        episode_id: i64,
        pending: u64,
    },

    // Ranking events
    RankingPublished {
        run_id: Uuid,
        period: RankingPeriod,
        ranking_date: NaiveDate,
        entries: usize,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &CoreEvent);
}

/// Event bus for broadcasting core events
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: CoreEvent) {
        trace!(event = ?event, "Emitting core event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &CoreEvent) {
        match event {
            CoreEvent::EpisodeCharged { member_id, episode_id, coins, balance } => {
                info!(member_id = %member_id, episode_id, coins, balance, "Episode charged");
            }
            CoreEvent::CoinsCredited { member_id, amount, balance } => {
                info!(member_id = %member_id, amount, balance, "Coins credited");
            }
            CoreEvent::ReconciliationGap { episode_id, pending } => {
                warn!(episode_id, pending, "Buffered views for unknown episode dropped");
            }
            CoreEvent::RankingPublished { run_id, period, ranking_date, entries } => {
                debug!(run_id = %run_id, period = %period, date = %ranking_date, entries, "Ranking published");
            }
            _ => {
                trace!(event = ?event, "Core event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

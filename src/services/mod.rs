//! Service layer for chapterhouse
//!
//! Services hold the business rules between callers (request handlers,
//! the scheduler, the admin CLI) and the repository functions in `db`.
//!
//! ## Architecture
//!
//! ```text
//! Request handlers / scheduler
//!     ↓
//! Services (access gate, navigation, wallet, reconciler, rankings)
//!     ↓
//! Repository layer (db/*.rs)      View buffer / ranking cache
//!     ↓
//! SQLite database
//! ```

pub mod events;
pub mod access_gate;
pub mod navigation;
pub mod wallet;

// Re-exports
pub use events::{CoreEvent, EventBus, EventListener};
pub use access_gate::{AccessGate, ContentView, Viewer};
pub use navigation::{Direction, Navigator};
pub use wallet::WalletService;

use std::sync::Arc;

use crate::buffer::{CounterStore, ViewBuffer};
use crate::config::Config;
use crate::db::CoreDb;
use crate::error::Result;
use crate::ranking::{RankingCache, RankingEngine, SnapshotCache};
use crate::reconciler::ViewReconciler;

/// Service container wiring every component over one database
pub struct Services {
    pub db: Arc<CoreDb>,
    pub buffer: Arc<dyn CounterStore>,
    pub gate: Arc<AccessGate>,
    pub navigator: Arc<Navigator>,
    pub wallet: Arc<WalletService>,
    pub reconciler: Arc<ViewReconciler>,
    pub rankings: Arc<RankingEngine>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with the in-process view buffer and ranking cache.
    /// Fails if the config's weight schedules are invalid.
    pub fn new(db: Arc<CoreDb>, config: &Config) -> Result<Self> {
        Self::with_stores(db, config, Arc::new(ViewBuffer::new()), Arc::new(RankingCache::new()))
    }

    /// Create all services over externally provided fast stores
    pub fn with_stores(
        db: Arc<CoreDb>,
        config: &Config,
        buffer: Arc<dyn CounterStore>,
        cache: Arc<dyn SnapshotCache>,
    ) -> Result<Self> {
        let events = Arc::new(EventBus::with_capacity(config.event_capacity));
        let gate = Arc::new(AccessGate::new(db.clone(), buffer.clone(), events.clone()));

        let rankings = Arc::new(RankingEngine::new(db.clone(), cache, config, events.clone())?);

        Ok(Self {
            navigator: Arc::new(Navigator::new(db.clone(), gate.clone())),
            wallet: Arc::new(WalletService::new(db.clone(), events.clone())),
            reconciler: Arc::new(ViewReconciler::new(db.clone(), buffer.clone(), events.clone())),
            rankings,
            gate,
            buffer,
            db,
            events,
        })
    }
}

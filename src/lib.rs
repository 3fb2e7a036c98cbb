//! Chapterhouse - entitlement, view reconciliation and ranking core for a
//! serial-fiction platform
//!
//! ## Components
//!
//! - **Access gate**: opens an episode for a reader. Paid episodes are
//!   charged once per member through the append-only coin ledger; a ledger
//!   row is permanent proof of ownership.
//! - **View buffer**: every open bumps a fast in-memory counter instead of
//!   writing to the database.
//! - **Reconciler**: periodically drains the buffer into per-day counters
//!   and each episode's cumulative total, in one transaction.
//! - **Ranking engine**: scores works from recent per-day totals with
//!   recency weights, persists the ranks and publishes the run to a cache.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/chapterhouse/
//! ├── chapterhouse.db        # SQLite (WAL) database
//! └── config.toml            # Configuration
//! ```
//!
//! Scheduling is left to the host: call [`ViewReconciler::flush`] and
//! [`RankingEngine::compute_ranking`] on a timer. Both refuse to overlap
//! with a run of the same job.

pub mod error;
pub mod config;
pub mod db;
pub mod buffer;
pub mod ranking;
pub mod reconciler;
pub mod services;

// Re-exports
pub use error::{CoreError, Result};
pub use config::{Config, WeightSchedule, WeightStep};
pub use db::CoreDb;
pub use buffer::{CounterStore, ViewBuffer};
pub use ranking::{RankingCache, RankingEngine, RankingEntry, RankingPeriod, RankingSnapshot, SnapshotCache};
pub use reconciler::{FlushReport, ReconciliationGap, ViewReconciler};
pub use services::{
    AccessGate, ContentView, CoreEvent, Direction, EventBus, Navigator, Services, Viewer, WalletService,
};

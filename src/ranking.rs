//! Ranking engine
//!
//! Scores each work from its recent per-day view totals with a recency
//! weighted step function, orders works by score, persists the ranked rows
//! for (date, period) and then publishes the run to a read cache.
//!
//! ## Ordering
//!
//! Scores sort descending; equal scores fall back to work id ascending so
//! every run over the same data yields the same ranks.
//!
//! ## Failure
//!
//! A run that fails while fetching, scoring or persisting publishes
//! nothing. The previously published snapshot stays current.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::{Config, WeightSchedule};
use crate::db::{rankings, view_counts, CoreDb, WorkDayViews};
use crate::error::{CoreError, Result};
use crate::reconciler::JobGuard;
use crate::services::events::{CoreEvent, EventBus};

// =============================================================================
// Periods and entries
// =============================================================================

/// Named cadence a ranking is computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl RankingPeriod {
    pub const ALL: [RankingPeriod; 3] = [RankingPeriod::Daily, RankingPeriod::Weekly, RankingPeriod::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            RankingPeriod::Daily => "daily",
            RankingPeriod::Weekly => "weekly",
            RankingPeriod::Monthly => "monthly",
        }
    }

    /// Name of this period's ranking job
    pub fn job_name(&self) -> &'static str {
        match self {
            RankingPeriod::Daily => "daily ranking",
            RankingPeriod::Weekly => "weekly ranking",
            RankingPeriod::Monthly => "monthly ranking",
        }
    }
}

impl fmt::Display for RankingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RankingPeriod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(RankingPeriod::Daily),
            "weekly" => Ok(RankingPeriod::Weekly),
            "monthly" => Ok(RankingPeriod::Monthly),
            other => Err(CoreError::InvalidInput(format!("unknown ranking period '{}'", other))),
        }
    }
}

/// One work's place in a ranking run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankingEntry {
    pub work_id: i64,
    pub ranking_date: NaiveDate,
    pub period: RankingPeriod,
    pub rank: u32,
    pub score: i64,
}

/// A complete ranking run as published to readers
#[derive(Debug, Clone, Serialize)]
pub struct RankingSnapshot {
    pub run_id: Uuid,
    pub period: RankingPeriod,
    pub ranking_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<RankingEntry>,
}

// =============================================================================
// Read cache
// =============================================================================

/// Read-path cache holding the latest snapshot per period
pub trait SnapshotCache: Send + Sync {
    /// Replace the snapshot for the snapshot's period
    fn publish(&self, snapshot: RankingSnapshot) -> Result<()>;

    fn latest(&self, period: RankingPeriod) -> Option<Arc<RankingSnapshot>>;
}

/// In-process snapshot cache.
///
/// Snapshots are swapped whole behind an `Arc`, so a reader holds either
/// the previous run or the new one, never a mix.
#[derive(Default)]
pub struct RankingCache {
    snapshots: DashMap<RankingPeriod, Arc<RankingSnapshot>>,
}

impl RankingCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotCache for RankingCache {
    fn publish(&self, snapshot: RankingSnapshot) -> Result<()> {
        let period = snapshot.period;
        self.snapshots.insert(period, Arc::new(snapshot));
        Ok(())
    }

    fn latest(&self, period: RankingPeriod) -> Option<Arc<RankingSnapshot>> {
        self.snapshots.get(&period).map(|s| Arc::clone(s.value()))
    }
}

// =============================================================================
// Scoring
// =============================================================================

/// Calendar dates in the window, most recent first
pub fn contributing_dates(as_of: NaiveDate, schedule: &WeightSchedule) -> Result<Vec<NaiveDate>> {
    (0..schedule.window_days())
        .map(|offset| {
            as_of
                .checked_sub_days(Days::new(offset as u64))
                .ok_or_else(|| CoreError::InvalidInput(format!("ranking window before {} is out of range", as_of)))
        })
        .collect()
}

/// Weighted score per work. Rows dated outside the window are ignored.
pub fn score_works(totals: &[WorkDayViews], as_of: NaiveDate, schedule: &WeightSchedule) -> HashMap<i64, i64> {
    let mut scores: HashMap<i64, i64> = HashMap::new();
    for row in totals {
        let offset = (as_of - row.view_date).num_days();
        if offset < 0 {
            continue;
        }
        if let Some(weight) = schedule.weight_for_offset(offset as u32) {
            *scores.entry(row.work_id).or_insert(0) += row.views * weight as i64;
        }
    }
    scores
}

/// Order scores descending (ties by work id) and number them 1..N
pub fn assign_ranks(scores: HashMap<i64, i64>, ranking_date: NaiveDate, period: RankingPeriod) -> Vec<RankingEntry> {
    let mut ordered: Vec<(i64, i64)> = scores.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    ordered
        .into_iter()
        .enumerate()
        .map(|(i, (work_id, score))| RankingEntry {
            work_id,
            ranking_date,
            period,
            rank: i as u32 + 1,
            score,
        })
        .collect()
}

// =============================================================================
// Engine
// =============================================================================

/// Computes, persists and publishes rankings
pub struct RankingEngine {
    db: Arc<CoreDb>,
    cache: Arc<dyn SnapshotCache>,
    schedules: HashMap<RankingPeriod, WeightSchedule>,
    events: Arc<EventBus>,
    /// One single-flight flag per period; periods run independently
    running: HashMap<RankingPeriod, AtomicBool>,
}

impl RankingEngine {
    /// Create an engine, rejecting invalid weight schedules
    pub fn new(
        db: Arc<CoreDb>,
        cache: Arc<dyn SnapshotCache>,
        config: &Config,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        config.validate()?;

        let schedules = RankingPeriod::ALL
            .iter()
            .map(|p| (*p, config.schedule(*p).clone()))
            .collect();
        let running = RankingPeriod::ALL
            .iter()
            .map(|p| (*p, AtomicBool::new(false)))
            .collect();

        Ok(Self {
            db,
            cache,
            schedules,
            events,
            running,
        })
    }

    fn running_flag(&self, period: RankingPeriod) -> Result<&AtomicBool> {
        self.running
            .get(&period)
            .ok_or_else(|| CoreError::Internal(format!("no job flag for {}", period)))
    }

    fn schedule(&self, period: RankingPeriod) -> Result<&WeightSchedule> {
        self.schedules
            .get(&period)
            .ok_or_else(|| CoreError::Config(format!("no weight schedule for {}", period)))
    }

    /// Run one ranking for `period` as of `as_of`.
    ///
    /// Fails with `JobInProgress` while another run for the same period is
    /// active on this engine. Different periods may overlap.
    pub fn compute_ranking(&self, period: RankingPeriod, as_of: NaiveDate) -> Result<Vec<RankingEntry>> {
        let _guard = JobGuard::acquire(self.running_flag(period)?, period.job_name())?;
        let run_id = Uuid::new_v4();

        match self.run(run_id, period, as_of) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                error!(run_id = %run_id, period = %period, date = %as_of, error = %e, "Ranking run failed; previous snapshot kept");
                Err(e)
            }
        }
    }

    fn run(&self, run_id: Uuid, period: RankingPeriod, as_of: NaiveDate) -> Result<Vec<RankingEntry>> {
        let schedule = self.schedule(period)?;
        let dates = contributing_dates(as_of, schedule)?;

        let totals = self.db.with_conn(|conn| view_counts::work_totals_for_dates(conn, &dates))?;
        debug!(run_id = %run_id, dates = dates.len(), rows = totals.len(), "Fetched daily work totals");

        let entries = assign_ranks(score_works(&totals, as_of, schedule), as_of, period);
        let generated_at = Utc::now();

        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            rankings::replace_rankings(&tx, period, as_of, &entries, generated_at)?;
            tx.commit()?;
            Ok(())
        })?;

        self.cache.publish(RankingSnapshot {
            run_id,
            period,
            ranking_date: as_of,
            generated_at,
            entries: entries.clone(),
        })?;

        info!(run_id = %run_id, period = %period, date = %as_of, works = entries.len(), "Ranking published");
        self.events.emit(CoreEvent::RankingPublished {
            run_id,
            period,
            ranking_date: as_of,
            entries: entries.len(),
        });

        Ok(entries)
    }

    /// Persisted ranking rows for (period, date), by rank
    pub fn rankings(&self, period: RankingPeriod, ranking_date: NaiveDate) -> Result<Vec<RankingEntry>> {
        self.db.with_conn(|conn| rankings::list_rankings(conn, period, ranking_date))
    }

    /// Latest published snapshot for a period
    pub fn latest(&self, period: RankingPeriod) -> Option<Arc<RankingSnapshot>> {
        self.cache.latest(period)
    }
}

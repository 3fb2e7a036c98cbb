//! View reconciler: drains the view buffer into durable counters
//!
//! A flush reads a snapshot of the buffer, resolves the episodes in one
//! bulk lookup, then in a single transaction adds each pending count to the
//! episode's cumulative total and to its counter row for the flush date.
//! The snapshotted keys are removed from the buffer only after commit.
//!
//! Counts for episode ids that no longer exist are reported as gaps and
//! discarded with the rest of the snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::buffer::CounterStore;
use crate::db::{episodes, view_counts, CoreDb};
use crate::error::{CoreError, Result};
use crate::services::events::{CoreEvent, EventBus};

/// Single-flight marker for a background job.
///
/// Holding the guard keeps the flag set; dropping it clears the flag.
pub(crate) struct JobGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> JobGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool, job: &'static str) -> Result<Self> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(job, "Job already running, refusing to start another");
            return Err(CoreError::JobInProgress(job));
        }
        Ok(Self { flag })
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Buffered views that referenced an unknown episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationGap {
    pub episode_id: i64,
    pub pending: u64,
}

/// Result of a flush
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushReport {
    /// Episodes whose counters were written
    pub episodes_updated: usize,
    /// Views added to durable counters
    pub views_applied: u64,
    pub gaps: Vec<ReconciliationGap>,
    /// Whether the snapshotted keys were removed from the buffer. When
    /// false the keys are held back and removed before the next flush
    /// applies anything.
    pub buffer_cleared: bool,
}

impl FlushReport {
    pub fn is_noop(&self) -> bool {
        self.episodes_updated == 0 && self.gaps.is_empty()
    }
}

pub struct ViewReconciler {
    db: Arc<CoreDb>,
    buffer: Arc<dyn CounterStore>,
    events: Arc<EventBus>,
    running: AtomicBool,
    /// Keys already persisted whose removal from the buffer failed
    uncleared: Mutex<Vec<i64>>,
}

impl ViewReconciler {
    pub fn new(db: Arc<CoreDb>, buffer: Arc<dyn CounterStore>, events: Arc<EventBus>) -> Self {
        Self {
            db,
            buffer,
            events,
            running: AtomicBool::new(false),
            uncleared: Mutex::new(Vec::new()),
        }
    }

    /// Flush with today's local date
    pub fn flush_now(&self) -> Result<FlushReport> {
        self.flush(Local::now().date_naive())
    }

    /// Drain the buffer into durable counters dated `today`.
    ///
    /// An empty buffer touches nothing. On any storage error the
    /// transaction rolls back and the buffer keeps its counts for the next
    /// run. A failed buffer clear after commit is reported in the result,
    /// not as an error; those keys are removed before the next flush reads
    /// the buffer, so committed counts are never applied twice.
    pub fn flush(&self, today: NaiveDate) -> Result<FlushReport> {
        let _guard = JobGuard::acquire(&self.running, "flush")?;

        self.clear_held_keys()?;

        let snapshot = self.buffer.snapshot()?;
        if snapshot.is_empty() {
            debug!("View buffer empty, nothing to flush");
            return Ok(FlushReport::default());
        }

        let mut report = self.apply(&snapshot, today).map_err(|e| {
            error!(error = %e, pending = snapshot.len(), "View flush failed; buffer left intact");
            e
        })?;

        let keys: Vec<i64> = snapshot.keys().copied().collect();
        match self.buffer.remove_keys(&keys) {
            Ok(()) => report.buffer_cleared = true,
            Err(e) => {
                error!(error = %e, keys = keys.len(), "Failed to clear flushed keys; holding them for the next flush");
                self.held_keys()?.extend(keys);
            }
        }

        Ok(report)
    }

    fn held_keys(&self) -> Result<MutexGuard<'_, Vec<i64>>> {
        self.uncleared
            .lock()
            .map_err(|e| CoreError::Internal(format!("Lock poisoned: {}", e)))
    }

    /// Remove keys a previous flush persisted but could not clear. Until
    /// this succeeds no new snapshot is applied.
    fn clear_held_keys(&self) -> Result<()> {
        let mut held = self.held_keys()?;
        if held.is_empty() {
            return Ok(());
        }

        self.buffer.remove_keys(&held).map_err(|e| {
            error!(error = %e, keys = held.len(), "Buffer still refuses to clear flushed keys; skipping flush");
            e
        })?;
        info!(keys = held.len(), "Cleared keys held from a previous flush");
        held.clear();
        Ok(())
    }

    /// Persist counts a caller already drained from a buffer.
    ///
    /// Same durable semantics as [`flush`](Self::flush) without touching the
    /// buffer.
    pub fn apply_buffered_counts(&self, counts: &HashMap<i64, u64>, date: NaiveDate) -> Result<FlushReport> {
        let _guard = JobGuard::acquire(&self.running, "flush")?;
        if counts.is_empty() {
            return Ok(FlushReport::default());
        }
        self.apply(counts, date)
    }

    fn apply(&self, counts: &HashMap<i64, u64>, date: NaiveDate) -> Result<FlushReport> {
        let mut ids: Vec<i64> = counts.keys().copied().collect();
        ids.sort_unstable();

        let known = self.db.with_conn(|conn| episodes::get_episodes_by_ids(conn, &ids))?;

        let mut report = FlushReport::default();
        let mut resolved: Vec<(i64, i64)> = Vec::with_capacity(known.len());
        for id in ids {
            let pending = counts[&id];
            if pending == 0 {
                continue;
            }
            if !known.contains_key(&id) {
                report.gaps.push(ReconciliationGap { episode_id: id, pending });
                continue;
            }
            let delta = i64::try_from(pending)
                .map_err(|_| CoreError::InvalidInput(format!("pending count {} for episode {} overflows", pending, id)))?;
            resolved.push((id, delta));
            report.views_applied += pending;
        }

        if !resolved.is_empty() {
            self.db.with_conn_mut(|conn| {
                let tx = conn.transaction()?;
                for (id, delta) in &resolved {
                    episodes::add_total_views(&tx, *id, *delta)?;
                }
                for (id, delta) in &resolved {
                    view_counts::upsert_daily(&tx, *id, date, *delta)?;
                }
                tx.commit()?;
                Ok(())
            })?;
            report.episodes_updated = resolved.len();
        }

        // Gaps are reported once the batch is settled
        for gap in &report.gaps {
            warn!(episode_id = gap.episode_id, pending = gap.pending, "Reconciliation gap: buffered views for unknown episode");
            self.events.emit(CoreEvent::ReconciliationGap {
                episode_id: gap.episode_id,
                pending: gap.pending,
            });
        }

        if report.episodes_updated > 0 {
            info!(
                date = %date,
                episodes = report.episodes_updated,
                views = report.views_applied,
                gaps = report.gaps.len(),
                "Views reconciled"
            );
            self.events.emit(CoreEvent::ViewsReconciled {
                view_date: date,
                episodes: report.episodes_updated,
                views: report.views_applied,
            });
        }

        Ok(report)
    }
}

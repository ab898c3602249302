use crate::clock::Clock;
use crate::persist::JobStorage;
use crate::sim::jobs::{normalize_epoch_ms, seconds_to_ms, ActiveJob, JobTable, PersistedJob, RunningJob};
use crate::sim::store::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Jobs the server still runs that were already tracked locally.
    pub kept: usize,
    /// Jobs the server runs that this client did not know about.
    pub added: usize,
    /// Local jobs the server no longer runs.
    pub dropped: usize,
}

/// Brings the job table back after a restart and keeps it aligned with
/// the server's running-jobs list.
pub struct JobRehydrator {
    store: Arc<JobStore>,
    clock: Arc<dyn Clock>,
}

impl JobRehydrator {
    pub fn new(store: Arc<JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Loads whatever was persisted and builds the store from it. A broken
    /// save is logged and replaced by an empty table.
    pub fn restore(storage: Arc<dyn JobStorage>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        let persisted = match storage.load() {
            Ok(table) => table.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "failed to load persisted jobs; starting empty");
                Default::default()
            }
        };

        let mut table = JobTable::new();
        for (key, job) in persisted {
            match backfill(job, now) {
                Some(job) => {
                    table.insert(job.action_id.clone(), job);
                }
                None => debug!(key = %key, "dropping unusable persisted job"),
            }
        }
        info!(jobs = table.len(), "restored active jobs");

        let store = Arc::new(JobStore::with_table(storage, table));
        Self::new(store, clock)
    }

    pub fn store(&self) -> Arc<JobStore> {
        self.store.clone()
    }

    /// Replaces the table with the server's view. Local backoff state
    /// survives for jobs whose id did not change.
    pub fn reconcile(&self, running: &[RunningJob]) -> ReconcileSummary {
        let now = self.clock.now_ms();
        self.store.update(|table| {
            let mut next = JobTable::new();
            let mut summary = ReconcileSummary::default();
            for entry in running {
                let Some(mut job) = backfill(PersistedJob::from(entry), now) else {
                    debug!(action = %entry.action_id, "ignoring malformed running job");
                    continue;
                };
                if next.contains_key(&job.action_id) {
                    warn!(action = %job.action_id, "server reported the action twice; keeping the first");
                    continue;
                }
                match table.get(&job.action_id) {
                    Some(local) if local.job_id == job.job_id => {
                        job.next_check_ms = local.next_check_ms;
                        job.in_flight = local.in_flight;
                        summary.kept += 1;
                    }
                    _ => summary.added += 1,
                }
                next.insert(job.action_id.clone(), job);
            }
            summary.dropped = table
                .iter()
                .filter(|(action_id, local)| {
                    next.get(*action_id)
                        .is_none_or(|job| job.job_id != local.job_id)
                })
                .count();
            *table = next;
            info!(
                kept = summary.kept,
                added = summary.added,
                dropped = summary.dropped,
                "reconciled active jobs with server"
            );
            summary
        })
    }

    /// Persists the table on a fixed interval until the handle is aborted.
    pub fn spawn_autosave(&self, every: Duration) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                store.persist();
            }
        })
    }
}

/// Fills in whichever of start/end is missing from the other and the
/// duration. Entries without an action or job id are unusable.
pub fn backfill(job: PersistedJob, now_ms: i64) -> Option<ActiveJob> {
    if job.action_id.is_empty() || job.job_id.is_empty() {
        return None;
    }
    let duration_ms = job
        .duration_seconds
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
        .map(seconds_to_ms);
    let start = job.start_epoch_ms.map(normalize_epoch_ms);
    let end = job.end_epoch_ms.map(normalize_epoch_ms);

    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end.max(start)),
        (Some(start), None) => (start, start + duration_ms.unwrap_or(0)),
        (None, Some(end)) => (end - duration_ms.unwrap_or(0), end),
        (None, None) => (now_ms, now_ms + duration_ms.unwrap_or(0)),
    };
    let duration_seconds = match duration_ms {
        Some(_) => job.duration_seconds.unwrap_or_default(),
        None => (end - start) as f64 / 1000.0,
    };

    Some(ActiveJob {
        action_id: job.action_id,
        job_id: job.job_id,
        start_epoch_ms: start,
        end_epoch_ms: end,
        duration_seconds,
        next_check_ms: job.next_check_ms,
        in_flight: false,
    })
}

use crate::backend::{ActionBackend, BackendError, CompleteRequest, CompleteResponse};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::sim::resources::ResourceDelta;
use crate::sim::store::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickerTiming {
    pub interval: Duration,
    pub grace_ms: i64,
    pub soft_backoff_ms: i64,
    pub error_backoff_ms: i64,
}

impl Default for TickerTiming {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for TickerTiming {
    fn from(config: &EngineConfig) -> Self {
        Self {
            interval: config.tick_interval(),
            grace_ms: config.completion_grace_ms as i64,
            soft_backoff_ms: config.soft_backoff_ms as i64,
            error_backoff_ms: config.error_backoff_ms as i64,
        }
    }
}

/// What the ticker learned about a job, for whoever owns the inventory.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Completed {
        action_id: String,
        job_id: String,
        delta: ResourceDelta,
    },
    Deferred {
        action_id: String,
        job_id: String,
        retry_at_ms: i64,
    },
    Failed {
        action_id: String,
        job_id: String,
        error: String,
        retry_at_ms: i64,
    },
}

#[derive(Debug)]
struct Attempt {
    action_id: String,
    job_id: String,
    result: Result<CompleteResponse, BackendError>,
}

/// The single periodic process that drives every active job to completion.
pub struct JobTicker {
    store: Arc<JobStore>,
    backend: Arc<dyn ActionBackend>,
    clock: Arc<dyn Clock>,
    timing: TickerTiming,
    events: mpsc::UnboundedSender<JobEvent>,
    attempts: JoinSet<Attempt>,
}

impl JobTicker {
    pub fn new(
        store: Arc<JobStore>,
        backend: Arc<dyn ActionBackend>,
        clock: Arc<dyn Clock>,
        timing: TickerTiming,
        events: mpsc::UnboundedSender<JobEvent>,
    ) -> Self {
        Self {
            store,
            backend,
            clock,
            timing,
            events,
            attempts: JoinSet::new(),
        }
    }

    /// Starts a completion attempt for every due job that is neither in
    /// flight nor backing off. Returns how many attempts were started.
    pub fn tick(&mut self) -> usize {
        let now = self.clock.now_ms();
        let grace = self.timing.grace_ms;
        let due: Vec<(String, String)> = self
            .store
            .snapshot()
            .values()
            .filter(|job| job.ready_for_attempt(now, grace))
            .map(|job| (job.action_id.clone(), job.job_id.clone()))
            .collect();
        if due.is_empty() {
            return 0;
        }

        self.store.update(|table| {
            for (action_id, job_id) in &due {
                if let Some(job) = table.get_mut(action_id) {
                    if &job.job_id == job_id {
                        job.in_flight = true;
                    }
                }
            }
        });

        for (action_id, job_id) in &due {
            debug!(action = %action_id, job = %job_id, "attempting completion");
            let backend = self.backend.clone();
            let action_id = action_id.clone();
            let job_id = job_id.clone();
            self.attempts.spawn(async move {
                let result = backend
                    .complete(CompleteRequest {
                        job_id: job_id.clone(),
                    })
                    .await;
                Attempt {
                    action_id,
                    job_id,
                    result,
                }
            });
        }
        due.len()
    }

    /// Waits for every outstanding attempt and applies its outcome.
    pub async fn settle_pending(&mut self) {
        while let Some(joined) = self.attempts.join_next().await {
            self.handle_joined(joined);
        }
    }

    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(self.timing.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.tick();
                }
                Some(joined) = self.attempts.join_next(), if !self.attempts.is_empty() => {
                    self.handle_joined(joined);
                }
            }
        }

        self.attempts.abort_all();
        // aborted attempts must not leave jobs stuck as in-flight
        self.store.update(|table| {
            for job in table.values_mut() {
                job.in_flight = false;
            }
        });
        debug!("job ticker stopped");
    }

    pub fn spawn(self) -> TickerHandle {
        let (shutdown, signal) = oneshot::channel();
        let join = tokio::spawn(self.run(signal));
        TickerHandle { shutdown, join }
    }

    fn handle_joined(&mut self, joined: Result<Attempt, tokio::task::JoinError>) {
        match joined {
            Ok(attempt) => self.settle(attempt),
            Err(err) => warn!(error = %err, "completion attempt task failed"),
        }
    }

    fn settle(&mut self, attempt: Attempt) {
        let Attempt {
            action_id,
            job_id,
            result,
        } = attempt;
        match result {
            Ok(response) if response.ok => {
                let removed = self.store.update(|table| {
                    if table.get(&action_id).is_some_and(|job| job.job_id == job_id) {
                        table.remove(&action_id)
                    } else {
                        None
                    }
                });
                if removed.is_none() {
                    debug!(action = %action_id, job = %job_id, "completed job was already gone locally");
                    return;
                }
                info!(action = %action_id, job = %job_id, "job completed");
                self.emit(JobEvent::Completed {
                    action_id,
                    job_id,
                    delta: response.resource_delta,
                });
            }
            Ok(_) => {
                let retry_at_ms = self.back_off(&action_id, &job_id, self.timing.soft_backoff_ms);
                debug!(action = %action_id, job = %job_id, retry_at_ms, "server says job is not ready");
                self.emit(JobEvent::Deferred {
                    action_id,
                    job_id,
                    retry_at_ms,
                });
            }
            Err(err) => {
                let retry_at_ms = self.back_off(&action_id, &job_id, self.timing.error_backoff_ms);
                warn!(action = %action_id, job = %job_id, error = %err, retry_at_ms, "completion attempt failed");
                self.emit(JobEvent::Failed {
                    action_id,
                    job_id,
                    error: err.to_string(),
                    retry_at_ms,
                });
            }
        }
    }

    fn back_off(&self, action_id: &str, job_id: &str, delay_ms: i64) -> i64 {
        let retry_at_ms = self.clock.now_ms() + delay_ms;
        self.store.update(|table| {
            if let Some(job) = table.get_mut(action_id) {
                if job.job_id == job_id {
                    job.in_flight = false;
                    job.next_check_ms = Some(retry_at_ms);
                }
            }
        });
        retry_at_ms
    }

    fn emit(&self, event: JobEvent) {
        if self.events.send(event).is_err() {
            debug!("no listener for job events");
        }
    }
}

/// Owner of the spawned ticker task.
pub struct TickerHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl TickerHandle {
    pub async fn shutdown(self) {
        // the task may already have exited
        let _ = self.shutdown.send(());
        if let Err(err) = self.join.await {
            warn!(error = %err, "job ticker task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, ScriptedCompletion};
    use crate::backend::StartRequest;
    use crate::clock::ManualClock;
    use crate::persist::MemoryStorage;
    use crate::sim::definitions::{Definition, Definitions};
    use crate::sim::jobs::ActiveJob;
    use std::collections::BTreeMap;

    struct Rig {
        clock: ManualClock,
        store: Arc<JobStore>,
        backend: Arc<MemoryBackend>,
        ticker: JobTicker,
        events: mpsc::UnboundedReceiver<JobEvent>,
    }

    fn rig() -> Rig {
        let clock = ManualClock::at(0);
        let definitions = Definitions::new(vec![Definition {
            id: "bld.sawmill.l1".to_string(),
            duration_seconds: 10.0,
            yields: BTreeMap::from([("res.plank".to_string(), 3.0)]),
            ..Definition::default()
        }]);
        let backend = Arc::new(MemoryBackend::new(
            Arc::new(clock.clone()),
            Arc::new(definitions),
        ));
        let store = Arc::new(JobStore::new(Arc::new(MemoryStorage::default())));
        let (tx, events) = mpsc::unbounded_channel();
        let ticker = JobTicker::new(
            store.clone(),
            backend.clone(),
            Arc::new(clock.clone()),
            TickerTiming::default(),
            tx,
        );
        Rig {
            clock,
            store,
            backend,
            ticker,
            events,
        }
    }

    async fn start(rig: &Rig) -> String {
        let started = rig
            .backend
            .start(StartRequest {
                action_id: "bld.sawmill.l1".to_string(),
                scope: "main".to_string(),
            })
            .await
            .expect("start");
        rig.store.insert(ActiveJob::new(
            "bld.sawmill.l1",
            &started.job_id,
            started.start_timestamp,
            started.duration_seconds,
        ));
        started.job_id
    }

    #[tokio::test]
    async fn nothing_attempted_inside_grace_window() {
        let mut rig = rig();
        start(&rig).await;
        rig.clock.set(11_000);
        assert_eq!(rig.ticker.tick(), 0);
        assert_eq!(rig.backend.complete_calls(), 0);
    }

    #[tokio::test]
    async fn not_ready_then_ready_applies_delta_once() {
        let mut rig = rig();
        let job_id = start(&rig).await;

        rig.clock.set(12_000);
        rig.backend.script_completion(ScriptedCompletion::NotReady);
        assert_eq!(rig.ticker.tick(), 1);
        rig.ticker.settle_pending().await;

        let job = rig.store.get_job("bld.sawmill.l1").expect("job still active");
        assert_eq!(job.next_check_ms, Some(13_500));
        assert!(!job.in_flight);
        assert!(matches!(
            rig.events.try_recv(),
            Ok(JobEvent::Deferred { retry_at_ms: 13_500, .. })
        ));

        rig.clock.set(14_000);
        assert_eq!(rig.ticker.tick(), 1);
        rig.ticker.settle_pending().await;
        assert!(rig.store.get_job("bld.sawmill.l1").is_none());
        match rig.events.try_recv() {
            Ok(JobEvent::Completed { job_id: done, delta, .. }) => {
                assert_eq!(done, job_id);
                assert_eq!(delta.entries[0].amount, 3.0);
            }
            other => panic!("expected completion, got {other:?}"),
        }

        assert_eq!(rig.ticker.tick(), 0);
        assert!(rig.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn network_failure_backs_off_longer_and_keeps_job() {
        let mut rig = rig();
        start(&rig).await;
        rig.clock.set(12_000);
        rig.backend.script_completion(ScriptedCompletion::NetworkError);
        rig.ticker.tick();
        rig.ticker.settle_pending().await;

        let job = rig.store.get_job("bld.sawmill.l1").expect("job kept");
        assert_eq!(job.next_check_ms, Some(15_000));
        assert!(matches!(rig.events.try_recv(), Ok(JobEvent::Failed { .. })));

        rig.clock.set(14_000);
        assert_eq!(rig.ticker.tick(), 0);
        rig.clock.set(15_000);
        assert_eq!(rig.ticker.tick(), 1);
    }

    #[tokio::test]
    async fn in_flight_job_is_not_attempted_twice() {
        let mut rig = rig();
        start(&rig).await;
        rig.clock.set(12_000);
        assert_eq!(rig.ticker.tick(), 1);
        assert!(rig.store.get_job("bld.sawmill.l1").expect("job").in_flight);
        assert_eq!(rig.ticker.tick(), 0);
        rig.ticker.settle_pending().await;
        assert_eq!(rig.backend.complete_calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_while_in_flight_emits_nothing() {
        let mut rig = rig();
        start(&rig).await;
        rig.clock.set(12_000);
        rig.ticker.tick();
        rig.store.remove("bld.sawmill.l1");
        rig.ticker.settle_pending().await;
        assert!(rig.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_ticker_completes_jobs_on_its_own() {
        let rig = rig();
        start(&rig).await;
        rig.clock.set(12_000);
        let Rig {
            store,
            ticker,
            mut events,
            ..
        } = rig;
        let handle = ticker.spawn();
        let event = events.recv().await.expect("event");
        assert!(matches!(event, JobEvent::Completed { .. }));
        assert!(store.is_empty());
        handle.shutdown().await;
    }
}

use super::{
    ActionBackend, BackendError, CancelRequest, CancelResponse, CompleteRequest, CompleteResponse,
    StartRequest, StartResponse,
};
use crate::clock::Clock;
use crate::sim::definitions::Definitions;
use crate::sim::jobs::{seconds_to_ms, RunningJob};
use crate::sim::resources::{DeltaEntry, ResourceDelta};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Forced outcome for the next `complete` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedCompletion {
    NotReady,
    NetworkError,
}

/// Forced outcome for the next `cancel` call. The job keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedCancel {
    NetworkError,
    Rejected,
}

#[derive(Debug, Clone)]
struct ServerJob {
    action_id: String,
    start_ms: i64,
    end_ms: i64,
    duration_seconds: f64,
    locked: Vec<DeltaEntry>,
    payout: ResourceDelta,
}

#[derive(Debug, Default)]
struct Ledger {
    running: HashMap<String, ServerJob>,
    completed: HashMap<String, ResourceDelta>,
    script: VecDeque<ScriptedCompletion>,
    cancel_script: VecDeque<ScriptedCancel>,
    issued: u64,
    complete_calls: usize,
}

/// An authoritative server held in memory. Durations and prices come
/// straight from the definitions; completion is idempotent per job id.
pub struct MemoryBackend {
    clock: Arc<dyn Clock>,
    definitions: Arc<Definitions>,
    ledger: Mutex<Ledger>,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>, definitions: Arc<Definitions>) -> Self {
        Self {
            clock,
            definitions,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn script_completion(&self, outcome: ScriptedCompletion) {
        self.ledger().script.push_back(outcome);
    }

    pub fn script_cancel(&self, outcome: ScriptedCancel) {
        self.ledger().cancel_script.push_back(outcome);
    }

    pub fn running_jobs(&self) -> Vec<RunningJob> {
        self.ledger()
            .running
            .iter()
            .map(|(job_id, job)| RunningJob {
                action_id: job.action_id.clone(),
                job_id: job_id.clone(),
                start_timestamp: Some(job.start_ms),
                end_timestamp: Some(job.end_ms),
                duration_seconds: Some(job.duration_seconds),
            })
            .collect()
    }

    /// Resolves a job as if another client had completed it.
    pub fn finish_elsewhere(&self, job_id: &str) {
        let mut ledger = self.ledger();
        if let Some(job) = ledger.running.remove(job_id) {
            ledger.completed.insert(job_id.to_string(), job.payout);
        }
    }

    pub fn complete_calls(&self) -> usize {
        self.ledger().complete_calls
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ActionBackend for MemoryBackend {
    async fn start(&self, request: StartRequest) -> Result<StartResponse, BackendError> {
        let definition = self
            .definitions
            .get(&request.action_id)
            .ok_or_else(|| BackendError::Rejected(format!("unknown action {}", request.action_id)))?;
        let mut ledger = self.ledger();
        if ledger
            .running
            .values()
            .any(|job| job.action_id == request.action_id)
        {
            return Err(BackendError::Rejected(format!(
                "{} is already running",
                request.action_id
            )));
        }

        ledger.issued += 1;
        let suffix: u16 = rand::thread_rng().gen_range(0..u16::MAX);
        let job_id = format!("job-{}-{suffix:04x}", ledger.issued);
        let start_ms = self.clock.now_ms();
        let duration_seconds = definition.duration_seconds.max(0.0);
        let end_ms = start_ms + seconds_to_ms(duration_seconds);
        let locked: Vec<DeltaEntry> = definition
            .price
            .iter()
            .map(|(resource, amount)| DeltaEntry {
                resource: resource.clone(),
                amount: *amount,
                store: None,
            })
            .collect();
        let payout = definition
            .yields
            .iter()
            .fold(ResourceDelta::default(), |delta, (resource, amount)| {
                delta.gain(resource, *amount)
            });

        ledger.running.insert(
            job_id.clone(),
            ServerJob {
                action_id: request.action_id,
                start_ms,
                end_ms,
                duration_seconds,
                locked: locked.clone(),
                payout,
            },
        );
        Ok(StartResponse {
            job_id,
            start_timestamp: start_ms,
            end_timestamp: end_ms,
            duration_seconds,
            locked_costs: locked,
        })
    }

    async fn cancel(&self, request: CancelRequest) -> Result<CancelResponse, BackendError> {
        let mut ledger = self.ledger();
        match ledger.cancel_script.pop_front() {
            Some(ScriptedCancel::NetworkError) => {
                return Err(BackendError::Network("connection reset".to_string()));
            }
            Some(ScriptedCancel::Rejected) => {
                return Err(BackendError::Rejected(format!(
                    "{} cannot be cancelled now",
                    request.job_id
                )));
            }
            None => {}
        }
        match ledger.running.get(&request.job_id) {
            Some(job) if job.action_id == request.action_id => {}
            _ => return Err(BackendError::NotFound(request.job_id)),
        }
        let job = ledger
            .running
            .remove(&request.job_id)
            .ok_or_else(|| BackendError::NotFound(request.job_id.clone()))?;
        Ok(CancelResponse {
            locked_costs_refund: job.locked,
        })
    }

    async fn complete(&self, request: CompleteRequest) -> Result<CompleteResponse, BackendError> {
        let now = self.clock.now_ms();
        let mut ledger = self.ledger();
        ledger.complete_calls += 1;
        match ledger.script.pop_front() {
            Some(ScriptedCompletion::NotReady) => return Ok(CompleteResponse::default()),
            Some(ScriptedCompletion::NetworkError) => {
                return Err(BackendError::Network("connection reset".to_string()));
            }
            None => {}
        }
        if let Some(delta) = ledger.completed.get(&request.job_id) {
            return Ok(CompleteResponse {
                ok: true,
                resource_delta: delta.clone(),
            });
        }
        let end_ms = ledger
            .running
            .get(&request.job_id)
            .map(|job| job.end_ms)
            .ok_or_else(|| BackendError::NotFound(request.job_id.clone()))?;
        if now < end_ms {
            return Ok(CompleteResponse::default());
        }
        let job = ledger
            .running
            .remove(&request.job_id)
            .ok_or_else(|| BackendError::NotFound(request.job_id.clone()))?;
        ledger
            .completed
            .insert(request.job_id.clone(), job.payout.clone());
        Ok(CompleteResponse {
            ok: true,
            resource_delta: job.payout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sim::definitions::Definition;
    use std::collections::BTreeMap;

    fn backend() -> (MemoryBackend, ManualClock) {
        let clock = ManualClock::at(0);
        let definitions = Definitions::new(vec![Definition {
            id: "bld.sawmill.l1".to_string(),
            price: BTreeMap::from([("res.wood".to_string(), 10.0)]),
            yields: BTreeMap::from([("res.plank".to_string(), 4.0)]),
            duration_seconds: 10.0,
            ..Definition::default()
        }]);
        (
            MemoryBackend::new(Arc::new(clock.clone()), Arc::new(definitions)),
            clock,
        )
    }

    fn start_request() -> StartRequest {
        StartRequest {
            action_id: "bld.sawmill.l1".to_string(),
            scope: "main".to_string(),
        }
    }

    #[tokio::test]
    async fn completion_is_idempotent() {
        let (backend, clock) = backend();
        let started = backend.start(start_request()).await.expect("start");
        assert_eq!(started.end_timestamp, 10_000);

        let early = backend
            .complete(CompleteRequest { job_id: started.job_id.clone() })
            .await
            .expect("complete");
        assert!(!early.ok);

        clock.set(10_000);
        for _ in 0..2 {
            let done = backend
                .complete(CompleteRequest { job_id: started.job_id.clone() })
                .await
                .expect("complete");
            assert!(done.ok);
            assert_eq!(done.resource_delta.entries[0].amount, 4.0);
        }
        assert!(backend.running_jobs().is_empty());
    }

    #[tokio::test]
    async fn cancel_refunds_and_second_cancel_is_not_found() {
        let (backend, _) = backend();
        let started = backend.start(start_request()).await.expect("start");
        let request = CancelRequest {
            action_id: "bld.sawmill.l1".to_string(),
            job_id: started.job_id,
            scope: "main".to_string(),
        };
        let refund = backend.cancel(request.clone()).await.expect("cancel");
        assert_eq!(refund.locked_costs_refund[0].amount, 10.0);
        assert!(matches!(
            backend.cancel(request).await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected() {
        let (backend, _) = backend();
        backend.start(start_request()).await.expect("start");
        assert!(matches!(
            backend.start(start_request()).await,
            Err(BackendError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn scripted_cancel_failure_leaves_job_running() {
        let (backend, _) = backend();
        let started = backend.start(start_request()).await.expect("start");
        let request = CancelRequest {
            action_id: "bld.sawmill.l1".to_string(),
            job_id: started.job_id.clone(),
            scope: "main".to_string(),
        };
        backend.script_cancel(ScriptedCancel::NetworkError);
        assert!(matches!(
            backend.cancel(request.clone()).await,
            Err(BackendError::Network(_))
        ));
        assert_eq!(backend.running_jobs().len(), 1);

        let refund = backend.cancel(request).await.expect("cancel");
        assert_eq!(refund.locked_costs_refund[0].amount, 10.0);
        assert!(backend.running_jobs().is_empty());
    }
}

use crate::backend::{ActionBackend, BackendError, CancelRequest, StartRequest};
use crate::clock::Clock;
use crate::sim::game::{Game, GameState};
use crate::sim::jobs::{ActiveJob, JobTable, PersistedJob};
use crate::sim::rehydrate::{backfill, JobRehydrator, ReconcileSummary};
use crate::sim::requirements::RequirementVerdict;
use crate::sim::resources::ResourceDelta;
use crate::sim::store::JobStore;
use crate::sim::ticker::{JobEvent, JobTicker, TickerTiming};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const MAX_MESSAGES: usize = 8;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("unknown action {0}")]
    UnknownAction(String),
    #[error("{0} is already in progress")]
    AlreadyActive(String),
    #[error("requirements not met")]
    Requirements(Box<RequirementVerdict>),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Error)]
pub enum CancelError {
    /// The job is already gone locally; the server may still be running it.
    #[error("cancel of {action_id} was not confirmed by the server: {source}")]
    Unconfirmed {
        action_id: String,
        #[source]
        source: BackendError,
    },
}

/// Ties the player's economy to the job lifecycle: starts and cancels
/// actions, and folds ticker results back into the inventory.
pub struct App {
    game: Game,
    store: Arc<JobStore>,
    backend: Arc<dyn ActionBackend>,
    clock: Arc<dyn Clock>,
    scope: String,
    events_tx: mpsc::UnboundedSender<JobEvent>,
    events: mpsc::UnboundedReceiver<JobEvent>,
    messages: VecDeque<String>,
}

impl App {
    pub fn new(
        game: Game,
        store: Arc<JobStore>,
        backend: Arc<dyn ActionBackend>,
        clock: Arc<dyn Clock>,
        scope: impl Into<String>,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            game,
            store,
            backend,
            clock,
            scope: scope.into(),
            events_tx,
            events,
            messages: VecDeque::with_capacity(MAX_MESSAGES),
        }
    }

    /// A ticker over this app's store whose events come back here.
    pub fn ticker(&self, timing: TickerTiming) -> JobTicker {
        JobTicker::new(
            self.store.clone(),
            self.backend.clone(),
            self.clock.clone(),
            timing,
            self.events_tx.clone(),
        )
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn active_jobs(&self) -> Arc<JobTable> {
        self.store.snapshot()
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(String::as_str)
    }

    pub async fn start_action(&mut self, action_id: &str) -> Result<ActiveJob, StartError> {
        let spec = self
            .game
            .definitions()
            .get(action_id)
            .map(|definition| definition.requirement_spec())
            .ok_or_else(|| StartError::UnknownAction(action_id.to_string()))?;
        if self.store.get_job(action_id).is_some() {
            return Err(StartError::AlreadyActive(action_id.to_string()));
        }
        let verdict = self.game.evaluate_spec(&spec);
        if !verdict.all_ok {
            debug!(action = %action_id, ?verdict, "start refused");
            return Err(StartError::Requirements(Box::new(verdict)));
        }

        let response = self
            .backend
            .start(StartRequest {
                action_id: action_id.to_string(),
                scope: self.scope.clone(),
            })
            .await?;
        let persisted = PersistedJob {
            action_id: action_id.to_string(),
            job_id: response.job_id.clone(),
            start_epoch_ms: Some(response.start_timestamp),
            end_epoch_ms: Some(response.end_timestamp),
            duration_seconds: Some(response.duration_seconds),
            next_check_ms: None,
        };
        let job = backfill(persisted, self.clock.now_ms()).ok_or_else(|| {
            BackendError::Rejected(format!("server returned no job id for {action_id}"))
        })?;

        self.store.insert(job.clone());
        self.game
            .apply_delta(&ResourceDelta::spend(&response.locked_costs));
        info!(action = %action_id, job = %job.job_id, end_ms = job.end_epoch_ms, "job started");
        self.push_message(format!(
            "Started {action_id} ({:.0}s).",
            job.duration_seconds
        ));
        Ok(job)
    }

    /// Removes the job locally, then asks the server to cancel it. A job
    /// the server no longer knows counts as cancelled. The local removal
    /// is never rolled back.
    pub async fn cancel_action(&mut self, action_id: &str) -> Result<Option<ActiveJob>, CancelError> {
        let Some(job) = self.store.remove(action_id) else {
            debug!(action = %action_id, "nothing to cancel");
            return Ok(None);
        };

        let request = CancelRequest {
            action_id: action_id.to_string(),
            job_id: job.job_id.clone(),
            scope: self.scope.clone(),
        };
        match self.backend.cancel(request).await {
            Ok(response) => {
                self.game
                    .apply_delta(&ResourceDelta::refund(&response.locked_costs_refund));
                info!(action = %action_id, job = %job.job_id, "job cancelled");
                self.push_message(format!("Cancelled {action_id}."));
                Ok(Some(job))
            }
            Err(err) if err.is_already_gone() => {
                info!(action = %action_id, job = %job.job_id, "job was already gone on the server");
                self.push_message(format!("Cancelled {action_id}."));
                Ok(Some(job))
            }
            Err(err) => {
                warn!(action = %action_id, job = %job.job_id, error = %err, "cancel not confirmed");
                self.push_message(format!("Cancel of {action_id} not confirmed: {err}"));
                Err(CancelError::Unconfirmed {
                    action_id: action_id.to_string(),
                    source: err,
                })
            }
        }
    }

    pub fn handle_event(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Completed {
                action_id, delta, ..
            } => {
                self.game.apply_delta(delta);
                self.push_message(format!("{action_id} finished."));
            }
            JobEvent::Deferred {
                action_id,
                retry_at_ms,
                ..
            } => {
                debug!(action = %action_id, retry_at_ms, "completion deferred");
            }
            JobEvent::Failed {
                action_id, error, ..
            } => {
                debug!(action = %action_id, error = %error, "completion will be retried");
            }
        }
    }

    /// Applies every event already queued. Returns how many there were.
    pub fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(&event);
            handled += 1;
        }
        handled
    }

    /// Waits for the next ticker event and applies it.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        let event = self.events.recv().await?;
        self.handle_event(&event);
        Some(event)
    }

    /// Takes a fresh state feed and reconciles the job table with the
    /// server's running jobs it carries.
    pub fn refresh(&mut self, state: GameState, rehydrator: &JobRehydrator) -> ReconcileSummary {
        let summary = rehydrator.reconcile(&state.running_jobs);
        self.game.set_state(state);
        summary
    }

    fn push_message(&mut self, message: String) {
        if self.messages.len() >= MAX_MESSAGES {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }
}

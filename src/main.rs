mod demo;

use anyhow::Result;
use settlement_economy::app::{App, StartError};
use settlement_economy::backend::memory::MemoryBackend;
use settlement_economy::clock::{Clock, SystemClock};
use settlement_economy::config::{CONFIG_FILE, EngineConfig};
use settlement_economy::persist::RonFileStorage;
use settlement_economy::sim::game::Game;
use settlement_economy::sim::rehydrate::JobRehydrator;
use settlement_economy::sim::ticker::{JobEvent, TickerTiming};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = EngineConfig::load(CONFIG_FILE)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let definitions = Arc::new(demo::definitions()?);

    let storage = Arc::new(RonFileStorage::new(&config.jobs_file));
    let rehydrator = JobRehydrator::restore(storage, clock.clone());
    let backend = Arc::new(MemoryBackend::new(clock.clone(), definitions.clone()));
    let game =
        Game::new(definitions, demo::starting_state()?).with_speed_floor(config.speed_floor);
    let mut app = App::new(
        game,
        rehydrator.store(),
        backend.clone(),
        clock.clone(),
        config.scope.clone(),
    );

    // a fresh in-memory server knows no jobs, so persisted ones are stale
    let mut state = app.game().state().clone();
    state.running_jobs = backend.running_jobs();
    app.refresh(state, &rehydrator);

    for action_id in demo::OPENING_MOVES {
        if let Some(verdict) = app.game().evaluate(action_id) {
            info!(
                action = action_id,
                price = ?verdict.buffed_price,
                seconds = verdict.buffed_duration_seconds,
                kind = verdict.action_kind,
                "evaluated"
            );
        }
        match app.start_action(action_id).await {
            Ok(_) => {}
            Err(StartError::Requirements(verdict)) => warn!(
                action = action_id,
                missing = ?verdict.missing_prerequisites,
                shortfalls = ?verdict.shortfalls,
                capacity_ok = verdict.capacity_ok,
                "cannot start yet"
            ),
            Err(err) => warn!(action = action_id, error = %err, "start failed"),
        }
    }

    let autosave = rehydrator.spawn_autosave(config.autosave_interval());
    let ticker = app.ticker(TickerTiming::from(&config)).spawn();

    while !app.store().is_empty() {
        tokio::select! {
            event = app.next_event() => match event {
                Some(JobEvent::Completed { action_id, .. }) => {
                    info!(action = %action_id, remaining = app.store().len(), "settled");
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; active jobs stay persisted");
                break;
            }
        }
    }

    ticker.shutdown().await;
    autosave.abort();
    app.store().persist();

    for message in app.messages() {
        info!("{message}");
    }
    info!(inventory = ?app.game().inventory(), "final inventory");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("settlement_economy=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

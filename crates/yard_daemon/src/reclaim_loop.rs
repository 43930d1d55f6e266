use crate::state::{EventTx, SharedYard, YardState};
use std::time::Duration;
use tracing::{debug, info, warn};
use yard_control::Operator;
use yard_core::{PassStatus, ReclamationPass};

pub struct LoopTiming {
    /// Time between reclamation passes.
    pub period: Duration,
    /// Pause between phases of one pass, letting the API in.
    pub phase_yield: Duration,
    pub crew_steps: u64,
    pub max_cycles: Option<u64>,
}

impl LoopTiming {
    pub fn from_constants(constants: &yard_core::Constants, crew_steps: u64) -> Self {
        Self {
            period: Duration::from_secs_f32(constants.reclamation_period_secs.max(0.0)),
            phase_yield: Duration::from_secs_f32(constants.interop_yield_secs.max(0.0)),
            crew_steps,
            max_cycles: None,
        }
    }
}

/// Runs one reclamation pass, releasing the lock between phases.
async fn reclaim_once(yard: &SharedYard, event_tx: &EventTx, phase_yield: Duration) {
    let mut pass = ReclamationPass::new();
    loop {
        let (events, status) = {
            let mut guard = yard.lock();
            let YardState {
                ctx,
                content,
                host,
                rng,
                ..
            } = &mut *guard;
            let mut events = Vec::new();
            let status = pass.advance(ctx, content, host, rng, &mut events);
            (events, status)
        };
        let _ = event_tx.send(events);

        match status {
            Ok(PassStatus::Yielded(phase)) => {
                debug!(?phase, "reclamation phase done");
                if phase_yield.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(phase_yield).await;
                }
            }
            Ok(PassStatus::Finished(report)) => {
                debug!(chains = report.chains(), "reclamation pass done");
                return;
            }
            Ok(PassStatus::Skipped(reason)) => {
                debug!(%reason, "reclamation pass skipped");
                return;
            }
            Err(err) => {
                warn!(%err, "reclamation pass aborted");
                return;
            }
        }
    }
}

fn crew_steps(yard: &SharedYard, event_tx: &EventTx, steps: u64) {
    for _ in 0..steps {
        let events = {
            let mut guard = yard.lock();
            let YardState {
                ctx,
                content,
                host,
                crew,
                rng,
                ..
            } = &mut *guard;
            let mut events = Vec::new();
            match crew.step(ctx, content, host, rng, &mut events) {
                Ok(action) => debug!(?action, "crew step"),
                Err(err) => warn!(%err, "crew step failed"),
            }
            events
        };
        let _ = event_tx.send(events);
    }
}

pub async fn run_reclaim_loop(yard: SharedYard, event_tx: EventTx, timing: LoopTiming) {
    let mut interval = tokio::time::interval(timing.period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        reclaim_once(&yard, &event_tx, timing.phase_yield).await;
        crew_steps(&yard, &event_tx, timing.crew_steps);

        let cycles_run = {
            let mut guard = yard.lock();
            guard.cycles_run += 1;
            guard.cycles_run
        };
        if timing.max_cycles.is_some_and(|max| cycles_run >= max) {
            info!(cycles_run, "reached cycle limit");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::YardState;
    use parking_lot::Mutex;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;
    use yard_control::{CrewController, SimHost};
    use yard_core::test_fixtures::base_content;
    use yard_core::{EngineContext, Event, StationId};

    #[tokio::test]
    async fn loop_runs_passes_and_crew_until_the_limit() {
        let content = base_content();
        let yard = Arc::new(Mutex::new(YardState {
            ctx: EngineContext::init(&content),
            host: SimHost::new(&content, Vec::new()),
            crew: CrewController::new(StationId::from("A")),
            content,
            rng: ChaCha8Rng::seed_from_u64(42),
            seed: 42,
            cycles_run: 0,
        }));
        let (event_tx, mut rx) = tokio::sync::broadcast::channel(256);
        let timing = LoopTiming {
            period: Duration::from_millis(1),
            phase_yield: Duration::ZERO,
            crew_steps: 2,
            max_cycles: Some(3),
        };
        run_reclaim_loop(yard.clone(), event_tx, timing).await;

        let guard = yard.lock();
        assert_eq!(guard.cycles_run, 3);
        assert_eq!(guard.crew.steps(), 6);
        assert!(!guard.ctx.is_broken());
        drop(guard);

        let mut finished = 0;
        while let Ok(batch) = rx.try_recv() {
            finished += batch
                .iter()
                .filter(|e| matches!(e.event, Event::ReclamationFinished { .. }))
                .count();
        }
        assert_eq!(finished, 3);
    }
}

//! Resumable run state shared by the CLI and the daemon.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;
use yard_core::host::UnusedCarTracker;
use yard_core::{
    persistence, CarId, EngineContext, EngineError, EventEnvelope, RollingStockUnit, StationId,
    YardContent,
};

use crate::{CrewController, SimHost};

/// The host's rolling stock and persistence store (which holds the engine
/// save under `yard_jobs`), plus where the crew stood.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub seed: u64,
    pub cycle: u64,
    pub crew_location: StationId,
    pub cars: Vec<RollingStockUnit>,
    pub unused: Vec<CarId>,
    pub store: BTreeMap<String, serde_json::Value>,
}

/// A resumed run. `jobs_restored` is false when the saved jobs were dropped
/// because the track layout changed.
pub struct Restored {
    pub ctx: EngineContext,
    pub host: SimHost,
    pub crew: CrewController,
    pub jobs_restored: bool,
}

impl RunState {
    /// Saves the engine into the host store, then captures the host.
    pub fn capture(
        seed: u64,
        cycle: u64,
        ctx: &EngineContext,
        content: &YardContent,
        host: &mut SimHost,
        crew: &CrewController,
    ) -> Result<Self, EngineError> {
        persistence::save(ctx, content, host)?;
        Ok(Self {
            seed,
            cycle,
            crew_location: crew.location().clone(),
            cars: host.cars().cloned().collect(),
            unused: host.unused().to_vec(),
            store: host.persisted().clone(),
        })
    }

    pub fn restore<R: Rng + ?Sized>(
        self,
        content: &YardContent,
        rng: &mut R,
        events: &mut Vec<EventEnvelope>,
    ) -> Result<Restored, EngineError> {
        let mut host = SimHost::new(content, self.cars);
        host.take_marked_for_delete();
        host.mark_for_delete(&self.unused);
        host.restore_persisted(self.store);
        host.move_player_to(&self.crew_location);

        let mut ctx = EngineContext::init(content);
        let jobs_restored = persistence::load(&mut ctx, content, &host, &host, rng, events)?;
        info!(
            cycle = self.cycle,
            cars = host.snapshot().cars,
            chains = ctx.chains.len(),
            "resumed run"
        );
        Ok(Restored {
            ctx,
            host,
            crew: CrewController::new(self.crew_location),
            jobs_restored,
        })
    }
}

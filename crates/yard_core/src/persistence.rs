//! Save and restore of engine state through the host's persistence store.
//!
//! Track reservations are stored per job id beside the chains. A save made
//! against a different track layout is ignored on load.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use xxhash_rust::xxh32::xxh32;

use crate::chain::{ChainBook, Reservations};
use crate::context::EngineContext;
use crate::controller::reserve_or_replace;
use crate::host::{PersistenceStore, TrackOccupancy};
use crate::{
    Counters, EngineError, EventEnvelope, JobId, JobKind, StationId, TrackReservation, YardContent,
};

pub const SAVE_KEY: &str = "yard_jobs";
pub const SAVE_VERSION: u32 = 1;

const TRACKS_HASH_SEED: u32 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveData {
    pub version: u32,
    pub tracks_hash: u32,
    #[serde(default)]
    pub spawn_block: BTreeSet<StationId>,
    #[serde(default)]
    pub passenger_block: BTreeSet<StationId>,
    #[serde(default)]
    pub chains: ChainBook,
    #[serde(default)]
    pub reservations: BTreeMap<JobId, Vec<TrackReservation>>,
    #[serde(default)]
    pub counters: Counters,
}

/// Identity of the track layout: `xxh32` over the sorted
/// `id:pool:length` lines of every track.
pub fn tracks_hash(content: &YardContent) -> u32 {
    let mut lines: Vec<String> = content
        .stations
        .iter()
        .flat_map(|station| station.tracks.iter())
        .map(|track| format!("{}:{:?}:{:.3}", track.id, track.pool, track.length_m))
        .collect();
    lines.sort();
    xxh32(lines.join("\n").as_bytes(), TRACKS_HASH_SEED)
}

pub fn snapshot(ctx: &EngineContext, content: &YardContent) -> SaveData {
    let reservations = ctx
        .chains
        .values()
        .flat_map(|chain| chain.entries.iter())
        .map(|entry| (entry.definition.id.clone(), entry.reservations.to_vec()))
        .collect();
    SaveData {
        version: SAVE_VERSION,
        tracks_hash: tracks_hash(content),
        spawn_block: ctx.spawn_block.clone(),
        passenger_block: ctx.passenger_block.clone(),
        chains: ctx.chains.clone(),
        reservations,
        counters: ctx.counters.clone(),
    }
}

pub fn save(
    ctx: &EngineContext,
    content: &YardContent,
    store: &mut impl PersistenceStore,
) -> Result<(), EngineError> {
    let data = snapshot(ctx, content);
    let value = serde_json::to_value(&data)?;
    store.write(SAVE_KEY, value);
    info!(chains = data.chains.len(), "saved yard engine state");
    Ok(())
}

/// Restores a previous save into `ctx`. Returns `false` when there is
/// nothing usable to restore. Chains whose current job was already taken get
/// their track space back, moving to replacement tracks where the layout
/// filled up since.
pub fn load<R: Rng + ?Sized>(
    ctx: &mut EngineContext,
    content: &YardContent,
    store: &impl PersistenceStore,
    occupancy: &impl TrackOccupancy,
    rng: &mut R,
    events: &mut Vec<EventEnvelope>,
) -> Result<bool, EngineError> {
    let Some(value) = store.read(SAVE_KEY) else {
        info!("no saved yard engine state");
        return Ok(false);
    };
    let mut data: SaveData = serde_json::from_value(value)?;
    let expected = tracks_hash(content);
    if data.tracks_hash != expected {
        info!(
            saved = data.tracks_hash,
            expected, "track layout changed since the save; discarding saved jobs"
        );
        return Ok(false);
    }

    ctx.tracks.clear_reservations();
    ctx.spawn_block = data.spawn_block;
    ctx.passenger_block = data.passenger_block;
    ctx.counters = data.counters;
    ctx.chains = data.chains;

    for chain in ctx.chains.values_mut() {
        for entry in &mut chain.entries {
            entry.held = false;
            entry.reservations = match data.reservations.remove(&entry.definition.id) {
                Some(saved) => Reservations::from_vec(saved),
                None => {
                    error!(job = %entry.definition.id, "saved job has no reservation list");
                    Reservations::new()
                }
            };
        }
    }

    let cycle = ctx.cycle;
    let EngineContext {
        tracks,
        chains,
        counters,
        ..
    } = &mut *ctx;
    for chain in chains.values_mut() {
        let reserves = chain.is_taken()
            && chain
                .current_job()
                .is_some_and(|job| job.kind() != JobKind::ShuntingLoad);
        if reserves {
            reserve_or_replace(tracks, occupancy, chain, counters, cycle, rng, events)?;
        }
    }
    info!(chains = ctx.chains.len(), "restored yard engine state");
    Ok(true)
}

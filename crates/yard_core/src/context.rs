use std::collections::BTreeSet;

use tracing::{error, info, warn};

use crate::chain::ChainBook;
use crate::generators::GenerationEnv;
use crate::host::Host;
use crate::tracks::TrackAllocator;
use crate::{emit, CargoCapabilityIndex, Counters, Event, EventEnvelope, StationId, YardContent};

/// All engine state that outlives a single call: the derived lookup tables,
/// reservations, live chains, block lists and the fail-stop flag.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub index: CargoCapabilityIndex,
    pub tracks: TrackAllocator,
    pub chains: ChainBook,
    /// Stations whose job board has already been populated this session.
    pub spawn_block: BTreeSet<StationId>,
    /// Stations where an external passenger generator already ran. Only
    /// persisted and reset here; the host reads and fills it.
    pub passenger_block: BTreeSet<StationId>,
    pub counters: Counters,
    pub cycle: u64,
    broken: bool,
    failure_notified: bool,
}

impl EngineContext {
    pub fn init(content: &YardContent) -> Self {
        info!(
            stations = content.stations.len(),
            car_types = content.cargo.car_types.len(),
            "initialising yard engine"
        );
        Self {
            index: CargoCapabilityIndex::build(&content.cargo),
            tracks: TrackAllocator::new(content),
            chains: ChainBook::default(),
            spawn_block: BTreeSet::new(),
            passenger_block: BTreeSet::new(),
            counters: Counters::default(),
            cycle: 0,
            broken: false,
            failure_notified: false,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Clears session state when the engine is deactivated. Chains and
    /// reservations stay; they belong to the save.
    pub fn reset(&mut self) {
        self.spawn_block.clear();
        self.passenger_block.clear();
        self.broken = false;
        self.failure_notified = false;
    }

    /// Disables all generation for the rest of the session. Only the first
    /// failure is announced to the player.
    pub fn on_critical_failure(
        &mut self,
        reason: &dyn std::fmt::Display,
        events: &mut Vec<EventEnvelope>,
    ) {
        error!(%reason, "critical failure in yard engine; disabling job generation");
        self.broken = true;
        if !self.failure_notified {
            self.failure_notified = true;
            warn!("job generation has been disabled until the engine is restarted");
            events.push(emit(
                &mut self.counters,
                self.cycle,
                Event::GenerationDisabled {
                    reason: reason.to_string(),
                },
            ));
        }
    }

    pub fn emit(&mut self, events: &mut Vec<EventEnvelope>, event: Event) {
        events.push(emit(&mut self.counters, self.cycle, event));
    }

    pub fn generation_env<'a, H: Host>(
        &'a mut self,
        content: &'a YardContent,
        host: &'a mut H,
    ) -> GenerationEnv<'a, H> {
        GenerationEnv {
            content,
            index: &self.index,
            tracks: &self.tracks,
            counters: &mut self.counters,
            host,
        }
    }

    pub fn spawn_blocked(&self, station: &StationId) -> bool {
        self.spawn_block.contains(station)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::base_content;

    #[test]
    fn failure_is_announced_once() {
        let content = base_content();
        let mut ctx = EngineContext::init(&content);
        let mut events = Vec::new();
        ctx.on_critical_failure(&"first", &mut events);
        ctx.on_critical_failure(&"second", &mut events);
        assert!(ctx.is_broken());
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0].event,
            Event::GenerationDisabled { reason } if reason == "first"
        ));
    }

    #[test]
    fn reset_clears_session_state() {
        let content = base_content();
        let mut ctx = EngineContext::init(&content);
        let mut events = Vec::new();
        let station = StationId::from("A");
        ctx.spawn_block.insert(station.clone());
        ctx.passenger_block.insert(station.clone());
        ctx.on_critical_failure(&"boom", &mut events);
        ctx.reset();
        assert!(!ctx.is_broken());
        assert!(!ctx.spawn_blocked(&station));
        assert!(ctx.passenger_block.is_empty());
        ctx.on_critical_failure(&"again", &mut events);
        assert_eq!(events.len(), 2);
    }
}

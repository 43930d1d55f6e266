use super::*;
use crate::chain::FollowOnPolicy;
use crate::generators::transport;
use crate::host::{CarRegistry, Spawner, TrackOccupancy, UnusedCarTracker};
use crate::test_fixtures::{base_content, make_rng, TestHost};
use rand_chacha::ChaCha8Rng;

mod controller;
mod persistence;
mod station_jobs;

// --- Shared test helpers ------------------------------------------------

/// Base content with station A shipping grain only, so spawned trains are
/// always hoppers bound for B.
fn grain_content() -> YardContent {
    let mut content = base_content();
    content.stations[0]
        .ruleset
        .outbound
        .retain(|group| group.id.0 == "A-grain");
    content
}

fn station(id: &str) -> StationId {
    StationId::from(id)
}

fn track(id: &str) -> TrackId {
    TrackId::from(id)
}

fn place_train(
    host: &mut TestHost,
    car_type: &str,
    count: usize,
    track: &str,
    trainset: &str,
    cargo: Option<&str>,
) -> Vec<CarId> {
    (0..count)
        .map(|_| host.place_car(&CarType::from(car_type), track, Some(trainset), cargo))
        .collect()
}

/// Spawns, finalizes and returns a grain transport from A to B.
fn spawned_transport(
    ctx: &mut EngineContext,
    content: &YardContent,
    host: &mut TestHost,
    rng: &mut ChaCha8Rng,
    events: &mut Vec<EventEnvelope>,
) -> ChainId {
    let chain = transport::generate_with_car_spawning(
        &mut ctx.generation_env(content, host),
        &station("A"),
        false,
        rng,
    )
    .expect("transport should generate");
    crate::controller::finalize(ctx, host, chain, events).unwrap()
}

fn current_job(ctx: &EngineContext, chain: &ChainId) -> JobDefinition {
    ctx.chains
        .get(chain)
        .and_then(JobChain::current_job)
        .cloned()
        .expect("chain should have a current job")
}

fn count_events(events: &[EventEnvelope], pred: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|e| pred(&e.event)).count()
}

#[test]
fn event_ids_are_sequential() {
    let mut counters = Counters::default();
    let first = emit(&mut counters, 3, Event::JobTaken { job_id: JobId::from("FH-001") });
    let second = emit(&mut counters, 3, Event::JobTaken { job_id: JobId::from("FH-001") });
    assert_eq!(first.id.0, "evt_000000");
    assert_eq!(second.id.0, "evt_000001");
    assert_eq!(second.cycle, 3);
}

#[test]
fn reclaimed_and_generated_policies() {
    assert_eq!(
        FollowOnPolicy::for_reclaimed(JobKind::ShuntingLoad),
        FollowOnPolicy::TransportGeneration
    );
    assert_eq!(
        FollowOnPolicy::for_reclaimed(JobKind::Transport),
        FollowOnPolicy::ShuntingUnloadGeneration
    );
    assert_eq!(
        FollowOnPolicy::for_generated(JobKind::EmptyHaul),
        FollowOnPolicy::Terminal
    );
    assert_eq!(
        FollowOnPolicy::for_generated(JobKind::Transport),
        FollowOnPolicy::EmptyHaulGeneration
    );
}

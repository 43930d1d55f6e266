//! Integration test: abandoned wagons → reclaimed load → transport → unload → empty haul.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use yard_core::host::{CarRegistry, UnusedCarTracker};
use yard_core::test_fixtures::{base_content, TestHost};
use yard_core::*;

fn only_chain(ctx: &EngineContext) -> JobChain {
    let chains: Vec<&JobChain> = ctx.chains.values().collect();
    assert_eq!(chains.len(), 1, "expected exactly one live chain");
    chains[0].clone()
}

fn take_and_complete(
    ctx: &mut EngineContext,
    content: &YardContent,
    host: &mut TestHost,
    rng: &mut ChaCha8Rng,
    events: &mut Vec<EventEnvelope>,
    work: impl FnOnce(&mut TestHost, &JobDefinition),
) -> JobDefinition {
    let chain = only_chain(ctx);
    let job = chain.current_job().cloned().unwrap();
    assert_eq!(
        take_job(ctx, content, host, &job.id, rng, events).unwrap(),
        TakeOutcome::Taken
    );
    work(host, &job);
    complete_job(ctx, content, host, &job.id, rng, events).unwrap();
    job
}

#[test]
fn reclaimed_hoppers_run_a_full_job_cycle() {
    let mut content = base_content();
    // Keep A's outbound work to grain so the train has one destination.
    content.stations[0]
        .ruleset
        .outbound
        .retain(|group| group.id.0 == "A-grain");
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut events = Vec::new();

    let cars: Vec<CarId> = (0..3)
        .map(|_| host.place_car(&CarType::from("hopper"), "A-S1", Some("abandoned"), None))
        .collect();
    host.mark_for_delete(&cars);

    let status = run_reclamation_cycle(&mut ctx, &content, &mut host, &mut rng, &mut events)
        .unwrap();
    let PassStatus::Finished(report) = status else {
        panic!("reclamation should finish, got {status:?}");
    };
    assert_eq!(report.absorbed, 3);

    // 1. Load at A and pull the train onto the transfer-out track.
    let out_track = TrackId::from("A-O1");
    let load = take_and_complete(
        &mut ctx,
        &content,
        &mut host,
        &mut rng,
        &mut events,
        |host, job| {
            for id in &job.cars {
                host.set_cargo(id, Some(CargoType::from("grain")), 1.0).unwrap();
            }
            host.move_cars_to_track(&job.cars, &out_track);
        },
    );
    assert_eq!(load.kind(), JobKind::ShuntingLoad);
    let JobPayload::ShuntingLoad {
        destination_track, ..
    } = &load.payload
    else {
        panic!("expected a shunting load");
    };
    assert_eq!(destination_track, &out_track);

    // 2. Haul the grain to B.
    let transport = only_chain(&ctx).first_job().clone();
    assert_eq!(transport.kind(), JobKind::Transport);
    assert_eq!(transport.origin, StationId::from("A"));
    assert_eq!(transport.destination, StationId::from("B"));
    assert_eq!(transport.cars, cars);
    let JobPayload::Transport {
        destination_track: arrival,
        ..
    } = &transport.payload
    else {
        panic!("expected a transport");
    };
    let arrival = arrival.clone();
    take_and_complete(
        &mut ctx,
        &content,
        &mut host,
        &mut rng,
        &mut events,
        |host, job| host.move_cars_to_track(&job.cars, &arrival),
    );

    // 3. Unload at B onto its storage tracks.
    let unload = only_chain(&ctx).first_job().clone();
    assert_eq!(unload.kind(), JobKind::ShuntingUnload);
    assert_eq!(unload.station, StationId::from("B"));
    let JobPayload::ShuntingUnload {
        destination_tracks, ..
    } = &unload.payload
    else {
        panic!("expected a shunting unload");
    };
    let destination_tracks = destination_tracks.clone();
    take_and_complete(
        &mut ctx,
        &content,
        &mut host,
        &mut rng,
        &mut events,
        |host, _| {
            for cpt in &destination_tracks {
                for id in &cpt.cars {
                    host.set_cargo(id, None, 0.0).unwrap();
                }
                host.move_cars_to_track(&cpt.cars, &cpt.track);
            }
        },
    );

    // 4. B cannot load hoppers, so every set is sent back empty.
    let hauls: Vec<JobChain> = ctx.chains.values().cloned().collect();
    assert_eq!(hauls.len(), destination_tracks.len());
    for chain in &hauls {
        let job = chain.first_job();
        assert_eq!(job.kind(), JobKind::EmptyHaul);
        assert_eq!(job.destination, StationId::from("A"));
        assert_eq!(chain.policy, FollowOnPolicy::Terminal);
    }
    for chain in hauls {
        let job = chain.first_job().clone();
        take_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();
        if let JobPayload::EmptyHaul {
            destination_track, ..
        } = &job.payload
        {
            host.move_cars_to_track(&job.cars, destination_track);
        }
        complete_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();
    }

    // Terminal: nothing left, nothing reserved, cars back in the jobless pool.
    assert!(ctx.chains.is_empty());
    for station in &content.stations {
        for track in &station.tracks {
            assert!(
                ctx.tracks.reserved(&track.id).abs() < 1e-5,
                "{} still holds a reservation",
                track.id
            );
        }
    }
    let mut jobless = host.jobless.clone();
    jobless.sort();
    assert_eq!(jobless, cars);
    assert!(host.car(&cars[0]).is_some());
    assert!(!ctx.is_broken());

    let completed = events
        .iter()
        .filter(|e| matches!(e.event, Event::ChainCompleted { .. }))
        .count();
    assert_eq!(completed, 3 + destination_tracks.len());
}

use super::*;
use crate::controller::{abandon_job, complete_job, take_job, TakeOutcome};
use crate::generators::shunting_load;

fn transport_destination(job: &JobDefinition) -> TrackId {
    match &job.payload {
        JobPayload::Transport {
            destination_track, ..
        } => destination_track.clone(),
        other => panic!("expected a transport, got {other:?}"),
    }
}

#[test]
fn test_finalize_forces_cargo_and_opens_first_job() {
    let content = grain_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let chain_id = spawned_transport(&mut ctx, &content, &mut host, &mut rng, &mut events);

    let chain = ctx.chains.get(&chain_id).unwrap();
    assert_eq!(chain.state, ChainState::InProgress);
    let job = current_job(&ctx, &chain_id);
    assert_eq!(job.state, JobState::Available);
    for id in &job.cars {
        let car = host.car(id).unwrap();
        assert_eq!(car.cargo, Some(CargoType::from("grain")));
        assert!((car.cargo_amount - 1.0).abs() < 1e-5);
    }
    assert_eq!(
        count_events(&events, |e| matches!(e, Event::ChainGenerated { .. })),
        1
    );
    // Nothing is reserved before the job is taken.
    assert!(ctx.tracks.reserved(&transport_destination(&job)).abs() < 1e-5);
}

#[test]
fn test_taking_a_transport_reserves_its_destination() {
    let content = grain_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let chain_id = spawned_transport(&mut ctx, &content, &mut host, &mut rng, &mut events);
    let job = current_job(&ctx, &chain_id);

    let outcome = take_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();
    assert_eq!(outcome, TakeOutcome::Taken);
    let needed = ctx.tracks.train_length(&ctx.index, &job.car_types);
    let reserved = ctx.tracks.reserved(&transport_destination(&job));
    assert!((reserved - needed).abs() < 1e-5);
    assert_eq!(current_job(&ctx, &chain_id).state, JobState::InProgress);

    // A second take is refused.
    let again = take_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events);
    assert!(matches!(again, Err(EngineError::NotActiveJob { .. })));
}

#[test]
fn test_full_destination_moves_reservation_to_replacement_track() {
    let content = grain_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let chain_id = spawned_transport(&mut ctx, &content, &mut host, &mut rng, &mut events);
    let job = current_job(&ctx, &chain_id);
    assert_eq!(transport_destination(&job), track("B-I1"));

    // Something else parked on the transfer-in track since generation.
    host.occupy(&track("B-I1"), 190.0);
    take_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();

    let rewritten = current_job(&ctx, &chain_id);
    let replacement = transport_destination(&rewritten);
    assert_eq!(replacement, track("B-O1"));
    assert!(ctx.tracks.reserved(&track("B-I1")).abs() < 1e-5);
    assert!(ctx.tracks.reserved(&replacement) > 0.0);
    assert_eq!(
        count_events(&events, |e| matches!(e, Event::TrackReplaced { .. })),
        1
    );
}

#[test]
fn test_cars_far_from_station_expire_the_job() {
    let content = grain_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let chain_id = spawned_transport(&mut ctx, &content, &mut host, &mut rng, &mut events);
    let job = current_job(&ctx, &chain_id);
    for id in &job.cars {
        host.move_car(id, Position::new(-5000.0, 0.0, 0.0));
    }

    let outcome = take_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();
    assert_eq!(outcome, TakeOutcome::Expired);
    assert!(ctx.chains.is_empty());
    assert_eq!(host.jobless, job.cars);
    assert_eq!(
        count_events(&events, |e| matches!(e, Event::JobExpired { .. })),
        1
    );
}

#[test]
fn test_shunting_load_is_blocked_while_a_car_stands_on_the_machine_track() {
    let content = grain_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let chain = shunting_load::generate_with_car_spawning(
        &mut ctx.generation_env(&content, &mut host),
        &station("A"),
        false,
        &mut rng,
    )
    .unwrap();
    let chain_id = crate::controller::finalize(&mut ctx, &mut host, chain, &mut events).unwrap();
    let job = current_job(&ctx, &chain_id);

    host.move_cars_to_track(&job.cars[..1], &track("A-L1"));
    let outcome = take_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();
    assert_eq!(outcome, TakeOutcome::Blocked);
    assert_eq!(current_job(&ctx, &chain_id).state, JobState::Available);

    host.move_cars_to_track(&job.cars[..1], &track("A-S1"));
    let outcome = take_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();
    assert_eq!(outcome, TakeOutcome::Taken);
    let taken = current_job(&ctx, &chain_id);
    let JobPayload::ShuntingLoad {
        destination_track, ..
    } = &taken.payload
    else {
        panic!("expected a shunting load");
    };
    assert_eq!(destination_track, &track("A-L1"));
    assert!(ctx.tracks.reserved(&track("A-O1")).abs() < 1e-5);
}

#[test]
fn test_completing_a_transport_generates_the_unload() {
    let content = grain_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let chain_id = spawned_transport(&mut ctx, &content, &mut host, &mut rng, &mut events);
    let job = current_job(&ctx, &chain_id);
    take_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();
    let destination = transport_destination(&current_job(&ctx, &chain_id));
    host.move_cars_to_track(&job.cars, &destination);

    complete_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();

    assert!(ctx.chains.get(&chain_id).is_none());
    assert!(ctx.tracks.reserved(&destination).abs() < 1e-5);
    let follow_on: Vec<&JobChain> = ctx.chains.values().collect();
    assert_eq!(follow_on.len(), 1);
    let unload = follow_on[0].first_job();
    assert_eq!(unload.kind(), JobKind::ShuntingUnload);
    assert_eq!(unload.station, station("B"));
    assert_eq!(unload.cars, job.cars);
    // The cars moved on to the next chain instead of going jobless.
    assert!(host.jobless.is_empty());
    assert_eq!(
        count_events(&events, |e| matches!(e, Event::ChainCompleted { .. })),
        1
    );
}

#[test]
fn test_broken_engine_completes_without_follow_on() {
    let content = grain_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let chain_id = spawned_transport(&mut ctx, &content, &mut host, &mut rng, &mut events);
    let job = current_job(&ctx, &chain_id);
    take_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();
    let destination = transport_destination(&current_job(&ctx, &chain_id));
    host.move_cars_to_track(&job.cars, &destination);

    ctx.on_critical_failure(&"save store rejected write", &mut events);
    complete_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();

    assert!(ctx.chains.is_empty());
    assert!(ctx.tracks.reserved(&destination).abs() < 1e-5);
    assert_eq!(host.jobless, job.cars);
    assert_eq!(
        count_events(&events, |e| matches!(e, Event::ChainCompleted { .. })),
        1
    );
    assert_eq!(
        count_events(&events, |e| matches!(e, Event::ChainGenerated { .. })),
        1
    );
}

#[test]
fn test_abandoning_releases_tracks_and_skips_follow_on() {
    let content = grain_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let chain_id = spawned_transport(&mut ctx, &content, &mut host, &mut rng, &mut events);
    let job = current_job(&ctx, &chain_id);
    take_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();

    abandon_job(&mut ctx, &mut host, &job.id, &mut events).unwrap();

    assert!(ctx.chains.is_empty());
    assert!(ctx.tracks.reserved(&transport_destination(&job)).abs() < 1e-5);
    assert_eq!(host.jobless, job.cars);
    assert_eq!(
        count_events(&events, |e| matches!(e, Event::ChainAbandoned { .. })),
        1
    );
    assert_eq!(
        count_events(&events, |e| matches!(e, Event::ChainGenerated { .. })),
        1,
        "abandonment must not generate follow-on work"
    );
}

#[test]
fn test_unknown_job_is_an_error() {
    let content = grain_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let result = take_job(
        &mut ctx,
        &content,
        &mut host,
        &JobId::from("FH-999"),
        &mut rng,
        &mut events,
    );
    assert!(matches!(result, Err(EngineError::UnknownJob(_))));
}

#[test]
fn test_completed_unload_diverts_reusable_cars() {
    let content = base_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    // Hoppers unloaded at A can be loaded with A's own grain again.
    let cars = place_train(&mut host, "hopper", 2, "A-I1", "t1", Some("grain"));
    let spec = JobSpecification {
        origin: station("B"),
        cars_per_track: vec![CarsPerTrack {
            track: track("A-I1"),
            cars: cars.clone(),
        }],
        destination: station("A"),
        cars: cars.clone(),
        cargo_per_car: vec![Some(CargoType::from("grain")); 2],
    };
    let chain = crate::generators::shunting_unload::generate_with_existing_cars(
        &mut ctx.generation_env(&content, &mut host),
        spec,
        false,
        FollowOnPolicy::EmptyHaulGeneration,
        &mut rng,
    )
    .unwrap();
    let chain_id = crate::controller::finalize(&mut ctx, &mut host, chain, &mut events).unwrap();
    let job = current_job(&ctx, &chain_id);
    take_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();
    complete_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();

    assert!(ctx.chains.is_empty(), "grain cars at A need no empty haul");
    assert_eq!(host.jobless.len(), 2);
    assert!(events.iter().any(|e| matches!(
        &e.event,
        Event::CarsDiverted { station: s, count: 2 } if s == &station("A")
    )));
}

use super::*;

#[test]
fn test_first_visit_populates_the_job_board_once() {
    let content = base_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();

    let first =
        generate_station_jobs(&mut ctx, &content, &mut host, &station("A"), &mut rng, &mut events)
            .unwrap();
    assert!(!first.is_empty());
    assert!(first.len() <= content.constants.station_jobs_per_visit as usize);
    assert!(ctx.spawn_blocked(&station("A")));
    for id in &first {
        let chain = ctx.chains.get(id).unwrap();
        assert_eq!(chain.first_job().station, station("A"));
    }
    assert_eq!(
        count_events(&events, |e| matches!(
            e,
            Event::StationJobsGenerated { chains, .. } if *chains == first.len()
        )),
        1
    );

    let second =
        generate_station_jobs(&mut ctx, &content, &mut host, &station("A"), &mut rng, &mut events)
            .unwrap();
    assert!(second.is_empty());
    assert_eq!(ctx.chains.len(), first.len());
}

#[test]
fn test_first_attempt_is_a_shunting_load() {
    let content = base_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let chains =
        generate_station_jobs(&mut ctx, &content, &mut host, &station("A"), &mut rng, &mut events)
            .unwrap();
    let kinds: Vec<JobKind> = chains
        .iter()
        .filter_map(|id| ctx.chains.get(id))
        .map(|chain| chain.first_job().kind())
        .collect();
    assert_eq!(kinds.first(), Some(&JobKind::ShuntingLoad));
}

#[test]
fn test_broken_engine_generates_nothing() {
    let content = base_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    ctx.on_critical_failure(&"test failure", &mut events);

    let chains =
        generate_station_jobs(&mut ctx, &content, &mut host, &station("A"), &mut rng, &mut events)
            .unwrap();
    assert!(chains.is_empty());
    assert!(host.cars.is_empty());
    assert!(!ctx.spawn_blocked(&station("A")));
}

#[test]
fn test_unknown_station_is_an_error() {
    let content = base_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let result = generate_station_jobs(
        &mut ctx,
        &content,
        &mut host,
        &station("Z"),
        &mut rng,
        &mut events,
    );
    assert!(matches!(result, Err(EngineError::UnknownStation(_))));
}

#[test]
fn test_inbound_generation_is_suppressed_by_default() {
    let mut content = base_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();

    let chain = generate_station_job(
        &mut ctx.generation_env(&content, &mut host),
        &station("A"),
        JobKind::ShuntingUnload,
        false,
        &mut rng,
    );
    assert!(chain.is_none());
    assert!(host.cars.is_empty());

    content.constants.suppress_inbound_generation = false;
    let chain = generate_station_job(
        &mut ctx.generation_env(&content, &mut host),
        &station("A"),
        JobKind::ShuntingUnload,
        false,
        &mut rng,
    )
    .expect("unload should generate once inbound work is allowed");
    let job = chain.first_job();
    assert_eq!(job.destination, station("A"));
    assert_eq!(job.origin, station("B"));
}

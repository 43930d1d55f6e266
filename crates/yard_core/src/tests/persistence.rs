use super::*;
use crate::controller::take_job;
use crate::persistence::{load, save, SaveData, SAVE_KEY, SAVE_VERSION};

#[test]
fn test_taken_chain_gets_its_reservation_back() {
    let content = grain_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let taken = spawned_transport(&mut ctx, &content, &mut host, &mut rng, &mut events);
    let job = current_job(&ctx, &taken);
    take_job(&mut ctx, &content, &mut host, &job.id, &mut rng, &mut events).unwrap();
    let reserved = ctx.tracks.reserved(&track("B-I1"));
    assert!(reserved > 0.0);
    ctx.spawn_block.insert(station("A"));
    ctx.passenger_block.insert(station("B"));

    save(&ctx, &content, &mut host).unwrap();
    assert!(host.store.contains_key(SAVE_KEY));

    let mut restored = EngineContext::init(&content);
    let loaded = load(&mut restored, &content, &host, &host, &mut rng, &mut events).unwrap();
    assert!(loaded);
    assert_eq!(restored.chains.len(), 1);
    assert!(restored.spawn_blocked(&station("A")));
    assert!(restored.passenger_block.contains(&station("B")));
    assert_eq!(restored.counters.next_job_id, ctx.counters.next_job_id);
    assert!((restored.tracks.reserved(&track("B-I1")) - reserved).abs() < 1e-5);
    let entry = restored
        .chains
        .get(&taken)
        .and_then(JobChain::current_entry)
        .unwrap();
    assert!(entry.held);
    assert_eq!(entry.definition.state, JobState::InProgress);
}

#[test]
fn test_untaken_chain_holds_nothing_after_load() {
    let content = grain_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let chain_id = spawned_transport(&mut ctx, &content, &mut host, &mut rng, &mut events);
    save(&ctx, &content, &mut host).unwrap();

    let mut restored = EngineContext::init(&content);
    assert!(load(&mut restored, &content, &host, &host, &mut rng, &mut events).unwrap());
    assert!(restored.tracks.reserved(&track("B-I1")).abs() < 1e-5);
    let entry = restored
        .chains
        .get(&chain_id)
        .and_then(JobChain::current_entry)
        .unwrap();
    assert!(!entry.held);
    // The planned reservation survives for when the job is taken.
    assert_eq!(entry.reservations.len(), 1);
}

#[test]
fn test_changed_layout_discards_the_save() {
    let content = grain_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    spawned_transport(&mut ctx, &content, &mut host, &mut rng, &mut events);
    save(&ctx, &content, &mut host).unwrap();

    let mut changed = content.clone();
    changed.stations[1].tracks[0].length_m += 25.0;
    let mut restored = EngineContext::init(&changed);
    let loaded = load(&mut restored, &changed, &host, &host, &mut rng, &mut events).unwrap();
    assert!(!loaded);
    assert!(restored.chains.is_empty());
}

#[test]
fn test_missing_save_is_not_an_error() {
    let content = base_content();
    let mut ctx = EngineContext::init(&content);
    let host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    assert!(!load(&mut ctx, &content, &host, &host, &mut rng, &mut events).unwrap());
}

#[test]
fn test_missing_optional_fields_default() {
    let content = base_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    let hash = crate::persistence::tracks_hash(&content);
    host.store.insert(
        SAVE_KEY.to_string(),
        serde_json::json!({ "version": SAVE_VERSION, "tracks_hash": hash }),
    );
    assert!(load(&mut ctx, &content, &host, &host, &mut rng, &mut events).unwrap());
    assert!(ctx.chains.is_empty());

    let data: SaveData = serde_json::from_value(host.store[SAVE_KEY].clone()).unwrap();
    assert!(data.reservations.is_empty());
}

#[test]
fn test_corrupt_save_is_a_persistence_error() {
    let content = base_content();
    let mut ctx = EngineContext::init(&content);
    let mut host = TestHost::new(&content);
    let mut rng = make_rng();
    let mut events = Vec::new();
    host.store
        .insert(SAVE_KEY.to_string(), serde_json::json!({ "version": "one" }));
    let result = load(&mut ctx, &content, &host, &host, &mut rng, &mut events);
    assert!(matches!(result, Err(EngineError::Persistence(_))));
}

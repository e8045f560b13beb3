//! End-to-end flow over the file-backed store
//!
//! Exercises the ingest path the way a pool of worker processes would
//! drive it: samples arrive per pid, site statistics follow population
//! changes, retention stays bounded, and everything survives a reload
//! from disk.

use std::sync::Arc;
use std::thread;

use chrono::Utc;

use procmon_engine::{
    config::EngineConfig,
    engine::StatsEngine,
    platform::FixedProbe,
    record::Liveness,
    sample::Sample,
    store::{JsonFileStore, MemoryStore, StatsSink},
};

const OWN_PID: u32 = 9000;

fn sample(response_time: f64) -> Sample {
    Sample {
        response_time,
        memory_bytes: 24 * 1024 * 1024,
        vm_peak_bytes: 96 * 1024 * 1024,
        thread_count: 4,
        user_cpu_seconds: 0.006,
        system_cpu_seconds: 0.002,
        db_query_count: Some(5),
        is_exception: false,
    }
}

fn engine_with_store(store: Arc<dyn StatsSink>, living: &[u32]) -> StatsEngine {
    let mut config = EngineConfig::default();
    config.site_id = "A".to_string();
    StatsEngine::new(
        config,
        store,
        Arc::new(FixedProbe::new(living.iter().copied())),
        OWN_PID,
        Utc::now(),
    )
}

#[test]
fn statistics_survive_reload_from_disk() {
    let dir = tempfile::tempdir().unwrap();

    let first_average;
    {
        let store = Arc::new(JsonFileStore::new(dir.path()).unwrap());
        let engine = engine_with_store(store, &[100]);
        for value in [0.1, 0.3, 0.2] {
            engine.ingest(100, &sample(value)).unwrap();
        }
        first_average = engine
            .registry()
            .get(100)
            .unwrap()
            .unwrap()
            .response_time
            .average();
    }

    // a second worker generation opens the same store
    let store = Arc::new(JsonFileStore::new(dir.path()).unwrap());
    let engine = engine_with_store(store, &[100]);

    let record = engine.registry().get(100).unwrap().unwrap();
    assert_eq!(record.request_count, 3);
    assert_eq!(record.response_time.average().to_bits(), first_average.to_bits());
    assert_eq!(record.db_queries.unwrap().count(), 3);

    // and keeps aggregating where the first generation stopped
    engine.ingest(100, &sample(0.4)).unwrap();
    let record = engine.registry().get(100).unwrap().unwrap();
    assert_eq!(record.request_count, 4);
    assert_eq!(record.response_time.max(), 0.4);
}

#[test]
fn site_rollup_follows_population_changes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path()).unwrap());
    let engine = engine_with_store(store, &[100, 200]);

    engine.ingest(100, &sample(0.1)).unwrap();
    engine.ingest(100, &sample(0.2)).unwrap();
    engine.ingest(200, &sample(0.3)).unwrap();

    let summary = engine.rollup().summarize("A").unwrap();
    assert_eq!(summary.process_spawn, 2);
    assert_eq!(summary.record_count, 2);
    assert_eq!(summary.request_count, 3);
    assert_eq!(summary.exception_count, 0);

    let response_time = summary.response_time.unwrap();
    assert_eq!(response_time.count(), 3);
    assert_eq!(response_time.min(), 0.1);
    assert_eq!(response_time.max(), 0.3);
}

#[test]
fn dead_pid_reuse_starts_a_fresh_record() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with_store(store, &[]);

    engine.ingest(100, &sample(0.1)).unwrap();
    engine.ingest(100, &sample(0.2)).unwrap();

    // nothing in the probe's process table: 100 is found dead
    let (_, dead) = engine.registry().classify_liveness(Some("A")).unwrap();
    assert_eq!(dead, vec![100]);
    assert_eq!(
        engine.registry().get(100).unwrap().unwrap().liveness,
        Liveness::ConfirmedDead
    );

    // the OS hands 100 to a new worker: new record, new spawn
    let (record, created) = engine.ingest(100, &sample(0.5)).unwrap();
    assert!(created);
    assert_eq!(record.request_count, 1);
    assert_eq!(record.liveness, Liveness::Unknown);

    let summary = engine.rollup().summarize("A").unwrap();
    assert_eq!(summary.process_spawn, 2);
}

#[test]
fn sweeps_tolerate_one_corrupt_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path()).unwrap());
    let engine = engine_with_store(Arc::clone(&store) as Arc<dyn StatsSink>, &[100]);

    engine.ingest(100, &sample(0.1)).unwrap();
    engine.ingest(200, &sample(0.2)).unwrap();

    // tamper with one record on disk behind the engine's back
    let mut bad = engine.registry().get(200).unwrap().unwrap();
    bad.request_count = 99;
    store.save_process(&bad).unwrap();

    // the healthy record is still classified
    let (living, dead) = engine.registry().classify_liveness(None).unwrap();
    assert!(living.contains(&100));
    assert!(dead.is_empty());

    // retention and the summary keep working over the remaining records
    assert_eq!(engine.registry().evict_over_capacity(1).unwrap(), 0);
    let summary = engine.rollup().summarize("A").unwrap();
    assert_eq!(summary.record_count, 1);
    assert_eq!(summary.request_count, 1);
}

#[test]
fn concurrent_observers_lose_no_updates() {
    let store = Arc::new(MemoryStore::new());
    // both pids stay in the probe's process table so the rollup
    // triggered by creation events never marks them dead mid-test
    let engine = Arc::new(engine_with_store(store, &[100, 101]));

    let threads: Vec<_> = (0..4)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                // two workers share a pid to force same-key contention
                let pid = 100 + worker % 2;
                for _ in 0..50 {
                    engine.ingest(pid, &sample(0.01)).unwrap();
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    let total: u64 = engine
        .registry()
        .list(None)
        .unwrap()
        .iter()
        .map(|record| record.request_count)
        .sum();
    assert_eq!(total, 200);
}

#[test]
fn retention_keeps_newest_records() {
    let store = Arc::new(MemoryStore::new());
    let mut config = EngineConfig::default();
    config.site_id = "A".to_string();
    config.retention.max_process_records = 3;
    let engine = StatsEngine::new(
        config,
        store,
        Arc::new(FixedProbe::new([])),
        OWN_PID,
        Utc::now(),
    );

    for pid in 1..=6 {
        engine.ingest(pid, &sample(0.1)).unwrap();
    }

    let records = engine.registry().list(None).unwrap();
    assert!(records.len() <= 3);
    // the most recently created pid always survives
    assert!(records.iter().any(|record| record.pid == 6));
}

//! End-to-end behaviour of the telemetry store through its public API.

use std::time::Duration;

use rand::Rng;
use verdant_core::{EnvironmentSnapshot, IndexKey, OrganismPerformance};
use verdant_store::storage::IndexedStore;
use verdant_store::{
    read_export, BulkExporter, EngineState, ManagedStore, MetadataConfig, RecordStore,
    StoreError, StoreRegistry, TypeConfig,
};

const POLL: Duration = Duration::from_millis(10);

fn organism(id: i64, fitness: i64) -> OrganismPerformance {
    OrganismPerformance {
        organism_id: id,
        epoch: 0,
        birth_tick: 0,
        death_tick: None,
        fitness,
        genome: "ACGT".to_string(),
        cell_count: 1,
        energy: 0.0,
    }
}

async fn drained<S: ManagedStore + ?Sized>(store: &S, n: u64) {
    for _ in 0..1000 {
        if store.count() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("only {} of {n} records written", store.count());
}

fn registry_config(ttl: Duration) -> MetadataConfig {
    let mut config = MetadataConfig::default()
        .with_type("OrganismPerformance", TypeConfig::enabled().with_ttl(ttl))
        .with_type("EnvironmentSnapshot", TypeConfig::enabled().with_ttl(ttl));
    config.poll_interval = POLL;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fitness_page_matches_sorted_slice() {
    let registry = StoreRegistry::new(registry_config(Duration::from_secs(1_000_000))).unwrap();
    let store = registry.get::<OrganismPerformance>("scenario").unwrap();

    let mut fitness = Vec::with_capacity(75);
    for id in 0..75 {
        let value = rand::rng().random_range(-1_000..1_000i64);
        fitness.push(value);
        store.store(organism(id, value));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    drained(store.as_ref(), 75).await;

    fitness.sort_unstable_by(|a, b| b.cmp(a));
    let page: Vec<i64> = store
        .page(Some("fitness"), 1, 12)
        .unwrap()
        .iter()
        .map(|r| r.fitness)
        .collect();
    assert_eq!(page, fitness[12..24].to_vec());

    registry.shutdown().await;
}

#[tokio::test]
async fn distinct_primary_keys_page_in_descending_order() {
    let store =
        IndexedStore::<OrganismPerformance>::create("order", Duration::from_secs(60), POLL).unwrap();
    store.initialize(None).unwrap();
    for id in [17, 3, 99, 42, 8] {
        store.store(organism(id, 0));
    }
    drained(&store, 5).await;

    let ids: Vec<i64> = store
        .page(None, 0, 5)
        .unwrap()
        .iter()
        .map(|r| r.organism_id)
        .collect();
    assert_eq!(ids, vec![99, 42, 17, 8, 3]);
    store.expire(true).await;
}

#[tokio::test]
async fn find_is_exact_and_bounded() {
    let store =
        IndexedStore::<OrganismPerformance>::create("find", Duration::from_secs(60), POLL).unwrap();
    store.initialize(None).unwrap();
    for id in 0..30 {
        store.store(organism(id, id % 4));
    }
    drained(&store, 30).await;

    let hits = store.find("fitness", &IndexKey::from(2), 5).unwrap();
    assert_eq!(hits.len(), 5);
    assert!(hits.iter().all(|r| r.fitness == 2));
    // Write order within one key.
    let ids: Vec<i64> = hits.iter().map(|r| r.organism_id).collect();
    assert_eq!(ids, vec![2, 6, 10, 14, 18]);
    store.expire(true).await;
}

#[tokio::test]
async fn forced_shutdown_is_synchronous() {
    let store =
        IndexedStore::<OrganismPerformance>::create("shutdown", Duration::from_secs(60), POLL)
            .unwrap();
    store.initialize(None).unwrap();
    store.store(organism(1, 1));
    drained(&store, 1).await;
    let data = store.data_path().to_path_buf();
    let index = store.index_path().to_path_buf();

    store.expire(true).await;
    assert!(!data.exists());
    assert!(!index.exists());
    assert!(matches!(store.page(None, 0, 1), Err(StoreError::Closed { .. })));
}

#[tokio::test]
async fn idle_store_stops_accepting_records() {
    let store =
        IndexedStore::<OrganismPerformance>::create("ttl", Duration::from_millis(50), POLL).unwrap();
    store.initialize(None).unwrap();
    store.store(organism(1, 1));
    drained(&store, 1).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(store.expire(false).await);
    store.store(organism(2, 2));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.count(), 1);
}

#[tokio::test]
async fn registry_sessions_are_isolated_and_exportable() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = registry_config(Duration::from_secs(60));
    config.export.path = dir.path().to_path_buf();
    let registry = StoreRegistry::new(config).unwrap();
    registry.start().unwrap();

    let a = registry.get::<OrganismPerformance>("a").unwrap();
    let b = registry.get::<OrganismPerformance>("b").unwrap();
    for id in 0..6 {
        a.store(organism(id, id));
    }
    b.store(organism(100, 100));
    registry
        .get::<EnvironmentSnapshot>("a")
        .unwrap()
        .store(EnvironmentSnapshot {
            tick: 1,
            epoch: 0,
            population: 6,
            total_energy: 0.0,
            mean_fitness: 2.5,
        });
    drained(a.as_ref(), 6).await;
    drained(b.as_ref(), 1).await;

    assert_eq!(registry.session_count(), 2);
    assert_eq!(registry.group("a").len(), 2);
    assert_eq!(b.page(None, 0, 10).unwrap().len(), 1);

    let exporter = BulkExporter::new(registry.config().export.clone());
    let summary = exporter.export("a", a.as_ref()).unwrap();
    assert_eq!(summary.records, 6);
    let exported = read_export::<OrganismPerformance>(&summary.path).unwrap();
    assert_eq!(exported.first().map(|r| r.organism_id), Some(5));

    registry.shutdown().await;
    assert_eq!(a.state(), EngineState::Closed);
    assert_eq!(b.state(), EngineState::Closed);
    assert_eq!(registry.session_count(), 0);
}

#[tokio::test]
async fn properties_select_engine_modes() {
    let dir = tempfile::tempdir().unwrap();
    let config = MetadataConfig::from_properties([
        ("metadata.OrganismPerformance.enabled", "true".to_string()),
        ("metadata.EnvironmentSnapshot.enabled", "true".to_string()),
        ("metadata.EnvironmentSnapshot.export.enabled", "true".to_string()),
        ("metadata.export.path", dir.path().display().to_string()),
        ("metadata.export.postfix", "live".to_string()),
        ("metadata.poll.millis", "10".to_string()),
    ])
    .unwrap();
    let registry = StoreRegistry::new(config).unwrap();

    let snapshots = registry.get::<EnvironmentSnapshot>("run").unwrap();
    for tick in 0..3 {
        snapshots.store(EnvironmentSnapshot {
            tick,
            epoch: 0,
            population: 1,
            total_energy: 0.0,
            mean_fitness: 0.0,
        });
    }
    drained(snapshots.as_ref(), 3).await;
    registry.shutdown().await;

    let streamed = read_export::<EnvironmentSnapshot>(
        &dir.path().join("EnvironmentSnapshot_run_live.txt.gz"),
    )
    .unwrap();
    assert_eq!(streamed.len(), 3);
}

//! Persistence tests for the durable graph store.
//!
//! An import into a redb-backed store must survive closing and reopening
//! the database, and importing the same model again must create nothing.

use topograph::config::{EngineConfig, ExecutorConfig, ImportConfig};
use topograph::element::{DeclaredKind, ElementRecord, ElementSet, RawGeometry};
use topograph::engine::Engine;
use topograph::import::ImportReport;
use topograph::store::DurableGraphStore;

fn model() -> ElementSet {
    ElementSet::new(vec![
        ElementRecord::new("Space1", "IfcSpace")
            .with_geometry(RawGeometry::cuboid([0.0, 0.2, 0.0], [2.0, 4.0, 3.0])),
        ElementRecord::new("Wall1", "IfcWall")
            .with_geometry(RawGeometry::cuboid([0.0, 0.0, 0.0], [1.0, 0.2, 3.0]))
            .with_material("Concrete"),
        ElementRecord::new("Wall2", "IfcWall")
            .with_geometry(RawGeometry::cuboid([1.0, 0.0, 0.0], [2.0, 0.2, 3.0]))
            .with_material("Concrete"),
        ElementRecord::new("Door1", "IfcDoor")
            .with_geometry(RawGeometry::cuboid([0.3, 0.0, 0.0], [0.7, 0.2, 2.1]))
            .declare(DeclaredKind::FillsOpeningOf, "Wall1")
            .declare(DeclaredKind::BoundsSpace, "Space1"),
    ])
    .unwrap()
}

fn durable_engine(dir: &std::path::Path) -> Engine<DurableGraphStore> {
    let store = DurableGraphStore::open(dir).unwrap();
    Engine::new(
        EngineConfig {
            executor: ExecutorConfig { workers: 2 },
            import: ImportConfig {
                batch_size: 3,
                ..ImportConfig::default()
            },
            ..EngineConfig::default()
        },
        store,
    )
    .unwrap()
}

fn analyze_and_import(engine: &Engine<DurableGraphStore>, elements: &ElementSet) -> ImportReport {
    let run = engine.begin_run();
    let analysis = engine.analyze_topology(&run, elements).unwrap();
    engine.import_analysis(&run, elements, &analysis).unwrap()
}

#[test]
fn imported_graph_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let elements = model();

    let report = {
        let engine = durable_engine(dir.path());
        analyze_and_import(&engine, &elements)
    };
    assert!(report.is_complete());
    assert_eq!(report.nodes_created, elements.len() + 1);

    let store = DurableGraphStore::open(dir.path()).unwrap();
    assert_eq!(store.node_count().unwrap(), (elements.len() + 1) as u64);
    assert_eq!(
        store.relationship_count().unwrap(),
        report.relationships_created as u64
    );

    let wall = store.node("Wall1").unwrap().unwrap();
    assert!(wall.labels.contains("Entity"));
    assert!(store.node("material:Concrete").unwrap().is_some());
    assert!(store.relationship("Wall1", "ADJACENT", "Wall2").unwrap().is_some());
    assert!(store.relationship("Wall2", "ADJACENT", "Wall1").unwrap().is_some());
    assert!(store.relationship("Door1", "ADJACENT", "Wall1").unwrap().is_some());
}

#[test]
fn reimport_after_reopen_creates_nothing() {
    let dir = tempfile::TempDir::new().unwrap();
    let elements = model();

    let first = {
        let engine = durable_engine(dir.path());
        analyze_and_import(&engine, &elements)
    };
    let second = {
        let engine = durable_engine(dir.path());
        analyze_and_import(&engine, &elements)
    };

    assert!(second.is_complete());
    assert_eq!(second.nodes_written, first.nodes_written);
    assert_eq!(second.relationships_written, first.relationships_written);
    assert_eq!(second.nodes_created, 0);
    assert_eq!(second.relationships_created, 0);

    let store = DurableGraphStore::open(dir.path()).unwrap();
    assert_eq!(
        store.relationship_count().unwrap(),
        first.relationships_created as u64
    );
}

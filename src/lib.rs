// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # topograph
//!
//! Topological relationship inference for building models, and import of
//! the results into a graph database.
//!
//! ## Architecture
//!
//! - **Elements** (`element`): parsed building elements with raw geometry and declared relations
//! - **Geometry kernel** (`kernel`): primitive construction and predicates behind a trait
//! - **Resolver** (`resolver`): volume → surface → curve fallback with tolerance relaxation
//! - **Extraction** (`extract`): adjacency, containment and space boundaries in parallel
//! - **Connectivity** (`connectivity`, `pathfind`): petgraph union of all relationships, BFS paths
//! - **Import** (`import`, `store`): batched, idempotent graph writes over pooled sessions
//!
//! Every cache lives in an [`run::AnalysisRun`], created per run and dropped
//! with it.
//!
//! ## Library usage
//!
//! ```no_run
//! use topograph::config::EngineConfig;
//! use topograph::element::ElementSet;
//! use topograph::engine::Engine;
//! use topograph::store::MemoryGraphStore;
//!
//! let elements = ElementSet::from_json_file(std::path::Path::new("model.json")).unwrap();
//! let engine = Engine::new(EngineConfig::default(), MemoryGraphStore::new()).unwrap();
//! let run = engine.begin_run();
//! let analysis = engine.analyze_topology(&run, &elements).unwrap();
//! engine.import_analysis(&run, &elements, &analysis).unwrap();
//! let path = engine.find_path("Door1", "Wall2", None, Some(5));
//! ```

pub mod config;
pub mod connectivity;
pub mod element;
pub mod engine;
pub mod error;
pub mod executor;
pub mod export;
pub mod extract;
pub mod import;
pub mod kernel;
pub mod pathfind;
pub mod provenance;
pub mod relation;
pub mod resolver;
pub mod run;
pub mod store;

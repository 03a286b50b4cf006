//! Engine facade: top-level API for topology analysis.
//!
//! The `Engine` owns the geometry kernel, the worker pool and the graph
//! database session pool, and exposes the three operations surrounding
//! tooling needs: analyze an element set, import the result into a graph
//! database, and find paths through the latest analysis.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::connectivity::ConnectivityGraph;
use crate::element::{ElementId, ElementSet};
use crate::error::TopoResult;
use crate::executor::ParallelBatchExecutor;
use crate::export::TopologyExport;
use crate::extract::{ExtractedMap, RelationshipExtractor};
use crate::import::{ImportPipeline, ImportReport, declared_relationships};
use crate::kernel::{GeometryKernel, MeshKernel};
use crate::pathfind::{self, GraphPath, KindFilter};
use crate::relation::RelationshipRecord;
use crate::resolver::{ResolutionSummary, Resolver};
use crate::run::AnalysisRun;
use crate::store::{GraphBackend, MemoryGraphStore, SessionPool};

/// Everything one analysis produced.
///
/// Proxies stay in the [`AnalysisRun`]; this holds only the serialisable
/// results plus the connectivity graph built from them.
#[derive(Debug, Clone)]
pub struct TopologyAnalysis {
    pub run_id: u64,
    pub tolerance: f64,
    pub resolution: ResolutionSummary,
    /// Elements whose proxy could not be built, with the reason.
    pub unresolved: Vec<(ElementId, String)>,
    pub adjacency: Arc<ExtractedMap>,
    pub containment: Arc<ExtractedMap>,
    pub boundary: Arc<ExtractedMap>,
    pub graph: ConnectivityGraph,
}

impl TopologyAnalysis {
    /// Every relationship in the graph, in insertion order.
    pub fn records(&self) -> Vec<RelationshipRecord> {
        self.graph.records().cloned().collect()
    }

    pub fn export(&self) -> TopologyExport {
        TopologyExport::from_analysis(self)
    }
}

/// The topology engine.
pub struct Engine<B: GraphBackend = MemoryGraphStore, K: GeometryKernel = MeshKernel> {
    config: EngineConfig,
    kernel: K,
    executor: ParallelBatchExecutor,
    pool: SessionPool<B>,
    latest: RwLock<Option<Arc<TopologyAnalysis>>>,
}

impl<B: GraphBackend> Engine<B, MeshKernel> {
    /// Create an engine using the bundled mesh kernel.
    pub fn new(config: EngineConfig, backend: B) -> TopoResult<Self> {
        Self::with_kernel(config, backend, MeshKernel::new())
    }
}

impl<B: GraphBackend, K: GeometryKernel> Engine<B, K> {
    pub fn with_kernel(config: EngineConfig, backend: B, kernel: K) -> TopoResult<Self> {
        config.validate()?;
        let executor = ParallelBatchExecutor::new(config.executor.workers)?;
        let max_sessions = match config.import.max_sessions {
            0 => executor.workers(),
            n => n,
        };
        let pool = SessionPool::new(
            backend,
            max_sessions,
            Duration::from_millis(config.import.acquire_timeout_ms),
        );
        tracing::info!(
            workers = executor.workers(),
            sessions = max_sessions,
            backend = pool.backend().name(),
            tolerance = config.extraction.tolerance,
            "initializing topograph engine"
        );
        Ok(Self {
            config,
            kernel,
            executor,
            pool,
            latest: RwLock::new(None),
        })
    }

    /// Start a fresh run context; drop it to discard its caches.
    pub fn begin_run(&self) -> AnalysisRun<K::Shape> {
        AnalysisRun::new()
    }

    /// Resolve proxies, extract the three relationship maps concurrently
    /// and build the connectivity graph.
    ///
    /// The result also becomes the graph [`Engine::find_path`] searches.
    pub fn analyze_topology(
        &self,
        run: &AnalysisRun<K::Shape>,
        elements: &ElementSet,
    ) -> TopoResult<Arc<TopologyAnalysis>> {
        let resolver = Resolver::new(&self.kernel, self.config.resolver.clone());
        let resolution = resolver.resolve_all(run, elements, &self.executor)?;

        let tolerance = self.config.extraction.tolerance;
        let extractor =
            RelationshipExtractor::new(&self.kernel, &self.executor, self.config.extraction.clone());
        let maps = extractor.extract_all(run, elements, tolerance)?;

        let graph = ConnectivityGraph::build(
            elements,
            &maps.adjacency.map,
            &maps.containment.map,
            &maps.boundary.map,
        );
        let unresolved = run
            .unresolved_ids()
            .into_iter()
            .map(|id| {
                let reason = run.unresolved_reason(id.as_str()).unwrap_or_default();
                (id, reason)
            })
            .collect();

        let analysis = Arc::new(TopologyAnalysis {
            run_id: run.id(),
            tolerance,
            resolution,
            unresolved,
            adjacency: maps.adjacency,
            containment: maps.containment,
            boundary: maps.boundary,
            graph,
        });
        tracing::info!(
            run = run.id(),
            nodes = analysis.graph.node_count(),
            edges = analysis.graph.edge_count(),
            elapsed_ms = run.elapsed().as_millis() as u64,
            "topology analysis finished"
        );
        *self.latest.write().expect("latest analysis lock poisoned") = Some(Arc::clone(&analysis));
        Ok(analysis)
    }

    /// Write elements and `records` to the graph database in batches of
    /// `batch_size` rows.
    pub fn import_to_graph(
        &self,
        run: &AnalysisRun<K::Shape>,
        elements: &ElementSet,
        records: &[RelationshipRecord],
        batch_size: usize,
    ) -> TopoResult<ImportReport> {
        let mut config = self.config.import.clone();
        config.batch_size = batch_size;
        let pipeline = ImportPipeline::new(&self.pool, &self.executor, config);
        Ok(pipeline.import(run, elements, records)?)
    }

    /// Import an analysis together with the declared relations and material
    /// associations of its elements, at the configured batch size.
    pub fn import_analysis(
        &self,
        run: &AnalysisRun<K::Shape>,
        elements: &ElementSet,
        analysis: &TopologyAnalysis,
    ) -> TopoResult<ImportReport> {
        let mut records = analysis.records();
        records.extend(declared_relationships(elements));
        self.import_to_graph(run, elements, &records, self.config.import.batch_size)
    }

    /// Shortest path through the latest analysis. Defaults: every kind,
    /// the configured depth bound. Empty before any analysis.
    pub fn find_path(
        &self,
        start: &str,
        end: &str,
        allowed: Option<&KindFilter>,
        max_depth: Option<usize>,
    ) -> GraphPath {
        let Some(analysis) = self.latest_analysis() else {
            tracing::debug!("no analysis yet, path is empty");
            return GraphPath::default();
        };
        let all = KindFilter::all();
        pathfind::find_path(
            &analysis.graph,
            start,
            end,
            allowed.unwrap_or(&all),
            max_depth.unwrap_or(self.config.path.max_depth),
        )
    }

    pub fn latest_analysis(&self) -> Option<Arc<TopologyAnalysis>> {
        self.latest
            .read()
            .expect("latest analysis lock poisoned")
            .clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        self.pool.backend()
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn executor(&self) -> &ParallelBatchExecutor {
        &self.executor
    }
}

impl<B: GraphBackend, K: GeometryKernel> std::fmt::Debug for Engine<B, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::element::{DeclaredKind, ElementRecord, RawGeometry};
    use crate::error::{ConfigError, TopoError};
    use crate::relation::RelationshipKind;

    fn config() -> EngineConfig {
        EngineConfig {
            executor: ExecutorConfig { workers: 2 },
            ..EngineConfig::default()
        }
    }

    fn scenario() -> ElementSet {
        ElementSet::new(vec![
            ElementRecord::new("Space1", "IfcSpace")
                .with_geometry(RawGeometry::cuboid([0.0, 0.2, 0.0], [2.0, 4.0, 3.0])),
            ElementRecord::new("Wall1", "IfcWall")
                .with_geometry(RawGeometry::cuboid([0.0, 0.0, 0.0], [1.0, 0.2, 3.0])),
            ElementRecord::new("Wall2", "IfcWall")
                .with_geometry(RawGeometry::cuboid([1.0, 0.0, 0.0], [2.0, 0.2, 3.0])),
            ElementRecord::new("Door1", "IfcDoor")
                .with_geometry(RawGeometry::cuboid([0.3, 0.0, 0.0], [0.7, 0.2, 2.1]))
                .declare(DeclaredKind::FillsOpeningOf, "Wall1"),
        ])
        .unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut bad = config();
        bad.import.batch_size = 0;
        let err = Engine::new(bad, MemoryGraphStore::new()).unwrap_err();
        assert!(matches!(err, TopoError::Config(ConfigError::Invalid { .. })));
    }

    #[test]
    fn find_path_before_analysis_is_empty() {
        let engine = Engine::new(config(), MemoryGraphStore::new()).unwrap();
        assert!(engine.find_path("a", "b", None, None).is_empty());
    }

    #[test]
    fn analysis_feeds_path_finding() {
        let engine = Engine::new(config(), MemoryGraphStore::new()).unwrap();
        let run = engine.begin_run();
        let analysis = engine.analyze_topology(&run, &scenario()).unwrap();
        assert_eq!(analysis.resolution.resolved, 4);
        assert!(analysis.unresolved.is_empty());

        let adjacency = KindFilter::only([RelationshipKind::Adjacency]);
        let path = engine.find_path("Door1", "Wall2", Some(&adjacency), Some(5));
        assert_eq!(path.node_ids(), vec!["Door1", "Wall1", "Wall2"]);
    }

    #[test]
    fn import_analysis_writes_to_backend() {
        let store = MemoryGraphStore::new();
        let engine = Engine::new(config(), store.clone()).unwrap();
        let run = engine.begin_run();
        let elements = scenario();
        let analysis = engine.analyze_topology(&run, &elements).unwrap();
        let report = engine.import_analysis(&run, &elements, &analysis).unwrap();
        assert_eq!(report.nodes_written, 4);
        assert!(report.is_complete());
        assert!(store.relationship("Wall1", "ADJACENT", "Wall2").is_some());
        assert!(store.relationship("Door1", "FILLS", "Wall1").is_some());
    }
}

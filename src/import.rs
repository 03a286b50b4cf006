//! Graph import pipeline: elements and relationships into a graph database.
//!
//! Nodes are written first, grouped by label set, then relationships,
//! grouped by kind. Every group is cut into batches of `batch_size` rows;
//! each batch is one parameterised multi-row write on its own pooled
//! session, run on the [`ParallelBatchExecutor`].
//!
//! A batch the backend rejects or that times out is logged, counted and
//! skipped, and relationships touching a node whose batch failed are left
//! for a later import. Only a lost connection aborts the import.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::ImportConfig;
use crate::element::{ENTITY_LABEL, ElementId, ElementSet, MATERIAL_LABEL};
use crate::error::{ImportError, StoreError};
use crate::executor::ParallelBatchExecutor;
use crate::relation::{PropValue, PropertyBag, RelationshipKind, RelationshipRecord};
use crate::run::{AnalysisRun, CacheKey, CacheOp, CacheStats, LinkCache};
use crate::store::{
    EdgeRow, GraphBackend, GraphSession, NodeRow, SessionPool, WriteOp, WriteSummary,
};

/// Result type for import operations.
pub type ImportResult<T> = std::result::Result<T, ImportError>;

/// Identifier of the node standing for a material.
pub fn material_id(name: &str) -> String {
    format!("material:{name}")
}

/// One batch that was not committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFailure {
    /// `nodes` or `relationships`.
    pub phase: String,
    pub batch_index: usize,
    pub rows: usize,
    pub message: String,
}

/// Counts of one import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Node rows in committed batches.
    pub nodes_written: usize,
    /// Relationship rows merged in committed batches; unmatched rows are
    /// not included.
    pub relationships_written: usize,
    /// Nodes the backend actually created.
    pub nodes_created: usize,
    /// Relationships the backend actually created.
    pub relationships_created: usize,
    /// Relationship rows whose endpoint node was missing in the database.
    pub unmatched: usize,
    pub batches: usize,
    pub successful_batches: usize,
    pub failed_batches: usize,
    pub failures: Vec<ImportFailure>,
    pub skipped_self_edges: usize,
    /// Relationships whose endpoint is neither an element nor a material.
    pub skipped_dangling: usize,
    /// Relationships left out because an endpoint's node batch failed.
    pub skipped_unwritten: usize,
    /// Writes left out because this run already issued them.
    pub duplicates: usize,
    /// Inferred relationships deleted before writing.
    pub cleared: usize,
    pub cache: CacheStats,
    pub elapsed_ms: u64,
}

impl ImportReport {
    pub fn is_complete(&self) -> bool {
        self.failed_batches == 0
    }
}

/// One planned write and the link-cache keys it covers.
#[derive(Debug)]
struct Job {
    op: WriteOp,
    keys: Vec<CacheKey>,
}

/// Rows grouped by a key in first-appearance order.
struct Groups<K, R> {
    order: Vec<(K, Vec<R>)>,
    index: HashMap<K, usize>,
}

impl<K: Clone + Eq + std::hash::Hash, R> Groups<K, R> {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn push(&mut self, key: K, row: R) {
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                self.order.push((key.clone(), Vec::new()));
                self.index.insert(key, self.order.len() - 1);
                self.order.len() - 1
            }
        };
        self.order[slot].1.push(row);
    }
}

/// Writes elements and relationships through a [`SessionPool`].
pub struct ImportPipeline<'a, B: GraphBackend> {
    pool: &'a SessionPool<B>,
    executor: &'a ParallelBatchExecutor,
    config: ImportConfig,
}

impl<'a, B: GraphBackend> ImportPipeline<'a, B> {
    pub fn new(pool: &'a SessionPool<B>, executor: &'a ParallelBatchExecutor, config: ImportConfig) -> Self {
        Self {
            pool,
            executor,
            config,
        }
    }

    /// Import every element as a node and every relationship as an edge.
    ///
    /// Writes already issued in `run` are skipped, so no
    /// `(source, target, kind)` triple is sent twice per run.
    pub fn import<S>(
        &self,
        run: &AnalysisRun<S>,
        elements: &ElementSet,
        records: &[RelationshipRecord],
    ) -> ImportResult<ImportReport> {
        let batch_size = self.config.batch_size;
        if batch_size == 0 {
            return Err(ImportError::InvalidBatchSize { batch_size });
        }
        let started = Instant::now();
        let cache = run.link_cache();
        let mut report = ImportReport::default();

        if self.config.clear_inferred {
            report.cleared = self.clear_inferred()?;
        }

        let (node_jobs, known) = plan_nodes(elements, cache, batch_size, &mut report);
        tracing::debug!(node_batches = node_jobs.len(), batch_size, "node writes planned");
        let failed = self.execute(&node_jobs, "nodes", cache, &mut report)?;

        let unwritten: HashSet<String> = failed
            .iter()
            .flat_map(|&index| node_jobs[index].op.identifiers())
            .map(str::to_string)
            .collect();
        let edge_jobs = plan_relationships(
            records,
            &known,
            &unwritten,
            cache,
            batch_size,
            &mut report,
        );
        tracing::debug!(relationship_batches = edge_jobs.len(), batch_size, "relationship writes planned");
        self.execute(&edge_jobs, "relationships", cache, &mut report)?;

        report.cache = cache.stats();
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            backend = self.pool.backend().name(),
            nodes = report.nodes_written,
            relationships = report.relationships_written,
            created_nodes = report.nodes_created,
            created_relationships = report.relationships_created,
            failed_batches = report.failed_batches,
            elapsed_ms = report.elapsed_ms,
            "import finished"
        );
        tracing::info!(
            hits = report.cache.hits,
            misses = report.cache.misses,
            size = report.cache.size,
            hit_ratio = report.cache.hit_ratio(),
            "link cache statistics"
        );
        Ok(report)
    }

    fn clear_inferred(&self) -> ImportResult<usize> {
        let outcome = self
            .pool
            .acquire()
            .and_then(|mut session| session.clear_inferred());
        match outcome {
            Ok(removed) => {
                tracing::info!(removed, "inferred relationships cleared");
                Ok(removed)
            }
            Err(e) if e.is_fatal() => Err(ImportError::ConnectionLost {
                batches_done: 0,
                source: e,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "clearing inferred relationships failed");
                Ok(0)
            }
        }
    }

    /// One write on a pooled session; the session goes back to the pool on
    /// every path, or is closed after a fatal error.
    fn write(&self, op: &WriteOp) -> Result<WriteSummary, StoreError> {
        let mut session = self.pool.acquire()?;
        let deadline = Instant::now() + Duration::from_millis(self.config.write_timeout_ms);
        let outcome = session.run(op, deadline);
        if outcome.as_ref().is_err_and(StoreError::is_fatal) {
            session.discard();
        }
        outcome
    }

    /// Run `jobs` one per batch; returns the indices of the jobs that were
    /// not committed.
    fn execute(
        &self,
        jobs: &[Job],
        phase: &'static str,
        cache: &LinkCache,
        report: &mut ImportReport,
    ) -> ImportResult<Vec<usize>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let lost = AtomicBool::new(false);
        let batches = self.executor.run_batches(jobs, 1, |batch_index, batch| {
            let mut summary = WriteSummary::default();
            for job in batch {
                if lost.load(Ordering::Acquire) {
                    return Ok::<_, Infallible>(Err(StoreError::ConnectionLost {
                        message: "connection lost by an earlier batch".into(),
                    }));
                }
                match self.write(&job.op) {
                    Ok(s) => summary.absorb(s),
                    Err(e) => {
                        if e.is_fatal() {
                            lost.store(true, Ordering::Release);
                        } else {
                            tracing::warn!(
                                phase,
                                batch = batch_index,
                                rows = job.op.rows(),
                                error = %e,
                                "batch write failed, skipping"
                            );
                        }
                        return Ok(Err(e));
                    }
                }
            }
            Ok(Ok(summary))
        })?;

        report.batches += batches.batches;
        let mut fatal = None;
        let mut failed = Vec::new();
        for failure in &batches.failures {
            // Panicked batches.
            failed.push(failure.batch_index);
            report.failed_batches += 1;
            release(cache, &jobs[failure.batch_index]);
            report.failures.push(ImportFailure {
                phase: phase.to_string(),
                batch_index: failure.batch_index,
                rows: jobs[failure.batch_index].op.rows(),
                message: failure.message.clone(),
            });
        }
        for (batch_index, outcome) in batches.results {
            let job = &jobs[batch_index];
            match outcome {
                Ok(summary) => {
                    report.successful_batches += 1;
                    // Unmatched rows were not written; let a later import retry them.
                    for key in summary.unmatched_rows.iter().filter_map(|&row| job.keys.get(row)) {
                        cache.release(key);
                    }
                    if job.op.is_node_write() {
                        report.nodes_written += summary.matched_rows();
                    } else {
                        report.relationships_written += summary.matched_rows();
                    }
                    report.nodes_created += summary.nodes_created;
                    report.relationships_created += summary.relationships_created;
                    report.unmatched += summary.unmatched;
                }
                Err(e) if e.is_fatal() => {
                    release(cache, job);
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    failed.push(batch_index);
                    report.failed_batches += 1;
                    release(cache, job);
                    report.failures.push(ImportFailure {
                        phase: phase.to_string(),
                        batch_index,
                        rows: job.op.rows(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(source) = fatal {
            tracing::error!(
                phase,
                batches_done = report.successful_batches,
                error = %source,
                "graph database connection lost, aborting import"
            );
            return Err(ImportError::ConnectionLost {
                batches_done: report.successful_batches,
                source,
            });
        }
        failed.sort_unstable();
        Ok(failed)
    }
}

/// Forget the cache keys of an uncommitted batch so a later import retries
/// them.
fn release(cache: &LinkCache, job: &Job) {
    for key in &job.keys {
        cache.release(key);
    }
}

fn node_properties(identifier: &str, name: &str, type_tag: &str) -> PropertyBag {
    PropertyBag::from([
        ("identifier".to_string(), PropValue::from(identifier)),
        ("name".to_string(), PropValue::from(name)),
        ("type".to_string(), PropValue::from(type_tag)),
    ])
}

/// Node batches for every element and material, plus every identifier a
/// relationship may point at.
fn plan_nodes(
    elements: &ElementSet,
    cache: &LinkCache,
    batch_size: usize,
    report: &mut ImportReport,
) -> (Vec<Job>, HashSet<String>) {
    let mut known = HashSet::new();
    let mut groups: Groups<Vec<String>, (NodeRow, CacheKey)> = Groups::new();
    let mut add = |labels: Vec<String>, row: NodeRow| {
        known.insert(row.identifier.clone());
        let id = ElementId::new(row.identifier.clone());
        let key: CacheKey = (CacheOp::Node, id.clone(), id);
        if cache.check_and_mark(key.clone()) {
            groups.push(labels, (row, key));
        } else {
            report.duplicates += 1;
        }
    };

    for element in elements {
        let id = element.id.as_str();
        add(
            element.class().node_labels(&element.type_tag),
            NodeRow {
                identifier: id.to_string(),
                properties: node_properties(id, element.display_name(), &element.type_tag),
            },
        );
    }

    let material_labels = vec![MATERIAL_LABEL.to_string(), ENTITY_LABEL.to_string()];
    let catalogue = elements.materials().iter().map(|m| (m.name.as_str(), m.category.as_deref()));
    let referenced = elements
        .iter()
        .flat_map(|e| e.materials.iter().map(|m| (m.as_str(), None)));
    let mut seen = HashSet::new();
    for (name, category) in catalogue.chain(referenced) {
        if !seen.insert(name) {
            continue;
        }
        let identifier = material_id(name);
        let mut properties = node_properties(&identifier, name, MATERIAL_LABEL);
        if let Some(category) = category {
            properties.insert("category".into(), PropValue::from(category));
        }
        add(
            material_labels.clone(),
            NodeRow {
                identifier,
                properties,
            },
        );
    }

    let jobs = groups
        .order
        .into_iter()
        .flat_map(|(labels, rows)| {
            rows.chunks(batch_size)
                .map(|chunk| Job {
                    op: WriteOp::UpsertNodes {
                        labels: labels.clone(),
                        rows: chunk.iter().map(|(row, _)| row.clone()).collect(),
                    },
                    keys: chunk.iter().map(|(_, key)| key.clone()).collect(),
                })
                .collect::<Vec<_>>()
        })
        .collect();
    (jobs, known)
}

/// Relationship batches, one label per batch, without self-edges, dangling
/// or unwritten endpoints, or writes this run already issued.
fn plan_relationships(
    records: &[RelationshipRecord],
    known: &HashSet<String>,
    unwritten: &HashSet<String>,
    cache: &LinkCache,
    batch_size: usize,
    report: &mut ImportReport,
) -> Vec<Job> {
    let mut groups: Groups<RelationshipKind, (EdgeRow, CacheKey)> = Groups::new();
    for record in records {
        if record.is_self_edge() {
            report.skipped_self_edges += 1;
            continue;
        }
        if !known.contains(record.source.as_str()) || !known.contains(record.target.as_str()) {
            report.skipped_dangling += 1;
            continue;
        }
        if unwritten.contains(record.source.as_str()) || unwritten.contains(record.target.as_str()) {
            report.skipped_unwritten += 1;
            continue;
        }
        let key: CacheKey = (
            CacheOp::Link(record.kind),
            record.source.clone(),
            record.target.clone(),
        );
        if !cache.check_and_mark(key.clone()) {
            report.duplicates += 1;
            continue;
        }
        let mut properties = record.properties.clone();
        properties.insert("kind".into(), PropValue::from(record.kind.name()));
        properties.insert("provenance".into(), PropValue::from(record.provenance.as_str()));
        let row = EdgeRow {
            source: record.source.to_string(),
            target: record.target.to_string(),
            properties,
        };
        groups.push(record.kind, (row, key));
    }
    if report.skipped_dangling > 0 {
        tracing::warn!(
            skipped = report.skipped_dangling,
            "relationships with unknown endpoints not imported"
        );
    }
    if report.skipped_unwritten > 0 {
        tracing::warn!(
            skipped = report.skipped_unwritten,
            "relationships whose endpoint node failed to write not imported"
        );
    }

    groups
        .order
        .into_iter()
        .flat_map(|(kind, rows)| {
            rows.chunks(batch_size)
                .map(|chunk| Job {
                    op: WriteOp::UpsertRelationships {
                        label: kind.label().to_string(),
                        rows: chunk.iter().map(|(row, _)| row.clone()).collect(),
                    },
                    keys: chunk.iter().map(|(_, key)| key.clone()).collect(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Declared relations and material associations as importable records.
pub fn declared_relationships(elements: &ElementSet) -> Vec<RelationshipRecord> {
    let mut records = Vec::new();
    for element in elements {
        for relation in &element.declared {
            records.push(RelationshipRecord::declared(
                element.id.clone(),
                relation.target.clone(),
                RelationshipKind::Declared(relation.kind),
            ));
        }
        for material in &element.materials {
            records.push(RelationshipRecord::declared(
                element.id.clone(),
                material_id(material),
                RelationshipKind::MadeOf,
            ));
        }
    }
    records
}

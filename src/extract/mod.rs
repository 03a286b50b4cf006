//! Relationship extraction over resolved proxies.
//!
//! Three independent maps are computed per tolerance: adjacency,
//! containment and space boundaries. Each is cached in the
//! [`AnalysisRun`], so asking twice for the same tolerance returns the
//! stored map. Pairwise kernel tests run in outer-index batches on the
//! [`ParallelBatchExecutor`]; each batch walks its pairs sequentially.
//!
//! A predicate that errors leaves its pair *indeterminate*: it is counted
//! in [`ExtractionStats::indeterminate`] and produces no relationship.

mod adjacency;
mod boundary;
mod containment;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ExtractionConfig;
use crate::element::{ElementClass, ElementId, ElementSet};
use crate::error::ExecutorError;
use crate::executor::ParallelBatchExecutor;
use crate::kernel::{GeometryKernel, KernelResult, Tier};
use crate::relation::RelationshipMap;
use crate::run::AnalysisRun;

/// Which relationship map a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKind {
    Adjacency,
    Containment,
    Boundary,
}

/// Result of testing one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    Positive,
    Negative,
    /// The kernel predicate failed.
    Indeterminate,
}

/// Counters of one extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Resolved proxies taking part in pairwise tests.
    pub proxies: usize,
    pub pairs_tested: usize,
    pub positive: usize,
    pub negative: usize,
    pub indeterminate: usize,
    /// Proxy coverage was too low and declared relations were used instead.
    pub fallback: bool,
    /// Records contributed by declared relations.
    pub declared: usize,
}

impl ExtractionStats {
    fn absorb(&mut self, outcome: PairOutcome) {
        self.pairs_tested += 1;
        match outcome {
            PairOutcome::Positive => self.positive += 1,
            PairOutcome::Negative => self.negative += 1,
            PairOutcome::Indeterminate => self.indeterminate += 1,
        }
    }
}

/// A relationship map with the statistics of its extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedMap {
    pub map: RelationshipMap,
    pub stats: ExtractionStats,
}

/// The three maps of one analysis.
#[derive(Debug, Clone)]
pub struct ExtractedMaps {
    pub adjacency: Arc<ExtractedMap>,
    pub containment: Arc<ExtractedMap>,
    pub boundary: Arc<ExtractedMap>,
}

/// One resolved element taking part in pairwise tests.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub id: ElementId,
    pub class: ElementClass,
    pub tier: Tier,
    pub handle: usize,
}

/// Which pairs of entries to test.
#[derive(Clone, Copy)]
pub(crate) enum Pairing<'a> {
    /// Every unordered pair of one list, `(i, j)` with `j > i`.
    Unordered(&'a [Entry]),
    /// Every ordered pair of one list with `i != j`.
    Ordered(&'a [Entry]),
    /// Every pair of the outer list with the inner list, skipping
    /// identical elements.
    Cross(&'a [Entry], &'a [Entry]),
}

impl<'a> Pairing<'a> {
    fn outer(&self) -> &'a [Entry] {
        match *self {
            Pairing::Unordered(list) | Pairing::Ordered(list) => list,
            Pairing::Cross(outer, _) => outer,
        }
    }

    fn inner(&self) -> &'a [Entry] {
        match *self {
            Pairing::Unordered(list) | Pairing::Ordered(list) => list,
            Pairing::Cross(_, inner) => inner,
        }
    }

    fn includes(&self, i: usize, j: usize) -> bool {
        match *self {
            Pairing::Unordered(_) => j > i,
            Pairing::Ordered(_) => j != i,
            Pairing::Cross(outer, inner) => outer[i].id != inner[j].id,
        }
    }
}

/// Positive pairs of a scan, as `(outer, inner)` indices in scan order.
#[derive(Debug, Default)]
pub(crate) struct PairScan {
    pub hits: Vec<(usize, usize)>,
    pub stats: ExtractionStats,
}

/// Computes adjacency, containment and space-boundary maps.
pub struct RelationshipExtractor<'a, K: GeometryKernel> {
    kernel: &'a K,
    executor: &'a ParallelBatchExecutor,
    config: ExtractionConfig,
}

impl<'a, K: GeometryKernel> RelationshipExtractor<'a, K> {
    pub fn new(kernel: &'a K, executor: &'a ParallelBatchExecutor, config: ExtractionConfig) -> Self {
        Self {
            kernel,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// All three maps, computed concurrently.
    pub fn extract_all(
        &self,
        run: &AnalysisRun<K::Shape>,
        elements: &ElementSet,
        tolerance: f64,
    ) -> Result<ExtractedMaps, ExecutorError> {
        let (adjacency, (containment, boundary)) = self.executor.install(|| {
            rayon::join(
                || self.adjacency(run, elements, tolerance),
                || {
                    rayon::join(
                        || self.containment(run, elements, tolerance),
                        || self.space_boundaries(run, elements, tolerance),
                    )
                },
            )
        });
        Ok(ExtractedMaps {
            adjacency: adjacency?,
            containment: containment?,
            boundary: boundary?,
        })
    }

    /// Resolved elements in element-set order.
    pub(crate) fn entries(&self, run: &AnalysisRun<K::Shape>, elements: &ElementSet) -> Vec<Entry> {
        elements
            .iter()
            .filter_map(|element| {
                let proxy = run.proxy(element.id.as_str())?;
                Some(Entry {
                    id: element.id.clone(),
                    class: element.class(),
                    tier: proxy.tier,
                    handle: proxy.handle.index(),
                })
            })
            .collect()
    }

    /// Whether proxy coverage is too low for geometric inference.
    pub(crate) fn needs_fallback(&self, resolved: usize, elements: &ElementSet) -> bool {
        let candidates = elements.geometry_candidates();
        let coverage = if candidates == 0 {
            0.0
        } else {
            resolved as f64 / candidates as f64
        };
        let fallback =
            resolved < self.config.min_resolved || coverage < self.config.min_coverage;
        if fallback {
            tracing::warn!(
                resolved,
                candidates,
                coverage,
                min_resolved = self.config.min_resolved,
                min_coverage = self.config.min_coverage,
                "proxy coverage too low, using declared relationships"
            );
        }
        fallback
    }

    /// Test every pair of `pairing` with `test` on the executor.
    ///
    /// Batches cover consecutive outer indices and hits come back sorted by
    /// `(outer, inner)`, so the result is deterministic.
    pub(crate) fn scan<F>(
        &self,
        run: &AnalysisRun<K::Shape>,
        pairing: Pairing<'_>,
        tolerance: f64,
        predicate: &str,
        test: F,
    ) -> Result<PairScan, ExecutorError>
    where
        F: Fn(&K, (&K::Shape, &Entry), (&K::Shape, &Entry), f64) -> KernelResult<bool> + Sync,
    {
        let outer = pairing.outer();
        let inner = pairing.inner();
        let indices: Vec<usize> = (0..outer.len()).collect();

        let batches = self
            .executor
            .process_batches(&indices, self.config.pair_batch_size, |_, batch| {
                let outcomes = run.with_handles(|handles| {
                    let mut outcomes = Vec::new();
                    for &i in batch {
                        let a = &outer[i];
                        for (j, b) in inner.iter().enumerate() {
                            if !pairing.includes(i, j) {
                                continue;
                            }
                            let outcome = match test(
                                self.kernel,
                                (&handles[a.handle], a),
                                (&handles[b.handle], b),
                                tolerance,
                            ) {
                                Ok(true) => PairOutcome::Positive,
                                Ok(false) => PairOutcome::Negative,
                                Err(e) => {
                                    tracing::debug!(
                                        a = %a.id,
                                        b = %b.id,
                                        predicate,
                                        error = %e,
                                        "predicate failed, pair indeterminate"
                                    );
                                    PairOutcome::Indeterminate
                                }
                            };
                            outcomes.push((i, j, outcome));
                        }
                    }
                    outcomes
                });
                Ok::<_, std::convert::Infallible>(outcomes)
            })?;

        let mut scan = PairScan::default();
        scan.stats.proxies = outer.len().max(inner.len());
        for (i, j, outcome) in batches.into_iter().flatten() {
            scan.stats.absorb(outcome);
            if outcome == PairOutcome::Positive {
                scan.hits.push((i, j));
            }
        }
        if scan.stats.indeterminate > 0 {
            tracing::warn!(
                predicate,
                indeterminate = scan.stats.indeterminate,
                tested = scan.stats.pairs_tested,
                "some pairs could not be decided"
            );
        }
        Ok(scan)
    }
}

//! Geometric entity resolver: raw element geometry to topological proxies.
//!
//! Each element is converted by walking a [`ResolutionPolicy`], an ordered
//! list of `(tier, attempt, tolerance)` steps derived from the element's
//! class. A small state machine tries one step at a time and stops at the
//! first success. Successful proxies land in the run's cache, failures are
//! recorded there with their reason, and neither is ever recomputed within
//! the same run.

use std::collections::BTreeMap;
use std::convert::Infallible;

use serde::{Deserialize, Serialize};

use crate::config::ResolverConfig;
use crate::element::{ElementRecord, ElementSet, RawGeometry};
use crate::error::{ExecutorError, GeometryError, KernelError};
use crate::executor::ParallelBatchExecutor;
use crate::kernel::{GeometryKernel, Tier};
use crate::run::{AnalysisRun, TopologicalProxy};

/// Minimum faces of a volume proxy.
pub const MIN_VOLUME_FACES: usize = 4;

/// One step of a resolution policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyStep {
    pub tier: Tier,
    /// Zero-based attempt within the tier.
    pub attempt: usize,
    pub tolerance: f64,
}

/// Ordered list of construction attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionPolicy {
    steps: Vec<PolicyStep>,
}

impl ResolutionPolicy {
    /// Every tier in order, each tried `max_attempts` times with the
    /// tolerance multiplied by `relax_factor` per retry.
    pub fn for_tiers(tiers: &[Tier], config: &ResolverConfig) -> Self {
        let steps = tiers
            .iter()
            .flat_map(|&tier| {
                (0..config.max_attempts).map(move |attempt| PolicyStep {
                    tier,
                    attempt,
                    tolerance: config.base_tolerance * config.relax_factor.powi(attempt as i32),
                })
            })
            .collect();
        Self { steps }
    }

    pub fn steps(&self) -> &[PolicyStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Outcome of resolving one element.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(TopologicalProxy),
    /// Every policy step failed, or there was no geometry to work with.
    Unresolved { reason: String, attempts: usize },
    /// Not a geometry candidate (project, site, building, storey).
    Skipped,
}

impl Resolution {
    pub fn proxy(&self) -> Option<&TopologicalProxy> {
        match self {
            Resolution::Resolved(proxy) => Some(proxy),
            _ => None,
        }
    }
}

/// Counts from resolving a whole element set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionSummary {
    pub resolved: usize,
    pub unresolved: usize,
    pub skipped: usize,
    pub by_tier: BTreeMap<Tier, usize>,
}

impl ResolutionSummary {
    /// Resolved share of the geometry candidates.
    pub fn coverage(&self) -> f64 {
        let candidates = self.resolved + self.unresolved;
        if candidates == 0 {
            0.0
        } else {
            self.resolved as f64 / candidates as f64
        }
    }
}

enum ResolveState<S> {
    Trying(usize),
    Built(PolicyStep, usize, S),
    Failed,
}

/// Converts element geometry into proxies through a [`GeometryKernel`].
pub struct Resolver<'k, K: GeometryKernel> {
    kernel: &'k K,
    config: ResolverConfig,
}

impl<'k, K: GeometryKernel> Resolver<'k, K> {
    pub fn new(kernel: &'k K, config: ResolverConfig) -> Self {
        Self { kernel, config }
    }

    pub fn policy_for(&self, element: &ElementRecord) -> ResolutionPolicy {
        ResolutionPolicy::for_tiers(element.class().preferred_tiers(), &self.config)
    }

    /// Resolve one element, consulting and filling the run's cache.
    pub fn resolve(&self, run: &AnalysisRun<K::Shape>, element: &ElementRecord) -> Resolution {
        if let Some(proxy) = run.proxy(element.id.as_str()) {
            return Resolution::Resolved(proxy);
        }
        if let Some(reason) = run.unresolved_reason(element.id.as_str()) {
            return Resolution::Unresolved {
                reason,
                attempts: 0,
            };
        }

        let policy = self.policy_for(element);
        if policy.is_empty() {
            return Resolution::Skipped;
        }

        let geometry = match element.geometry.as_ref() {
            Some(g) if !g.is_empty() => g,
            _ => {
                let reason = GeometryError::NoGeometry {
                    id: element.id.to_string(),
                }
                .to_string();
                run.mark_unresolved(element.id.clone(), reason.clone());
                return Resolution::Unresolved {
                    reason,
                    attempts: 0,
                };
            }
        };

        let steps = policy.steps();
        let mut last_error: Option<GeometryError> = None;
        let mut state = ResolveState::Trying(0);
        loop {
            state = match state {
                ResolveState::Trying(index) => match steps.get(index) {
                    None => ResolveState::Failed,
                    Some(step) => match self.build(step.tier, geometry, step.tolerance) {
                        Ok(shape) => ResolveState::Built(*step, index + 1, shape),
                        Err(e) => {
                            tracing::trace!(
                                element = %element.id,
                                tier = %step.tier,
                                attempt = step.attempt,
                                tolerance = step.tolerance,
                                error = %e,
                                "proxy attempt failed"
                            );
                            last_error = Some(e);
                            ResolveState::Trying(index + 1)
                        }
                    },
                },
                ResolveState::Built(step, attempts, shape) => {
                    let proxy = run.insert_proxy(
                        element.id.clone(),
                        step.tier,
                        shape,
                        step.tolerance,
                        attempts,
                    );
                    return Resolution::Resolved(proxy);
                }
                ResolveState::Failed => {
                    let attempts = steps.len();
                    let reason = match last_error {
                        Some(e) => format!(
                            "{}: {e}",
                            GeometryError::Unresolvable {
                                id: element.id.to_string(),
                                attempts,
                            }
                        ),
                        None => GeometryError::Unresolvable {
                            id: element.id.to_string(),
                            attempts,
                        }
                        .to_string(),
                    };
                    tracing::debug!(element = %element.id, %reason, "element unresolved");
                    run.mark_unresolved(element.id.clone(), reason.clone());
                    return Resolution::Unresolved { reason, attempts };
                }
            };
        }
    }

    /// Resolve every element of `elements` on the executor's workers.
    pub fn resolve_all(
        &self,
        run: &AnalysisRun<K::Shape>,
        elements: &ElementSet,
        executor: &ParallelBatchExecutor,
    ) -> Result<ResolutionSummary, ExecutorError> {
        let items = elements.as_slice();
        let batch_size = (items.len() / (executor.workers() * 4)).max(1);
        let outcomes = executor.process_batches(items, batch_size, |_, batch| {
            Ok::<_, Infallible>(
                batch
                    .iter()
                    .map(|element| self.resolve(run, element))
                    .collect::<Vec<_>>(),
            )
        })?;

        let mut summary = ResolutionSummary::default();
        for resolution in outcomes.iter().flatten() {
            match resolution {
                Resolution::Resolved(proxy) => {
                    summary.resolved += 1;
                    *summary.by_tier.entry(proxy.tier).or_default() += 1;
                }
                Resolution::Unresolved { .. } => summary.unresolved += 1,
                Resolution::Skipped => summary.skipped += 1,
            }
        }
        tracing::info!(
            resolved = summary.resolved,
            unresolved = summary.unresolved,
            skipped = summary.skipped,
            coverage = summary.coverage(),
            "geometry resolution finished"
        );
        Ok(summary)
    }

    fn build(
        &self,
        tier: Tier,
        geometry: &RawGeometry,
        tolerance: f64,
    ) -> Result<K::Shape, GeometryError> {
        match tier {
            Tier::Volume => self.build_volume(geometry, tolerance),
            Tier::Surface => self.build_surface(geometry, tolerance),
            Tier::Curve => self.build_curve(geometry, tolerance),
            Tier::PointCluster => self.build_point_cluster(geometry),
        }
    }

    fn build_volume(&self, geometry: &RawGeometry, tolerance: f64) -> Result<K::Shape, GeometryError> {
        let faces: Vec<K::Shape> = geometry
            .face_runs()
            .into_iter()
            .filter_map(|run| self.build_face(geometry, run, tolerance).ok())
            .collect();
        if faces.len() < MIN_VOLUME_FACES {
            return Err(GeometryError::NotEnoughFaces {
                found: faces.len(),
                required: MIN_VOLUME_FACES,
            });
        }
        Ok(self.kernel.volume(&faces, tolerance)?)
    }

    fn build_surface(&self, geometry: &RawGeometry, tolerance: f64) -> Result<K::Shape, GeometryError> {
        let runs = geometry.face_runs();
        runs.iter()
            .find_map(|run| self.build_face(geometry, run, tolerance).ok())
            .ok_or(GeometryError::NoValidFace { runs: runs.len() })
    }

    /// First-to-last vertex edge, else the chain of consecutive edges, else
    /// the first edge of the first face loop.
    fn build_curve(&self, geometry: &RawGeometry, tolerance: f64) -> Result<K::Shape, GeometryError> {
        let vertices: Vec<K::Shape> = geometry
            .vertices
            .iter()
            .map(|p| self.kernel.vertex(*p))
            .collect();

        if let (Some(first), Some(last)) = (vertices.first(), vertices.last()) {
            if vertices.len() >= 2 {
                if let Ok(edge) = self.kernel.edge(first, last, tolerance) {
                    return Ok(edge);
                }
            }
        }

        let mut chain: Vec<K::Shape> = vertices
            .windows(2)
            .filter_map(|pair| self.kernel.edge(&pair[0], &pair[1], tolerance).ok())
            .collect();
        if chain.len() == 1 {
            return Ok(chain.remove(0));
        }
        if !chain.is_empty() {
            return Ok(self.kernel.cluster(chain));
        }

        if let Some(run) = geometry.face_runs().first() {
            if let Ok(wire) = self.closed_loop(geometry, run, tolerance) {
                if let Some(edge) = self.kernel.edges(&wire).into_iter().next() {
                    return Ok(edge);
                }
            }
        }

        Err(GeometryError::NoCurve {
            vertices: geometry.vertices.len(),
        })
    }

    fn build_point_cluster(&self, geometry: &RawGeometry) -> Result<K::Shape, GeometryError> {
        if geometry.vertices.is_empty() {
            return Err(GeometryError::NoCurve { vertices: 0 });
        }
        let vertices = geometry
            .vertices
            .iter()
            .map(|p| self.kernel.vertex(*p))
            .collect();
        Ok(self.kernel.cluster(vertices))
    }

    fn build_face(
        &self,
        geometry: &RawGeometry,
        run: &[usize],
        tolerance: f64,
    ) -> Result<K::Shape, KernelError> {
        let wire = self.closed_loop(geometry, run, tolerance)?;
        self.kernel.face(&wire, tolerance)
    }

    /// Closed wire through one face run.
    ///
    /// The first vertex is repeated at the end unless the run already ends
    /// on it. If the kernel rejects the direct loop, the wire is assembled
    /// from edges between consecutive distinct vertices instead.
    fn closed_loop(
        &self,
        geometry: &RawGeometry,
        run: &[usize],
        tolerance: f64,
    ) -> Result<K::Shape, KernelError> {
        let mut points: Vec<[f64; 3]> = run.iter().map(|&i| geometry.vertices[i]).collect();
        let (first, last) = (points[0], points[points.len() - 1]);
        let closed = (0..3).all(|axis| (first[axis] - last[axis]).abs() <= tolerance);
        if !closed {
            points.push(first);
        }
        let vertices: Vec<K::Shape> = points.iter().map(|p| self.kernel.vertex(*p)).collect();

        match self.kernel.closed_wire(&vertices, tolerance) {
            Ok(wire) => Ok(wire),
            Err(direct) => {
                let edges: Vec<K::Shape> = vertices
                    .windows(2)
                    .filter_map(|pair| self.kernel.edge(&pair[0], &pair[1], tolerance).ok())
                    .collect();
                self.kernel.wire_from_edges(&edges, tolerance).map_err(|_| direct)
            }
        }
    }
}

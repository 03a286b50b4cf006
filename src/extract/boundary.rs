//! Space boundaries: elements bounding a space's volume.

use std::sync::Arc;

use crate::element::{DeclaredKind, ElementSet};
use crate::error::ExecutorError;
use crate::kernel::{GeometryKernel, touches};
use crate::relation::{RelationshipKind, RelationshipMap, RelationshipRecord};
use crate::run::AnalysisRun;

use super::{Entry, ExtractedMap, ExtractionStats, MapKind, Pairing, RelationshipExtractor};

impl<K: GeometryKernel> RelationshipExtractor<'_, K> {
    /// Bounds-space / bounded-by map at `tolerance`.
    ///
    /// Declared boundaries are always used. When fewer than
    /// `min_declared_boundaries` are declared, every resolved space is also
    /// tested against resolved walls, slabs, roofs, doors, windows and
    /// openings.
    pub fn space_boundaries(
        &self,
        run: &AnalysisRun<K::Shape>,
        elements: &ElementSet,
        tolerance: f64,
    ) -> Result<Arc<ExtractedMap>, ExecutorError> {
        if let Some(cached) = run.cached_map(MapKind::Boundary, tolerance) {
            return Ok(cached);
        }

        let mut map = RelationshipMap::new();
        let declared = declared_boundaries(elements, &mut map);
        let mut stats = ExtractionStats {
            declared: declared * 2,
            ..ExtractionStats::default()
        };

        if declared < self.config.min_declared_boundaries {
            tracing::debug!(
                declared,
                threshold = self.config.min_declared_boundaries,
                "few declared boundaries, adding geometric detection"
            );
            let entries = self.entries(run, elements);
            let (spaces, candidates): (Vec<Entry>, Vec<Entry>) = entries
                .into_iter()
                .filter(|e| e.class.is_space() || e.class.is_boundary_candidate())
                .partition(|e| e.class.is_space());

            let scan = self.scan(
                run,
                Pairing::Cross(&spaces, &candidates),
                tolerance,
                "space_boundary",
                |kernel, (space, s), (element, e), tol| {
                    touches(kernel, (element, e.tier), (space, s.tier), tol)
                },
            )?;
            for (i, j) in scan.hits {
                let record = RelationshipRecord::inferred(
                    candidates[j].id.clone(),
                    spaces[i].id.clone(),
                    RelationshipKind::BoundsSpace,
                    tolerance,
                )
                .with_property("boundary_type", "physical");
                map.insert_with_inverse(record);
            }
            stats = ExtractionStats {
                declared: stats.declared,
                ..scan.stats
            };
        }

        tracing::info!(
            records = map.len(),
            declared,
            tested = stats.pairs_tested,
            indeterminate = stats.indeterminate,
            tolerance,
            "space boundaries extracted"
        );
        Ok(run.cache_map(MapKind::Boundary, tolerance, ExtractedMap { map, stats }))
    }
}

/// Declared boundaries as bounds-space / bounded-by pairs; returns the
/// number of distinct declared pairs.
fn declared_boundaries(elements: &ElementSet, map: &mut RelationshipMap) -> usize {
    let mut count = 0;
    for element in elements {
        for space in element.declared_targets(DeclaredKind::BoundsSpace) {
            if !elements.contains(space.as_str()) {
                continue;
            }
            let record = RelationshipRecord::declared(
                element.id.clone(),
                space.clone(),
                RelationshipKind::BoundsSpace,
            )
            .with_property("boundary_type", "declared");
            if map.insert_with_inverse(record) {
                count += 1;
            }
        }
    }
    count
}

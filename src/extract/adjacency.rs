//! Adjacency: elements sharing a boundary element.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::element::{DeclaredKind, ElementId, ElementSet};
use crate::error::ExecutorError;
use crate::kernel::{GeometryKernel, touches};
use crate::provenance::Provenance;
use crate::relation::{RelationshipKind, RelationshipMap, RelationshipRecord};
use crate::run::AnalysisRun;

use super::{ExtractedMap, ExtractionStats, MapKind, Pairing, RelationshipExtractor};

impl<K: GeometryKernel> RelationshipExtractor<'_, K> {
    /// Symmetric adjacency map at `tolerance`.
    ///
    /// Geometric when enough proxies resolved, otherwise elements declared
    /// in the same space are taken as adjacent. Opening fillers are always
    /// adjacent to the element whose opening they fill.
    pub fn adjacency(
        &self,
        run: &AnalysisRun<K::Shape>,
        elements: &ElementSet,
        tolerance: f64,
    ) -> Result<Arc<ExtractedMap>, ExecutorError> {
        if let Some(cached) = run.cached_map(MapKind::Adjacency, tolerance) {
            return Ok(cached);
        }

        let entries = self.entries(run, elements);
        let mut map = RelationshipMap::new();
        let mut stats = ExtractionStats::default();

        if self.needs_fallback(entries.len(), elements) {
            stats.fallback = true;
            stats.declared += shared_space_adjacency(elements, &mut map);
        } else {
            let scan = self.scan(
                run,
                Pairing::Unordered(&entries),
                tolerance,
                "adjacency",
                |kernel, (sa, a), (sb, b), tol| touches(kernel, (sa, a.tier), (sb, b.tier), tol),
            )?;
            for (i, j) in scan.hits {
                map.insert_symmetric(RelationshipRecord::inferred(
                    entries[i].id.clone(),
                    entries[j].id.clone(),
                    RelationshipKind::Adjacency,
                    tolerance,
                ));
            }
            stats = scan.stats;
        }

        stats.declared += opening_adjacency(elements, &mut map);

        tracing::info!(
            records = map.len(),
            tested = stats.pairs_tested,
            indeterminate = stats.indeterminate,
            fallback = stats.fallback,
            tolerance,
            "adjacency extracted"
        );
        Ok(run.cache_map(MapKind::Adjacency, tolerance, ExtractedMap { map, stats }))
    }
}

/// Every door or window is adjacent to the element it fills an opening in.
fn opening_adjacency(elements: &ElementSet, map: &mut RelationshipMap) -> usize {
    let mut added = 0;
    for element in elements {
        for host in element.declared_targets(DeclaredKind::FillsOpeningOf) {
            if !elements.contains(host.as_str()) {
                continue;
            }
            let record =
                RelationshipRecord::declared(element.id.clone(), host.clone(), RelationshipKind::Adjacency)
                    .with_property("via", "opening");
            if map.insert_symmetric(record) {
                added += 2;
            }
        }
    }
    added
}

/// Elements declared in the same space are adjacent to each other.
fn shared_space_adjacency(elements: &ElementSet, map: &mut RelationshipMap) -> usize {
    let mut by_space: BTreeMap<&ElementId, Vec<&ElementId>> = BTreeMap::new();
    for element in elements {
        for parent in element.declared_targets(DeclaredKind::ContainedIn) {
            let is_space = elements
                .get(parent.as_str())
                .is_some_and(|p| p.class().is_space());
            if is_space {
                by_space.entry(parent).or_default().push(&element.id);
            }
        }
    }

    let mut added = 0;
    for (space, members) in by_space {
        for (i, a) in members.iter().enumerate() {
            for b in &members[i + 1..] {
                let record = RelationshipRecord::new(
                    (*a).clone(),
                    (*b).clone(),
                    RelationshipKind::Adjacency,
                    Provenance::Inferred,
                )
                .with_property("relationship_source", "declared_heuristic")
                .with_property("space", space.as_str());
                if map.insert_symmetric(record) {
                    added += 2;
                }
            }
        }
    }
    added
}

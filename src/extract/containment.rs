//! Containment: volumes fully enclosing other proxies.

use std::sync::Arc;

use crate::element::{DeclaredKind, ElementSet};
use crate::error::ExecutorError;
use crate::kernel::{GeometryKernel, Tier};
use crate::relation::{RelationshipKind, RelationshipMap, RelationshipRecord};
use crate::run::AnalysisRun;

use super::{ExtractedMap, ExtractionStats, MapKind, Pairing, RelationshipExtractor};

impl<K: GeometryKernel> RelationshipExtractor<'_, K> {
    /// Containment map at `tolerance`, with a contained-by record for every
    /// contains record.
    ///
    /// Only volume proxies contain. Declared spatial containment is the
    /// fallback when coverage is too low, and is otherwise added for pairs
    /// whose both ends resolved.
    pub fn containment(
        &self,
        run: &AnalysisRun<K::Shape>,
        elements: &ElementSet,
        tolerance: f64,
    ) -> Result<Arc<ExtractedMap>, ExecutorError> {
        if let Some(cached) = run.cached_map(MapKind::Containment, tolerance) {
            return Ok(cached);
        }

        let entries = self.entries(run, elements);
        let mut map = RelationshipMap::new();
        let mut stats = ExtractionStats::default();

        if self.needs_fallback(entries.len(), elements) {
            stats.fallback = true;
            stats.declared += declared_containment(elements, &mut map, |_, _| true);
        } else {
            let scan = self.scan(
                run,
                Pairing::Ordered(&entries),
                tolerance,
                "is_contained",
                |kernel, (outer, o), (inner, _), tol| {
                    if o.tier != Tier::Volume {
                        return Ok(false);
                    }
                    kernel.is_contained(inner, outer, tol)
                },
            )?;
            for (i, j) in scan.hits {
                let record = RelationshipRecord::inferred(
                    entries[i].id.clone(),
                    entries[j].id.clone(),
                    RelationshipKind::Contains,
                    tolerance,
                )
                .with_property("containment_type", "full");
                map.insert_with_inverse(record);
            }
            stats = scan.stats;
            stats.declared += declared_containment(elements, &mut map, |parent, child| {
                run.is_resolved(parent) && run.is_resolved(child)
            });
        }

        tracing::info!(
            records = map.len(),
            tested = stats.pairs_tested,
            indeterminate = stats.indeterminate,
            fallback = stats.fallback,
            tolerance,
            "containment extracted"
        );
        Ok(run.cache_map(MapKind::Containment, tolerance, ExtractedMap { map, stats }))
    }
}

/// Contains / contained-by pairs from declared spatial containment.
fn declared_containment<F>(elements: &ElementSet, map: &mut RelationshipMap, keep: F) -> usize
where
    F: Fn(&str, &str) -> bool,
{
    let mut added = 0;
    for element in elements {
        for parent in element.declared_targets(DeclaredKind::ContainedIn) {
            if !elements.contains(parent.as_str()) || !keep(parent.as_str(), element.id.as_str()) {
                continue;
            }
            let record = RelationshipRecord::declared(
                parent.clone(),
                element.id.clone(),
                RelationshipKind::Contains,
            )
            .with_property("containment_type", "declared");
            if map.insert_with_inverse(record) {
                added += 2;
            }
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtractionConfig, ResolverConfig};
    use crate::element::{ElementRecord, RawGeometry};
    use crate::executor::ParallelBatchExecutor;
    use crate::kernel::MeshKernel;
    use crate::relation::PropValue;
    use crate::resolver::Resolver;

    fn extract(set: &ElementSet) -> Arc<ExtractedMap> {
        let kernel = MeshKernel::new();
        let executor = ParallelBatchExecutor::new(2).unwrap();
        let run = AnalysisRun::new();
        Resolver::new(&kernel, ResolverConfig::default())
            .resolve_all(&run, set, &executor)
            .unwrap();
        RelationshipExtractor::new(&kernel, &executor, ExtractionConfig::default())
            .containment(&run, set, 0.001)
            .unwrap()
    }

    #[test]
    fn room_contains_furniture_with_inverse() {
        let set = ElementSet::new(vec![
            ElementRecord::new("Room", "IfcSpace")
                .with_geometry(RawGeometry::cuboid([0.0; 3], [4.0, 4.0, 3.0])),
            ElementRecord::new("Table", "IfcFurnishingElement")
                .with_geometry(RawGeometry::cuboid([1.0, 1.0, 0.0], [2.0, 2.0, 0.8])),
            ElementRecord::new("Shed", "IfcBuildingElementProxy")
                .with_geometry(RawGeometry::cuboid([10.0, 0.0, 0.0], [12.0, 2.0, 2.0])),
        ])
        .unwrap();
        let result = extract(&set);
        let map = &result.map;

        assert!(map.contains("Room", "Table", RelationshipKind::Contains));
        assert!(map.contains("Table", "Room", RelationshipKind::ContainedBy));
        assert!(!map.contains("Table", "Room", RelationshipKind::Contains));
        assert!(!map.contains("Room", "Shed", RelationshipKind::Contains));
        assert_eq!(result.stats.pairs_tested, 6);

        let forward = map.of_kind(RelationshipKind::Contains).next().unwrap();
        let back = map.of_kind(RelationshipKind::ContainedBy).next().unwrap();
        assert_eq!(forward.properties, back.properties);
        assert_eq!(
            forward.properties.get("containment_type"),
            Some(&PropValue::from("full"))
        );
    }

    #[test]
    fn declared_containment_is_the_fallback() {
        let set = ElementSet::new(vec![
            ElementRecord::new("L1", "IfcBuildingStorey"),
            ElementRecord::new("Room", "IfcSpace").declare(DeclaredKind::ContainedIn, "L1"),
            ElementRecord::new("Lamp", "IfcFlowTerminal").declare(DeclaredKind::ContainedIn, "Room"),
        ])
        .unwrap();
        let result = extract(&set);
        assert!(result.stats.fallback);
        assert!(result.map.contains("L1", "Room", RelationshipKind::Contains));
        assert!(result.map.contains("Room", "L1", RelationshipKind::ContainedBy));
        assert!(result.map.contains("Room", "Lamp", RelationshipKind::Contains));
        assert_eq!(result.map.len(), 4);
    }

    #[test]
    fn declared_containment_unioned_for_resolved_pairs() {
        let set = ElementSet::new(vec![
            ElementRecord::new("L1", "IfcBuildingStorey"),
            ElementRecord::new("Room", "IfcSpace")
                .with_geometry(RawGeometry::cuboid([0.0; 3], [4.0, 4.0, 3.0]))
                .declare(DeclaredKind::ContainedIn, "L1"),
            ElementRecord::new("Rug", "IfcCovering")
                .with_geometry(RawGeometry::cuboid([5.0, 0.0, 0.0], [6.0, 1.0, 0.01]))
                .declare(DeclaredKind::ContainedIn, "Room"),
        ])
        .unwrap();
        let result = extract(&set);
        assert!(!result.stats.fallback);
        // The storey never resolves, so its declared link is not unioned.
        assert!(!result.map.contains("L1", "Room", RelationshipKind::Contains));
        assert!(result.map.contains("Room", "Rug", RelationshipKind::Contains));
        let record = result
            .map
            .of_kind(RelationshipKind::Contains)
            .find(|r| r.target.as_str() == "Rug")
            .unwrap();
        assert_eq!(record.provenance, crate::provenance::Provenance::Declared);
    }
}

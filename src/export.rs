//! Export types for serializing analysis results.
//!
//! Kernel shapes and proxies never leave the run; these types carry the
//! relationship maps, their statistics and the connectivity graph in a
//! JSON-friendly form.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::connectivity::{GraphSummary, NodeMeta};
use crate::engine::TopologyAnalysis;
use crate::error::StoreError;
use crate::extract::ExtractedMap;
use crate::relation::RelationshipRecord;
use crate::resolver::ResolutionSummary;

/// An element left out of geometric inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedExport {
    pub id: String,
    pub reason: String,
}

/// The connectivity graph as node and edge lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<NodeMeta>,
    /// Edges in insertion order.
    pub edges: Vec<RelationshipRecord>,
    pub summary: GraphSummary,
}

/// Full analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyExport {
    pub run_id: u64,
    pub tolerance: f64,
    pub resolution: ResolutionSummary,
    pub unresolved: Vec<UnresolvedExport>,
    pub adjacency: ExtractedMap,
    pub containment: ExtractedMap,
    pub boundary: ExtractedMap,
    pub graph: GraphExport,
}

impl TopologyExport {
    pub fn from_analysis(analysis: &TopologyAnalysis) -> Self {
        Self {
            run_id: analysis.run_id,
            tolerance: analysis.tolerance,
            resolution: analysis.resolution.clone(),
            unresolved: analysis
                .unresolved
                .iter()
                .map(|(id, reason)| UnresolvedExport {
                    id: id.to_string(),
                    reason: reason.clone(),
                })
                .collect(),
            adjacency: (*analysis.adjacency).clone(),
            containment: (*analysis.containment).clone(),
            boundary: (*analysis.boundary).clone(),
            graph: GraphExport {
                nodes: analysis.graph.nodes().cloned().collect(),
                edges: analysis.records(),
                summary: analysis.graph.summary(),
            },
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(self).map_err(|e| StoreError::Serialization {
            message: format!("failed to serialize analysis: {e}"),
        })
    }

    pub fn write_json(&self, path: &Path) -> Result<(), StoreError> {
        let json = self.to_json_pretty()?;
        std::fs::write(path, json).map_err(|e| StoreError::Io { source: e })
    }

    pub fn from_json_str(json: &str) -> Result<Self, StoreError> {
        serde_json::from_str(json).map_err(|e| StoreError::Serialization {
            message: format!("failed to parse analysis: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ExecutorConfig};
    use crate::element::{DeclaredKind, ElementRecord, ElementSet, RawGeometry};
    use crate::engine::Engine;
    use crate::store::MemoryGraphStore;

    #[test]
    fn export_survives_json() {
        let engine = Engine::new(
            EngineConfig {
                executor: ExecutorConfig { workers: 1 },
                ..EngineConfig::default()
            },
            MemoryGraphStore::new(),
        )
        .unwrap();
        let elements = ElementSet::new(vec![
            ElementRecord::new("A", "IfcWall")
                .with_geometry(RawGeometry::cuboid([0.0; 3], [1.0, 0.2, 3.0])),
            ElementRecord::new("B", "IfcWall")
                .with_geometry(RawGeometry::cuboid([1.0, 0.0, 0.0], [2.0, 0.2, 3.0])),
            ElementRecord::new("Ghost", "IfcWall").declare(DeclaredKind::ConnectedTo, "A"),
        ])
        .unwrap();
        let run = engine.begin_run();
        let analysis = engine.analyze_topology(&run, &elements).unwrap();

        let export = analysis.export();
        assert_eq!(export.unresolved.len(), 1);
        assert_eq!(export.unresolved[0].id, "Ghost");
        assert_eq!(export.graph.edges.len(), 2);

        let json = export.to_json_pretty().unwrap();
        let back = TopologyExport::from_json_str(&json).unwrap();
        assert_eq!(back.graph.edges, export.graph.edges);
        assert_eq!(back.adjacency.stats, export.adjacency.stats);
        assert_eq!(back.graph.nodes.len(), 2);
    }
}

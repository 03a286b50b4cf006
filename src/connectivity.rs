//! Connectivity graph: every relationship of one analysis in one directed,
//! labeled graph keyed by element identifier.
//!
//! Uses `petgraph` for the graph structure with a side index from element
//! identifier to node and from relationship kind to edges. The graph is
//! built once and read-only afterwards.

use std::collections::{BTreeMap, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::element::{ElementClass, ElementId, ElementSet};
use crate::provenance::Provenance;
use crate::relation::{RelationshipKind, RelationshipMap, RelationshipRecord};

/// Metadata of one graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub id: ElementId,
    pub type_tag: String,
    pub name: String,
    pub class: ElementClass,
}

/// Counts describing a built graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub nodes: usize,
    pub edges: usize,
    pub by_kind: BTreeMap<String, usize>,
    /// Weakly connected components.
    pub components: usize,
    /// Records skipped because an endpoint is not in the element set.
    pub dangling: usize,
}

/// Directed, labeled union of the relationship maps.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityGraph {
    graph: DiGraph<NodeMeta, RelationshipRecord>,
    node_index: HashMap<ElementId, NodeIndex>,
    kind_index: HashMap<RelationshipKind, Vec<EdgeIndex>>,
    dangling: usize,
}

impl ConnectivityGraph {
    /// Merge the three maps in a single pass.
    ///
    /// Edges are inserted adjacency first, then containment, then
    /// boundaries, then the space-to-space connections derived from doors
    /// and windows bounding two or more spaces. Elements in no relationship
    /// get no node.
    pub fn build(
        elements: &ElementSet,
        adjacency: &RelationshipMap,
        containment: &RelationshipMap,
        boundary: &RelationshipMap,
    ) -> Self {
        let mut built = Self::default();
        let connections = connects_spaces(elements, boundary);
        for record in adjacency
            .iter()
            .chain(containment.iter())
            .chain(boundary.iter())
            .chain(connections.iter())
        {
            built.add_record(elements, record);
        }
        if built.dangling > 0 {
            tracing::warn!(
                dangling = built.dangling,
                "relationships with unknown endpoints left out of the graph"
            );
        }
        tracing::debug!(
            nodes = built.graph.node_count(),
            edges = built.graph.edge_count(),
            "connectivity graph built"
        );
        built
    }

    fn ensure_node(&mut self, elements: &ElementSet, id: &ElementId) -> Option<NodeIndex> {
        if let Some(&idx) = self.node_index.get(id) {
            return Some(idx);
        }
        let element = elements.get(id.as_str())?;
        let idx = self.graph.add_node(NodeMeta {
            id: element.id.clone(),
            type_tag: element.type_tag.clone(),
            name: element.display_name().to_string(),
            class: element.class(),
        });
        self.node_index.insert(element.id.clone(), idx);
        Some(idx)
    }

    fn add_record(&mut self, elements: &ElementSet, record: &RelationshipRecord) {
        if record.is_self_edge() {
            return;
        }
        let (Some(source), Some(target)) = (
            self.ensure_node(elements, &record.source),
            self.ensure_node(elements, &record.target),
        ) else {
            self.dangling += 1;
            return;
        };
        let edge = self.graph.add_edge(source, target, record.clone());
        self.kind_index.entry(record.kind).or_default().push(edge);
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&NodeMeta> {
        let idx = self.node_index.get(id)?;
        self.graph.node_weight(*idx)
    }

    pub(crate) fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.node_index.get(id).copied()
    }

    pub(crate) fn meta(&self, idx: NodeIndex) -> &NodeMeta {
        &self.graph[idx]
    }

    /// Outgoing edges of `idx` in insertion order.
    pub(crate) fn outgoing(&self, idx: NodeIndex) -> Vec<(EdgeIndex, NodeIndex, &RelationshipRecord)> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.id(), e.target(), e.weight()))
            .collect();
        edges.sort_by_key(|(edge, _, _)| *edge);
        edges
    }

    /// Outgoing relationships of an element, in insertion order.
    pub fn relationships_from(&self, id: &str) -> Vec<&RelationshipRecord> {
        match self.index_of(id) {
            Some(idx) => self.outgoing(idx).into_iter().map(|(_, _, r)| r).collect(),
            None => Vec::new(),
        }
    }

    /// Targets of `kind` edges leaving `id`.
    pub fn neighbors(&self, id: &str, kind: RelationshipKind) -> Vec<&ElementId> {
        self.relationships_from(id)
            .into_iter()
            .filter(|r| r.kind == kind)
            .map(|r| &r.target)
            .collect()
    }

    /// Every record, in insertion order.
    pub fn records(&self) -> impl Iterator<Item = &RelationshipRecord> {
        self.graph.edge_references().map(|e| e.weight())
    }

    /// Records of one kind, in insertion order.
    pub fn records_of(&self, kind: RelationshipKind) -> Vec<&RelationshipRecord> {
        self.kind_index
            .get(&kind)
            .map(|edges| edges.iter().map(|&e| &self.graph[e]).collect())
            .unwrap_or_default()
    }

    /// Every node, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeMeta> {
        self.graph.node_weights()
    }

    pub fn summary(&self) -> GraphSummary {
        let by_kind = self
            .kind_index
            .iter()
            .map(|(kind, edges)| (kind.name().to_string(), edges.len()))
            .collect();
        GraphSummary {
            nodes: self.graph.node_count(),
            edges: self.graph.edge_count(),
            by_kind,
            components: petgraph::algo::connected_components(&self.graph),
            dangling: self.dangling,
        }
    }
}

/// Spaces bounded by the same door or window are connected through it.
fn connects_spaces(elements: &ElementSet, boundary: &RelationshipMap) -> RelationshipMap {
    let mut spaces_by_opening: BTreeMap<&ElementId, Vec<&ElementId>> = BTreeMap::new();
    for record in boundary.of_kind(RelationshipKind::BoundsSpace) {
        let is_filler = elements
            .get(record.source.as_str())
            .is_some_and(|e| e.class().is_opening_filler());
        if is_filler {
            spaces_by_opening
                .entry(&record.source)
                .or_default()
                .push(&record.target);
        }
    }

    let mut map = RelationshipMap::new();
    for (opening, spaces) in spaces_by_opening {
        for (i, a) in spaces.iter().enumerate() {
            for b in &spaces[i + 1..] {
                let record = RelationshipRecord::new(
                    (*a).clone(),
                    (*b).clone(),
                    RelationshipKind::ConnectsSpaces,
                    Provenance::Inferred,
                )
                .with_property("relationship_source", Provenance::Inferred.source_tag())
                .with_property("via", opening.as_str());
                map.insert_symmetric(record);
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{DeclaredKind, ElementRecord};

    fn elements() -> ElementSet {
        ElementSet::new(vec![
            ElementRecord::new("A", "IfcSpace"),
            ElementRecord::new("B", "IfcSpace"),
            ElementRecord::new("D", "IfcDoor")
                .declare(DeclaredKind::BoundsSpace, "A")
                .declare(DeclaredKind::BoundsSpace, "B"),
            ElementRecord::new("W", "IfcWall"),
            ElementRecord::new("Lonely", "IfcWall"),
        ])
        .unwrap()
    }

    fn boundary() -> RelationshipMap {
        let mut map = RelationshipMap::new();
        for space in ["A", "B"] {
            map.insert_with_inverse(RelationshipRecord::declared(
                "D",
                space,
                RelationshipKind::BoundsSpace,
            ));
        }
        map
    }

    #[test]
    fn nodes_only_for_related_elements() {
        let set = elements();
        let mut adjacency = RelationshipMap::new();
        adjacency.insert_symmetric(RelationshipRecord::inferred(
            "D",
            "W",
            RelationshipKind::Adjacency,
            1e-3,
        ));
        let graph =
            ConnectivityGraph::build(&set, &adjacency, &RelationshipMap::new(), &boundary());
        assert!(graph.contains("D"));
        assert!(graph.contains("W"));
        assert!(!graph.contains("Lonely"));
        assert_eq!(graph.node("D").unwrap().class, ElementClass::Door);
    }

    #[test]
    fn door_between_spaces_connects_them() {
        let set = elements();
        let graph = ConnectivityGraph::build(
            &set,
            &RelationshipMap::new(),
            &RelationshipMap::new(),
            &boundary(),
        );
        let connections = graph.records_of(RelationshipKind::ConnectsSpaces);
        assert_eq!(connections.len(), 2);
        assert_eq!(
            connections[0].properties.get("via"),
            Some(&crate::relation::PropValue::from("D"))
        );
        assert_eq!(graph.neighbors("A", RelationshipKind::ConnectsSpaces).len(), 1);
    }

    #[test]
    fn outgoing_edges_keep_insertion_order() {
        let set = elements();
        let mut adjacency = RelationshipMap::new();
        for target in ["W", "A", "B"] {
            adjacency.insert(RelationshipRecord::inferred(
                "D",
                target,
                RelationshipKind::Adjacency,
                1e-3,
            ));
        }
        let graph = ConnectivityGraph::build(
            &set,
            &adjacency,
            &RelationshipMap::new(),
            &RelationshipMap::new(),
        );
        let targets: Vec<&str> = graph
            .relationships_from("D")
            .iter()
            .map(|r| r.target.as_str())
            .collect();
        assert_eq!(targets, vec!["W", "A", "B"]);
    }

    #[test]
    fn dangling_records_are_counted() {
        let set = elements();
        let mut adjacency = RelationshipMap::new();
        adjacency.insert_symmetric(RelationshipRecord::inferred(
            "W",
            "Ghost",
            RelationshipKind::Adjacency,
            1e-3,
        ));
        let graph = ConnectivityGraph::build(
            &set,
            &adjacency,
            &RelationshipMap::new(),
            &RelationshipMap::new(),
        );
        let summary = graph.summary();
        assert_eq!(summary.dangling, 2);
        assert_eq!(summary.edges, 0);
    }

    #[test]
    fn summary_counts_components() {
        let set = elements();
        let graph = ConnectivityGraph::build(
            &set,
            &RelationshipMap::new(),
            &RelationshipMap::new(),
            &boundary(),
        );
        let summary = graph.summary();
        assert_eq!(summary.nodes, 3);
        assert_eq!(summary.components, 1);
        assert_eq!(summary.by_kind.get("bounds_space"), Some(&2));
    }
}

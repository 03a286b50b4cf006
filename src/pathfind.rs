//! Shortest-hop paths over the connectivity graph.
//!
//! Breadth-first from the start node, following only edges whose kind the
//! filter allows, bounded by a hop limit. Outgoing edges are visited in
//! insertion order, so among equally short paths the one whose edges were
//! inserted first wins.

use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::connectivity::ConnectivityGraph;
use crate::element::ElementId;
use crate::relation::RelationshipKind;

/// Relationship kinds a search may follow (empty = follow all).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindFilter {
    kinds: HashSet<RelationshipKind>,
}

impl KindFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Follow only `kinds`. An empty list leaves the filter unrestricted,
    /// the same as [`KindFilter::all`].
    pub fn only(kinds: impl IntoIterator<Item = RelationshipKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Parse kind names such as `"adjacency"` or `"CONTAINS_TOPOLOGICALLY"`.
    /// No names means every kind.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        names
            .iter()
            .map(|n| RelationshipKind::from_str(n.as_ref()))
            .collect::<Result<HashSet<_>, _>>()
            .map(|kinds| Self { kinds })
    }

    pub fn allows(&self, kind: RelationshipKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    pub fn is_unrestricted(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// One node of a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub id: ElementId,
    pub type_tag: String,
    pub name: String,
    /// Kind of the edge leading to the next step; `None` on the last step.
    pub via: Option<RelationshipKind>,
}

/// An ordered path from start to end, or empty when none was found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphPath {
    pub steps: Vec<PathStep>,
}

impl GraphPath {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn hops(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }
}

/// Shortest path from `start` to `end` within `max_depth` hops.
///
/// Unknown endpoints and unreachable targets give an empty path; a path
/// from a node to itself is that single node.
pub fn find_path(
    graph: &ConnectivityGraph,
    start: &str,
    end: &str,
    filter: &KindFilter,
    max_depth: usize,
) -> GraphPath {
    let (Some(start_idx), Some(end_idx)) = (graph.index_of(start), graph.index_of(end)) else {
        tracing::debug!(start, end, "path endpoint not in graph");
        return GraphPath::default();
    };
    if start_idx == end_idx {
        return build_path(graph, &HashMap::new(), end_idx);
    }

    // child -> (parent, kind of the edge parent -> child)
    let mut parents: HashMap<NodeIndex, (NodeIndex, RelationshipKind)> = HashMap::new();
    let mut visited: HashSet<NodeIndex> = HashSet::from([start_idx]);
    let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::from([(start_idx, 0)]);

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for (_, target, record) in graph.outgoing(node) {
            if !filter.allows(record.kind) || !visited.insert(target) {
                continue;
            }
            parents.insert(target, (node, record.kind));
            if target == end_idx {
                let path = build_path(graph, &parents, end_idx);
                tracing::debug!(start, end, hops = path.hops(), "path found");
                return path;
            }
            queue.push_back((target, depth + 1));
        }
    }

    tracing::debug!(start, end, max_depth, "no path within depth bound");
    GraphPath::default()
}

fn build_path(
    graph: &ConnectivityGraph,
    parents: &HashMap<NodeIndex, (NodeIndex, RelationshipKind)>,
    end: NodeIndex,
) -> GraphPath {
    let mut chain = vec![(end, None)];
    let mut current = end;
    while let Some(&(parent, kind)) = parents.get(&current) {
        chain.push((parent, Some(kind)));
        current = parent;
    }
    chain.reverse();

    let steps = chain
        .into_iter()
        .map(|(idx, via)| {
            let meta = graph.meta(idx);
            PathStep {
                id: meta.id.clone(),
                type_tag: meta.type_tag.clone(),
                name: meta.name.clone(),
                via,
            }
        })
        .collect();
    GraphPath { steps }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementRecord, ElementSet};
    use crate::relation::{RelationshipMap, RelationshipRecord};

    fn set(ids: &[&str]) -> ElementSet {
        ElementSet::new(ids.iter().map(|id| ElementRecord::new(*id, "IfcWall")).collect()).unwrap()
    }

    fn adjacency(pairs: &[(&str, &str)]) -> RelationshipMap {
        let mut map = RelationshipMap::new();
        for (a, b) in pairs {
            map.insert_symmetric(RelationshipRecord::inferred(
                *a,
                *b,
                RelationshipKind::Adjacency,
                1e-3,
            ));
        }
        map
    }

    fn graph(ids: &[&str], adj: RelationshipMap, cont: RelationshipMap) -> ConnectivityGraph {
        ConnectivityGraph::build(&set(ids), &adj, &cont, &RelationshipMap::new())
    }

    #[test]
    fn three_hop_path_has_four_nodes() {
        let g = graph(
            &["A", "B", "C", "D"],
            adjacency(&[("A", "B"), ("B", "C"), ("C", "D")]),
            RelationshipMap::new(),
        );
        let path = find_path(&g, "A", "D", &KindFilter::all(), 10);
        assert_eq!(path.node_ids(), vec!["A", "B", "C", "D"]);
        assert_eq!(path.hops(), 3);
        assert_eq!(path.steps[0].via, Some(RelationshipKind::Adjacency));
        assert_eq!(path.steps[3].via, None);
    }

    #[test]
    fn disconnected_nodes_give_empty_path() {
        let g = graph(
            &["A", "B", "C", "D"],
            adjacency(&[("A", "B"), ("C", "D")]),
            RelationshipMap::new(),
        );
        assert!(find_path(&g, "A", "D", &KindFilter::all(), 10).is_empty());
    }

    #[test]
    fn unknown_endpoints_give_empty_path() {
        let g = graph(&["A", "B"], adjacency(&[("A", "B")]), RelationshipMap::new());
        assert!(find_path(&g, "A", "Nope", &KindFilter::all(), 10).is_empty());
        assert!(find_path(&g, "Nope", "A", &KindFilter::all(), 10).is_empty());
    }

    #[test]
    fn start_equal_to_end_is_a_single_node() {
        let g = graph(&["A", "B"], adjacency(&[("A", "B")]), RelationshipMap::new());
        let path = find_path(&g, "A", "A", &KindFilter::all(), 0);
        assert_eq!(path.node_ids(), vec!["A"]);
    }

    #[test]
    fn depth_bound_is_respected() {
        let g = graph(
            &["A", "B", "C", "D"],
            adjacency(&[("A", "B"), ("B", "C"), ("C", "D")]),
            RelationshipMap::new(),
        );
        assert!(find_path(&g, "A", "D", &KindFilter::all(), 2).is_empty());
        assert_eq!(find_path(&g, "A", "D", &KindFilter::all(), 3).len(), 4);
    }

    #[test]
    fn ties_follow_edge_insertion_order() {
        let ids = ["A", "B", "C", "D"];
        let via_b = graph(
            &ids,
            adjacency(&[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")]),
            RelationshipMap::new(),
        );
        assert_eq!(
            find_path(&via_b, "A", "D", &KindFilter::all(), 5).node_ids(),
            vec!["A", "B", "D"]
        );

        let via_c = graph(
            &ids,
            adjacency(&[("A", "C"), ("A", "B"), ("B", "D"), ("C", "D")]),
            RelationshipMap::new(),
        );
        assert_eq!(
            find_path(&via_c, "A", "D", &KindFilter::all(), 5).node_ids(),
            vec!["A", "C", "D"]
        );
    }

    #[test]
    fn filter_restricts_followed_kinds() {
        let mut containment = RelationshipMap::new();
        containment.insert_with_inverse(RelationshipRecord::inferred(
            "A",
            "C",
            RelationshipKind::Contains,
            1e-3,
        ));
        let g = graph(
            &["A", "B", "C"],
            adjacency(&[("A", "B"), ("B", "C")]),
            containment,
        );

        let any = find_path(&g, "A", "C", &KindFilter::all(), 5);
        assert_eq!(any.node_ids(), vec!["A", "C"]);

        let adjacency_only = KindFilter::only([RelationshipKind::Adjacency]);
        let path = find_path(&g, "A", "C", &adjacency_only, 5);
        assert_eq!(path.node_ids(), vec!["A", "B", "C"]);
    }

    #[test]
    fn filter_parses_names_and_labels() {
        let filter = KindFilter::from_names(&["adjacency", "CONTAINS_TOPOLOGICALLY"]).unwrap();
        assert!(filter.allows(RelationshipKind::Adjacency));
        assert!(filter.allows(RelationshipKind::Contains));
        assert!(!filter.allows(RelationshipKind::BoundsSpace));
        assert!(KindFilter::from_names(&["sideways"]).is_err());
        assert!(KindFilter::all().is_unrestricted());
    }

    #[test]
    fn empty_allow_list_follows_every_kind() {
        let empty = KindFilter::only([]);
        assert!(empty.is_unrestricted());
        assert_eq!(empty, KindFilter::all());
        assert!(empty.allows(RelationshipKind::ConnectsSpaces));
        assert!(KindFilter::from_names::<&str>(&[]).unwrap().is_unrestricted());
    }
}

//! Graph database adapters.
//!
//! The import pipeline writes through two traits:
//!
//! - [`GraphBackend`] hands out sessions, one per concurrently running batch
//! - [`GraphSession`] executes one [`WriteOp`] against a deadline
//!
//! Backends shipped here:
//!
//! - [`MemoryGraphStore`]: in-process, DashMap-backed, with fault injection
//! - [`DurableGraphStore`]: embedded, ACID transactions (redb)
//! - [`CypherScript`]: renders every write as parameterised Cypher
//!
//! [`SessionPool`] bounds how many sessions are open at once and returns a
//! session to the pool on every exit path.

pub mod cypher;
pub mod durable;
pub mod mem;
pub mod pool;

use std::collections::BTreeSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::relation::PropertyBag;

pub use cypher::{CypherScript, CypherStatement};
pub use durable::DurableGraphStore;
pub use mem::{FaultPlan, MemoryGraphStore, MemorySession};
pub use pool::{PoolStats, PooledSession, SessionPool};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Label every node carries; node identifiers are unique under it.
pub const LOOKUP_LABEL: &str = crate::element::ENTITY_LABEL;

/// One node row of an upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRow {
    pub identifier: String,
    pub properties: PropertyBag,
}

/// One relationship row of an upsert, endpoints by identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRow {
    pub source: String,
    pub target: String,
    pub properties: PropertyBag,
}

/// A parameterised write.
///
/// Every variant is create-if-absent: properties are only set when the
/// node or relationship is created, never on a repeat.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    UpsertNode { labels: Vec<String>, row: NodeRow },
    UpsertNodes { labels: Vec<String>, rows: Vec<NodeRow> },
    UpsertRelationship { label: String, row: EdgeRow },
    UpsertRelationships { label: String, rows: Vec<EdgeRow> },
}

impl WriteOp {
    /// Number of rows carried.
    pub fn rows(&self) -> usize {
        match self {
            WriteOp::UpsertNode { .. } | WriteOp::UpsertRelationship { .. } => 1,
            WriteOp::UpsertNodes { rows, .. } => rows.len(),
            WriteOp::UpsertRelationships { rows, .. } => rows.len(),
        }
    }

    pub fn is_node_write(&self) -> bool {
        matches!(self, WriteOp::UpsertNode { .. } | WriteOp::UpsertNodes { .. })
    }

    /// Identifiers touched by this write, for fault matching and logs.
    pub fn identifiers(&self) -> Vec<&str> {
        match self {
            WriteOp::UpsertNode { row, .. } => vec![row.identifier.as_str()],
            WriteOp::UpsertNodes { rows, .. } => rows.iter().map(|r| r.identifier.as_str()).collect(),
            WriteOp::UpsertRelationship { row, .. } => vec![row.source.as_str(), row.target.as_str()],
            WriteOp::UpsertRelationships { rows, .. } => rows
                .iter()
                .flat_map(|r| [r.source.as_str(), r.target.as_str()])
                .collect(),
        }
    }
}

/// What one write did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    /// Rows the statement processed.
    pub rows: usize,
    pub nodes_created: usize,
    pub relationships_created: usize,
    /// Relationship rows dropped because an endpoint node does not exist.
    pub unmatched: usize,
    /// Positions of the unmatched rows in the write's row list.
    #[serde(default)]
    pub unmatched_rows: Vec<usize>,
}

impl WriteSummary {
    /// Add `other`, taken as the rows following the ones already counted.
    pub fn absorb(&mut self, other: WriteSummary) {
        let offset = self.rows;
        self.unmatched_rows
            .extend(other.unmatched_rows.into_iter().map(|row| row + offset));
        self.rows += other.rows;
        self.nodes_created += other.nodes_created;
        self.relationships_created += other.relationships_created;
        self.unmatched += other.unmatched;
    }

    /// Rows the backend actually matched and merged.
    pub fn matched_rows(&self) -> usize {
        self.rows.saturating_sub(self.unmatched)
    }

    /// Record row `position` as dropped for a missing endpoint.
    pub fn mark_unmatched(&mut self, position: usize) {
        self.unmatched += 1;
        self.unmatched_rows.push(position);
    }
}

/// A node as a backend stores it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub labels: BTreeSet<String>,
    pub properties: PropertyBag,
}

/// A relationship as a backend stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRelationship {
    pub source: String,
    pub label: String,
    pub target: String,
    pub properties: PropertyBag,
}

/// A connection to a graph database that can open sessions.
pub trait GraphBackend: Send + Sync {
    type Session: GraphSession + Send;

    fn open_session(&self) -> StoreResult<Self::Session>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// One session; never shared between concurrently running batches.
pub trait GraphSession {
    /// Execute `op`, failing with [`StoreError::Timeout`] when it cannot
    /// finish before `deadline`.
    fn run(&mut self, op: &WriteOp, deadline: Instant) -> StoreResult<WriteSummary>;

    /// Delete every relationship whose `provenance` is `inferred`; returns
    /// how many were deleted.
    fn clear_inferred(&mut self) -> StoreResult<usize>;
}

/// Key of a stored relationship: source, label, target.
pub(crate) fn relationship_key(source: &str, label: &str, target: &str) -> String {
    format!("{source}\u{1f}{label}\u{1f}{target}")
}

pub(crate) fn is_inferred(properties: &PropertyBag) -> bool {
    properties
        .get("provenance")
        .is_some_and(|p| *p == crate::relation::PropValue::from("inferred"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeRow {
        NodeRow {
            identifier: id.into(),
            properties: PropertyBag::new(),
        }
    }

    #[test]
    fn write_op_rows_and_identifiers() {
        let op = WriteOp::UpsertNodes {
            labels: vec!["Wall".into()],
            rows: vec![node("a"), node("b")],
        };
        assert_eq!(op.rows(), 2);
        assert!(op.is_node_write());
        assert_eq!(op.identifiers(), vec!["a", "b"]);

        let edge = WriteOp::UpsertRelationship {
            label: "ADJACENT".into(),
            row: EdgeRow {
                source: "a".into(),
                target: "b".into(),
                properties: PropertyBag::new(),
            },
        };
        assert_eq!(edge.rows(), 1);
        assert!(!edge.is_node_write());
        assert_eq!(edge.identifiers(), vec!["a", "b"]);
    }

    #[test]
    fn summaries_add_up() {
        let mut total = WriteSummary::default();
        total.absorb(WriteSummary {
            rows: 3,
            nodes_created: 2,
            ..WriteSummary::default()
        });
        let mut edges = WriteSummary {
            rows: 2,
            relationships_created: 1,
            ..WriteSummary::default()
        };
        edges.mark_unmatched(1);
        total.absorb(edges);
        assert_eq!(total.rows, 5);
        assert_eq!(total.nodes_created, 2);
        assert_eq!(total.relationships_created, 1);
        assert_eq!(total.unmatched, 1);
        assert_eq!(total.unmatched_rows, vec![4]);
        assert_eq!(total.matched_rows(), 4);
    }

    #[test]
    fn relationship_keys_do_not_collide() {
        assert_ne!(
            relationship_key("a", "B", "c"),
            relationship_key("a\u{1f}B", "c", "")
        );
    }
}

//! In-process graph store backed by DashMap.
//!
//! Implements the same create-if-absent semantics a graph database gives
//! `MERGE … ON CREATE SET`, counts round trips, and can inject failures
//! (rejected batches, connection loss, latency) through a [`FaultPlan`].
//! All data is lost on process exit.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::StoreError;

use super::{
    EdgeRow, GraphBackend, GraphSession, LOOKUP_LABEL, NodeRow, StoreResult, StoredNode,
    StoredRelationship, WriteOp, WriteSummary, is_inferred, relationship_key,
};

/// Failures to inject into a [`MemoryGraphStore`].
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Reject any batch touching one of these identifiers.
    pub fail_identifiers: HashSet<String>,
    /// Apply `fail_identifiers` to node writes only.
    pub nodes_only: bool,
    /// Report connection loss from this round trip on (0-based).
    pub disconnect_after: Option<usize>,
    /// Delay added to every round trip.
    pub latency: Option<Duration>,
}

impl FaultPlan {
    pub fn failing(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fail_identifiers: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Reject node batches touching `ids`; relationship batches still run.
    pub fn failing_nodes(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            nodes_only: true,
            ..Self::failing(ids)
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    nodes: DashMap<String, StoredNode>,
    relationships: DashMap<String, StoredRelationship>,
    /// Times each relationship key was sent in a write.
    relationship_writes: DashMap<String, usize>,
    round_trips: AtomicUsize,
    faults: RwLock<FaultPlan>,
}

/// Concurrent in-memory graph store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraphStore {
    state: Arc<MemoryState>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: FaultPlan) -> Self {
        let store = Self::new();
        store.set_faults(faults);
        store
    }

    pub fn set_faults(&self, faults: FaultPlan) {
        *self
            .state
            .faults
            .write()
            .expect("fault plan lock poisoned") = faults;
    }

    pub fn clear_faults(&self) {
        self.set_faults(FaultPlan::default());
    }

    pub fn node(&self, identifier: &str) -> Option<StoredNode> {
        self.state.nodes.get(identifier).map(|n| n.value().clone())
    }

    pub fn node_count(&self) -> usize {
        self.state.nodes.len()
    }

    pub fn relationship(&self, source: &str, label: &str, target: &str) -> Option<StoredRelationship> {
        self.state
            .relationships
            .get(&relationship_key(source, label, target))
            .map(|r| r.value().clone())
    }

    pub fn relationship_count(&self) -> usize {
        self.state.relationships.len()
    }

    /// How many times `(source, label, target)` was sent in a write.
    pub fn relationship_writes(&self, source: &str, label: &str, target: &str) -> usize {
        self.state
            .relationship_writes
            .get(&relationship_key(source, label, target))
            .map(|n| *n)
            .unwrap_or(0)
    }

    /// Relationship keys sent more than once.
    pub fn repeated_relationship_writes(&self) -> usize {
        self.state
            .relationship_writes
            .iter()
            .filter(|e| *e.value() > 1)
            .count()
    }

    pub fn round_trips(&self) -> usize {
        self.state.round_trips.load(Ordering::Relaxed)
    }

    /// Forget the per-key write counts, keeping the data.
    pub fn reset_write_log(&self) {
        self.state.relationship_writes.clear();
    }
}

impl GraphBackend for MemoryGraphStore {
    type Session = MemorySession;

    fn open_session(&self) -> StoreResult<MemorySession> {
        Ok(MemorySession {
            state: Arc::clone(&self.state),
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Session of a [`MemoryGraphStore`].
#[derive(Debug)]
pub struct MemorySession {
    state: Arc<MemoryState>,
}

impl MemorySession {
    fn check_faults(&self, op: &WriteOp, started: Instant, deadline: Instant) -> StoreResult<()> {
        let trip = self.state.round_trips.fetch_add(1, Ordering::Relaxed);
        let faults = self
            .state
            .faults
            .read()
            .expect("fault plan lock poisoned")
            .clone();

        if faults.disconnect_after.is_some_and(|limit| trip >= limit) {
            return Err(StoreError::ConnectionLost {
                message: format!("injected disconnect at round trip {trip}"),
            });
        }
        if let Some(latency) = faults.latency {
            std::thread::sleep(latency);
            if Instant::now() > deadline {
                return Err(StoreError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
        }
        if faults.nodes_only && !op.is_node_write() {
            return Ok(());
        }
        if let Some(id) = op
            .identifiers()
            .into_iter()
            .find(|id| faults.fail_identifiers.contains(*id))
        {
            return Err(StoreError::Rejected {
                message: format!("injected failure for {id}"),
            });
        }
        Ok(())
    }

    fn merge_node(&self, labels: &[String], row: &NodeRow) -> bool {
        match self.state.nodes.entry(row.identifier.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let mut node = StoredNode {
                    labels: labels.iter().cloned().collect(),
                    properties: row.properties.clone(),
                };
                node.labels.insert(LOOKUP_LABEL.to_string());
                slot.insert(node);
                true
            }
        }
    }

    /// `None` when an endpoint is missing, else whether it was created.
    fn merge_relationship(&self, label: &str, row: &EdgeRow) -> Option<bool> {
        let key = relationship_key(&row.source, label, &row.target);
        *self.state.relationship_writes.entry(key.clone()).or_insert(0) += 1;
        if !self.state.nodes.contains_key(&row.source) || !self.state.nodes.contains_key(&row.target) {
            return None;
        }
        Some(match self.state.relationships.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(StoredRelationship {
                    source: row.source.clone(),
                    label: label.to_string(),
                    target: row.target.clone(),
                    properties: row.properties.clone(),
                });
                true
            }
        })
    }

    fn apply_edges<'r>(&self, label: &str, rows: impl Iterator<Item = &'r EdgeRow>) -> WriteSummary {
        let mut summary = WriteSummary::default();
        for (position, row) in rows.enumerate() {
            summary.rows += 1;
            match self.merge_relationship(label, row) {
                Some(true) => summary.relationships_created += 1,
                Some(false) => {}
                None => summary.mark_unmatched(position),
            }
        }
        summary
    }
}

impl GraphSession for MemorySession {
    fn run(&mut self, op: &WriteOp, deadline: Instant) -> StoreResult<WriteSummary> {
        let started = Instant::now();
        self.check_faults(op, started, deadline)?;

        let summary = match op {
            WriteOp::UpsertNode { labels, row } => WriteSummary {
                rows: 1,
                nodes_created: usize::from(self.merge_node(labels, row)),
                ..WriteSummary::default()
            },
            WriteOp::UpsertNodes { labels, rows } => WriteSummary {
                rows: rows.len(),
                nodes_created: rows.iter().filter(|row| self.merge_node(labels, row)).count(),
                ..WriteSummary::default()
            },
            WriteOp::UpsertRelationship { label, row } => self.apply_edges(label, std::iter::once(row)),
            WriteOp::UpsertRelationships { label, rows } => self.apply_edges(label, rows.iter()),
        };
        Ok(summary)
    }

    fn clear_inferred(&mut self) -> StoreResult<usize> {
        let before = self.state.relationships.len();
        self.state
            .relationships
            .retain(|_, rel| !is_inferred(&rel.properties));
        Ok(before - self.state.relationships.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::{PropValue, PropertyBag};

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    fn node_op(ids: &[&str], name: &str) -> WriteOp {
        WriteOp::UpsertNodes {
            labels: vec!["Wall".into(), "Element".into()],
            rows: ids
                .iter()
                .map(|id| NodeRow {
                    identifier: (*id).into(),
                    properties: PropertyBag::from([("name".to_string(), PropValue::from(name))]),
                })
                .collect(),
        }
    }

    fn edge_op(pairs: &[(&str, &str)], provenance: &str) -> WriteOp {
        WriteOp::UpsertRelationships {
            label: "ADJACENT".into(),
            rows: pairs
                .iter()
                .map(|(s, t)| EdgeRow {
                    source: (*s).into(),
                    target: (*t).into(),
                    properties: PropertyBag::from([(
                        "provenance".to_string(),
                        PropValue::from(provenance),
                    )]),
                })
                .collect(),
        }
    }

    #[test]
    fn nodes_are_created_once_and_never_overwritten() {
        let store = MemoryGraphStore::new();
        let mut session = store.open_session().unwrap();

        let first = session.run(&node_op(&["w1", "w2"], "first"), far()).unwrap();
        assert_eq!(first.nodes_created, 2);
        let second = session.run(&node_op(&["w1"], "second"), far()).unwrap();
        assert_eq!(second.rows, 1);
        assert_eq!(second.nodes_created, 0);

        let node = store.node("w1").unwrap();
        assert_eq!(node.properties.get("name"), Some(&PropValue::from("first")));
        assert!(node.labels.contains("Entity"));
        assert!(node.labels.contains("Wall"));
        assert_eq!(store.node_count(), 2);
    }

    #[test]
    fn relationships_need_both_endpoints() {
        let store = MemoryGraphStore::new();
        let mut session = store.open_session().unwrap();
        session.run(&node_op(&["a", "b"], "n"), far()).unwrap();

        let summary = session
            .run(&edge_op(&[("a", "b"), ("a", "ghost")], "inferred"), far())
            .unwrap();
        assert_eq!(summary.relationships_created, 1);
        assert_eq!(summary.unmatched, 1);
        assert_eq!(summary.unmatched_rows, vec![1]);
        assert_eq!(summary.matched_rows(), 1);
        assert!(store.relationship("a", "ADJACENT", "b").is_some());

        let again = session.run(&edge_op(&[("a", "b")], "inferred"), far()).unwrap();
        assert_eq!(again.relationships_created, 0);
        assert_eq!(store.relationship_count(), 1);
        assert_eq!(store.relationship_writes("a", "ADJACENT", "b"), 2);
        assert_eq!(store.round_trips(), 3);
    }

    #[test]
    fn clear_inferred_keeps_declared() {
        let store = MemoryGraphStore::new();
        let mut session = store.open_session().unwrap();
        session.run(&node_op(&["a", "b", "c"], "n"), far()).unwrap();
        session.run(&edge_op(&[("a", "b")], "inferred"), far()).unwrap();
        session.run(&edge_op(&[("b", "c")], "declared"), far()).unwrap();

        assert_eq!(session.clear_inferred().unwrap(), 1);
        assert!(store.relationship("a", "ADJACENT", "b").is_none());
        assert!(store.relationship("b", "ADJACENT", "c").is_some());
    }

    #[test]
    fn injected_faults() {
        let store = MemoryGraphStore::with_faults(FaultPlan::failing(["bad"]));
        let mut session = store.open_session().unwrap();
        let err = session.run(&node_op(&["ok", "bad"], "n"), far()).unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
        assert!(!err.is_fatal());
        assert_eq!(store.node_count(), 0);

        store.set_faults(FaultPlan {
            disconnect_after: Some(0),
            ..FaultPlan::default()
        });
        let err = session.run(&node_op(&["ok"], "n"), far()).unwrap_err();
        assert!(err.is_fatal());

        store.set_faults(FaultPlan {
            latency: Some(Duration::from_millis(20)),
            ..FaultPlan::default()
        });
        let err = session
            .run(&node_op(&["ok"], "n"), Instant::now() + Duration::from_millis(1))
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));

        store.clear_faults();
        assert!(session.run(&node_op(&["ok"], "n"), far()).is_ok());
        assert_eq!(store.node("ok").unwrap().properties.len(), 1);
    }

    #[test]
    fn node_only_faults_let_relationships_through() {
        let store = MemoryGraphStore::with_faults(FaultPlan::failing_nodes(["b"]));
        let mut session = store.open_session().unwrap();
        session.run(&node_op(&["a"], "n"), far()).unwrap();
        assert!(session.run(&node_op(&["b"], "n"), far()).is_err());

        let summary = session.run(&edge_op(&[("a", "b")], "inferred"), far()).unwrap();
        assert_eq!(summary.unmatched_rows, vec![0]);
        assert_eq!(store.relationship_count(), 0);
    }
}

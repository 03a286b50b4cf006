//! ACID-durable graph store backed by redb.
//!
//! Nodes and relationships live in two tables with JSON values. Each
//! [`WriteOp`] is one write transaction: a batch commits entirely or not at
//! all, and a batch that overruns its deadline is rolled back.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::error::StoreError;

use super::{
    EdgeRow, GraphBackend, GraphSession, LOOKUP_LABEL, NodeRow, StoreResult, StoredNode,
    StoredRelationship, WriteOp, WriteSummary, is_inferred, relationship_key,
};

/// Node identifier → JSON-encoded [`StoredNode`].
const NODES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// `source␟LABEL␟target` → JSON-encoded [`StoredRelationship`].
const RELATIONSHIPS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("relationships");

const FILE_NAME: &str = "topograph.redb";

fn redb_err<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::Redb {
        message: format!("{what} failed: {e}"),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

/// Persistent graph store using redb.
///
/// All writes go through transactions. Reads use MVCC snapshots.
#[derive(Clone)]
pub struct DurableGraphStore {
    db: Arc<Database>,
}

impl DurableGraphStore {
    /// Open or create a store in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join(FILE_NAME);
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        // Create both tables up front so read transactions can open them.
        let txn = db.begin_write().map_err(redb_err("begin_write"))?;
        txn.open_table(NODES_TABLE).map_err(redb_err("open_table"))?;
        txn.open_table(RELATIONSHIPS_TABLE)
            .map_err(redb_err("open_table"))?;
        txn.commit().map_err(redb_err("commit"))?;

        tracing::debug!(path = %db_path.display(), "durable graph store opened");
        Ok(Self { db: Arc::new(db) })
    }

    pub fn node(&self, identifier: &str) -> StoreResult<Option<StoredNode>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let table = txn.open_table(NODES_TABLE).map_err(redb_err("open_table"))?;
        let value = table.get(identifier).map_err(redb_err("get"))?;
        value.map(|guard| decode(guard.value())).transpose()
    }

    pub fn relationship(
        &self,
        source: &str,
        label: &str,
        target: &str,
    ) -> StoreResult<Option<StoredRelationship>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let table = txn
            .open_table(RELATIONSHIPS_TABLE)
            .map_err(redb_err("open_table"))?;
        let key = relationship_key(source, label, target);
        let value = table.get(key.as_str()).map_err(redb_err("get"))?;
        value.map(|guard| decode(guard.value())).transpose()
    }

    pub fn node_count(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let table = txn.open_table(NODES_TABLE).map_err(redb_err("open_table"))?;
        table.len().map_err(redb_err("len"))
    }

    pub fn relationship_count(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let table = txn
            .open_table(RELATIONSHIPS_TABLE)
            .map_err(redb_err("open_table"))?;
        table.len().map_err(redb_err("len"))
    }
}

impl std::fmt::Debug for DurableGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableGraphStore").finish()
    }
}

impl GraphBackend for DurableGraphStore {
    type Session = DurableSession;

    fn open_session(&self) -> StoreResult<DurableSession> {
        Ok(DurableSession {
            db: Arc::clone(&self.db),
        })
    }

    fn name(&self) -> &'static str {
        "redb"
    }
}

/// Session of a [`DurableGraphStore`].
pub struct DurableSession {
    db: Arc<Database>,
}

impl DurableSession {
    fn write_nodes(
        &self,
        txn: &redb::WriteTransaction,
        labels: &[String],
        rows: &[&NodeRow],
    ) -> StoreResult<WriteSummary> {
        let mut table = txn.open_table(NODES_TABLE).map_err(redb_err("open_table"))?;
        let mut summary = WriteSummary::default();
        for row in rows {
            summary.rows += 1;
            let exists = table
                .get(row.identifier.as_str())
                .map_err(redb_err("get"))?
                .is_some();
            if exists {
                continue;
            }
            let mut node = StoredNode {
                labels: labels.iter().cloned().collect(),
                properties: row.properties.clone(),
            };
            node.labels.insert(LOOKUP_LABEL.to_string());
            let bytes = encode(&node)?;
            table
                .insert(row.identifier.as_str(), bytes.as_slice())
                .map_err(redb_err("insert"))?;
            summary.nodes_created += 1;
        }
        Ok(summary)
    }

    fn write_relationships(
        &self,
        txn: &redb::WriteTransaction,
        label: &str,
        rows: &[&EdgeRow],
    ) -> StoreResult<WriteSummary> {
        let nodes = txn.open_table(NODES_TABLE).map_err(redb_err("open_table"))?;
        let mut table = txn
            .open_table(RELATIONSHIPS_TABLE)
            .map_err(redb_err("open_table"))?;
        let mut summary = WriteSummary::default();
        for (position, row) in rows.iter().enumerate() {
            summary.rows += 1;
            let source = nodes
                .get(row.source.as_str())
                .map_err(redb_err("get"))?
                .is_some();
            let target = nodes
                .get(row.target.as_str())
                .map_err(redb_err("get"))?
                .is_some();
            if !source || !target {
                summary.mark_unmatched(position);
                continue;
            }
            let key = relationship_key(&row.source, label, &row.target);
            let exists = table.get(key.as_str()).map_err(redb_err("get"))?.is_some();
            if exists {
                continue;
            }
            let bytes = encode(&StoredRelationship {
                source: row.source.clone(),
                label: label.to_string(),
                target: row.target.clone(),
                properties: row.properties.clone(),
            })?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(redb_err("insert"))?;
            summary.relationships_created += 1;
        }
        Ok(summary)
    }
}

impl GraphSession for DurableSession {
    fn run(&mut self, op: &WriteOp, deadline: Instant) -> StoreResult<WriteSummary> {
        let started = Instant::now();
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        let summary = match op {
            WriteOp::UpsertNode { labels, row } => self.write_nodes(&txn, labels, &[row])?,
            WriteOp::UpsertNodes { labels, rows } => {
                self.write_nodes(&txn, labels, &rows.iter().collect::<Vec<_>>())?
            }
            WriteOp::UpsertRelationship { label, row } => {
                self.write_relationships(&txn, label, &[row])?
            }
            WriteOp::UpsertRelationships { label, rows } => {
                self.write_relationships(&txn, label, &rows.iter().collect::<Vec<_>>())?
            }
        };
        if Instant::now() > deadline {
            txn.abort().map_err(redb_err("abort"))?;
            return Err(StoreError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(summary)
    }

    fn clear_inferred(&mut self) -> StoreResult<usize> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        let removed = {
            let mut table = txn
                .open_table(RELATIONSHIPS_TABLE)
                .map_err(redb_err("open_table"))?;
            let mut doomed = Vec::new();
            for entry in table.iter().map_err(redb_err("iter"))? {
                let (key, value) = entry.map_err(redb_err("iter"))?;
                let rel: StoredRelationship = decode(value.value())?;
                if is_inferred(&rel.properties) {
                    doomed.push(key.value().to_string());
                }
            }
            for key in &doomed {
                table.remove(key.as_str()).map_err(redb_err("remove"))?;
            }
            doomed.len()
        };
        txn.commit().map_err(redb_err("commit"))?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::{PropValue, PropertyBag};
    use std::time::Duration;
    use tempfile::TempDir;

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    fn nodes(ids: &[&str], name: &str) -> WriteOp {
        WriteOp::UpsertNodes {
            labels: vec!["Wall".into()],
            rows: ids
                .iter()
                .map(|id| NodeRow {
                    identifier: (*id).into(),
                    properties: PropertyBag::from([("name".to_string(), PropValue::from(name))]),
                })
                .collect(),
        }
    }

    fn edge(source: &str, target: &str, provenance: &str) -> WriteOp {
        WriteOp::UpsertRelationship {
            label: "ADJACENT".into(),
            row: EdgeRow {
                source: source.into(),
                target: target.into(),
                properties: PropertyBag::from([(
                    "provenance".to_string(),
                    PropValue::from(provenance),
                )]),
            },
        }
    }

    #[test]
    fn merge_semantics() {
        let dir = TempDir::new().unwrap();
        let store = DurableGraphStore::open(dir.path()).unwrap();
        let mut session = store.open_session().unwrap();

        assert_eq!(session.run(&nodes(&["a", "b"], "v1"), far()).unwrap().nodes_created, 2);
        assert_eq!(session.run(&nodes(&["a"], "v2"), far()).unwrap().nodes_created, 0);
        let a = store.node("a").unwrap().unwrap();
        assert_eq!(a.properties.get("name"), Some(&PropValue::from("v1")));
        assert!(a.labels.contains("Entity"));

        let created = session.run(&edge("a", "b", "inferred"), far()).unwrap();
        assert_eq!(created.relationships_created, 1);
        let repeat = session.run(&edge("a", "b", "inferred"), far()).unwrap();
        assert_eq!(repeat.relationships_created, 0);
        let dangling = session.run(&edge("a", "zz", "inferred"), far()).unwrap();
        assert_eq!(dangling.unmatched, 1);
        assert_eq!(store.relationship_count().unwrap(), 1);
    }

    #[test]
    fn expired_deadline_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = DurableGraphStore::open(dir.path()).unwrap();
        let mut session = store.open_session().unwrap();
        let past = Instant::now() - Duration::from_millis(1);
        let err = session.run(&nodes(&["a"], "v"), past).unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));
        assert_eq!(store.node_count().unwrap(), 0);
    }

    #[test]
    fn clear_inferred_only() {
        let dir = TempDir::new().unwrap();
        let store = DurableGraphStore::open(dir.path()).unwrap();
        let mut session = store.open_session().unwrap();
        session.run(&nodes(&["a", "b", "c"], "v"), far()).unwrap();
        session.run(&edge("a", "b", "inferred"), far()).unwrap();
        session.run(&edge("b", "c", "declared"), far()).unwrap();

        assert_eq!(session.clear_inferred().unwrap(), 1);
        assert!(store.relationship("a", "ADJACENT", "b").unwrap().is_none());
        assert!(store.relationship("b", "ADJACENT", "c").unwrap().is_some());
    }

    #[test]
    fn persistence_across_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let store = DurableGraphStore::open(dir.path()).unwrap();
            let mut session = store.open_session().unwrap();
            session.run(&nodes(&["keep"], "v"), far()).unwrap();
        }
        let store = DurableGraphStore::open(dir.path()).unwrap();
        assert!(store.node("keep").unwrap().is_some());
        assert_eq!(store.node_count().unwrap(), 1);
    }
}

//! Cypher rendering of write operations.
//!
//! Relationship writes bind the source node first and match the target
//! relative to it (`MATCH … WITH a MATCH …`), so the planner never builds a
//! cross product of two unconnected patterns. Batches become one `UNWIND`
//! statement instead of one round trip per row.
//!
//! [`CypherScript`] is a backend that records the rendered statements
//! instead of executing them, for dry runs and for handing the script to a
//! Bolt client.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::relation::PropertyBag;

use super::{
    EdgeRow, GraphBackend, GraphSession, LOOKUP_LABEL, NodeRow, StoreResult, WriteOp,
    WriteSummary,
};

/// A statement with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CypherStatement {
    pub text: String,
    pub params: Value,
}

/// Backtick-quote a label.
pub fn quote_label(label: &str) -> String {
    format!("`{}`", label.replace('`', "``"))
}

fn properties(bag: &PropertyBag) -> StoreResult<Value> {
    serde_json::to_value(bag).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

fn node_row(row: &NodeRow) -> StoreResult<Value> {
    let mut map = Map::new();
    map.insert("identifier".into(), Value::String(row.identifier.clone()));
    map.insert("properties".into(), properties(&row.properties)?);
    Ok(Value::Object(map))
}

fn edge_row(row: &EdgeRow) -> StoreResult<Value> {
    let mut map = Map::new();
    map.insert("source".into(), Value::String(row.source.clone()));
    map.insert("target".into(), Value::String(row.target.clone()));
    map.insert("properties".into(), properties(&row.properties)?);
    Ok(Value::Object(map))
}

/// `SET` clause adding the extra labels of a node.
fn extra_labels(labels: &[String]) -> String {
    labels
        .iter()
        .filter(|l| l.as_str() != LOOKUP_LABEL)
        .map(|l| format!(", n:{}", quote_label(l)))
        .collect()
}

/// Render one write as a parameterised statement.
pub fn render(op: &WriteOp) -> StoreResult<CypherStatement> {
    let lookup = quote_label(LOOKUP_LABEL);
    match op {
        WriteOp::UpsertNode { labels, row } => Ok(CypherStatement {
            text: format!(
                "MERGE (n:{lookup} {{identifier: $identifier}}) \
                 ON CREATE SET n += $properties{}",
                extra_labels(labels)
            ),
            params: node_row(row)?,
        }),
        WriteOp::UpsertNodes { labels, rows } => Ok(CypherStatement {
            text: format!(
                "UNWIND $rows AS row \
                 MERGE (n:{lookup} {{identifier: row.identifier}}) \
                 ON CREATE SET n += row.properties{}",
                extra_labels(labels)
            ),
            params: rows_param(rows.iter().map(node_row))?,
        }),
        WriteOp::UpsertRelationship { label, row } => Ok(CypherStatement {
            text: format!(
                "MATCH (a:{lookup} {{identifier: $source}}) \
                 WITH a MATCH (b:{lookup} {{identifier: $target}}) \
                 MERGE (a)-[r:{}]->(b) \
                 ON CREATE SET r += $properties",
                quote_label(label)
            ),
            params: edge_row(row)?,
        }),
        WriteOp::UpsertRelationships { label, rows } => Ok(CypherStatement {
            text: format!(
                "UNWIND $rows AS row \
                 MATCH (a:{lookup} {{identifier: row.source}}) \
                 WITH a, row MATCH (b:{lookup} {{identifier: row.target}}) \
                 MERGE (a)-[r:{}]->(b) \
                 ON CREATE SET r += row.properties",
                quote_label(label)
            ),
            params: rows_param(rows.iter().map(edge_row))?,
        }),
    }
}

fn rows_param(rows: impl Iterator<Item = StoreResult<Value>>) -> StoreResult<Value> {
    let rows = rows.collect::<StoreResult<Vec<_>>>()?;
    let mut map = Map::new();
    map.insert("rows".into(), Value::Array(rows));
    Ok(Value::Object(map))
}

/// Statement deleting every inferred relationship.
pub fn clear_inferred_statement() -> CypherStatement {
    CypherStatement {
        text: "MATCH ()-[r]->() WHERE r.provenance = 'inferred' DELETE r".to_string(),
        params: Value::Object(Map::new()),
    }
}

/// Backend recording rendered statements in order.
#[derive(Debug, Clone, Default)]
pub struct CypherScript {
    statements: Arc<Mutex<Vec<CypherStatement>>>,
}

impl CypherScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> Vec<CypherStatement> {
        self.statements
            .lock()
            .expect("cypher script lock poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.statements
            .lock()
            .expect("cypher script lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One JSON object per line.
    pub fn to_json_lines(&self) -> StoreResult<String> {
        let mut out = String::new();
        for statement in self.statements() {
            let line = serde_json::to_string(&statement).map_err(|e| StoreError::Serialization {
                message: e.to_string(),
            })?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    fn push(&self, statement: CypherStatement) {
        self.statements
            .lock()
            .expect("cypher script lock poisoned")
            .push(statement);
    }
}

impl GraphBackend for CypherScript {
    type Session = CypherScript;

    fn open_session(&self) -> StoreResult<CypherScript> {
        Ok(self.clone())
    }

    fn name(&self) -> &'static str {
        "cypher-script"
    }
}

impl GraphSession for CypherScript {
    fn run(&mut self, op: &WriteOp, _deadline: Instant) -> StoreResult<WriteSummary> {
        self.push(render(op)?);
        Ok(WriteSummary {
            rows: op.rows(),
            ..WriteSummary::default()
        })
    }

    fn clear_inferred(&mut self) -> StoreResult<usize> {
        self.push(clear_inferred_statement());
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::PropValue;

    fn edge(source: &str, target: &str) -> EdgeRow {
        EdgeRow {
            source: source.into(),
            target: target.into(),
            properties: PropertyBag::from([("kind".to_string(), PropValue::from("adjacency"))]),
        }
    }

    #[test]
    fn relationship_lookups_are_chained() {
        let statement = render(&WriteOp::UpsertRelationship {
            label: "ADJACENT".into(),
            row: edge("w1", "w2"),
        })
        .unwrap();
        assert!(statement.text.contains("WITH a MATCH (b:`Entity`"));
        assert!(!statement.text.contains("MATCH (a:`Entity` {identifier: $source}), (b"));
        assert!(statement.text.contains("MERGE (a)-[r:`ADJACENT`]->(b)"));
        assert!(statement.text.contains("ON CREATE SET r += $properties"));
        assert_eq!(statement.params["source"], "w1");
        assert_eq!(statement.params["properties"]["kind"], "adjacency");
    }

    #[test]
    fn batches_use_one_unwind() {
        let statement = render(&WriteOp::UpsertRelationships {
            label: "BOUNDS_SPACE".into(),
            rows: vec![edge("w1", "s1"), edge("w2", "s1")],
        })
        .unwrap();
        assert!(statement.text.starts_with("UNWIND $rows AS row"));
        assert!(statement.text.contains("WITH a, row MATCH"));
        assert_eq!(statement.params["rows"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn node_labels_set_on_create_only() {
        let statement = render(&WriteOp::UpsertNodes {
            labels: vec!["Wall".into(), "Element".into(), "Entity".into()],
            rows: vec![NodeRow {
                identifier: "w1".into(),
                properties: PropertyBag::new(),
            }],
        })
        .unwrap();
        assert!(statement.text.contains("MERGE (n:`Entity` {identifier: row.identifier})"));
        assert!(statement.text.ends_with("ON CREATE SET n += row.properties, n:`Wall`, n:`Element`"));
    }

    #[test]
    fn labels_are_quoted() {
        assert_eq!(quote_label("odd`label"), "`odd``label`");
    }

    #[test]
    fn script_records_in_order() {
        let script = CypherScript::new();
        let mut session = script.open_session().unwrap();
        session
            .run(
                &WriteOp::UpsertRelationship {
                    label: "ADJACENT".into(),
                    row: edge("a", "b"),
                },
                Instant::now(),
            )
            .unwrap();
        session.clear_inferred().unwrap();
        assert_eq!(script.len(), 2);
        assert!(script.statements()[1].text.contains("DELETE r"));
        assert_eq!(script.to_json_lines().unwrap().lines().count(), 2);
    }
}

//! The columnar engine collaborator. A columnar file reader and persistent
//! data-file storage are external to this crate; `ColumnarEngine` is the
//! seam: the materializer (materializer.rs) builds a `PartitionQuery` per
//! data file and hands it here, exactly the way `bpmn-lite-core`'s engine
//! hands storage operations to a `ProcessStore` implementation.
//!
//! `InMemoryColumnarEngine` is a POC implementation good enough to exercise
//! the materializer in tests; a production deployment would swap in a real
//! engine (duckdb, a parquet reader, etc.) without touching
//! materializer.rs.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::{GridError, Result};
use crate::predicate::{Predicate, Row};

pub type RecordBatch = Vec<Row>;

/// One data file's worth of work, as the materializer would ask a real SQL
/// engine to do it. `rendered_sql` is the human-readable statement a real
/// engine would receive (built by `materializer::render_partition_sql`);
/// `InMemoryColumnarEngine` ignores it and interprets `predicate` directly.
#[derive(Clone, Debug)]
pub struct PartitionQuery {
    pub rendered_sql: String,
    pub columns: Option<Vec<String>>,
    pub predicate: Option<Predicate>,
    pub deletes: Option<RecordBatch>,
    pub dedup_keys_seen: Option<RecordBatch>,
    pub dedup_keys: Option<Vec<String>>,
}

#[async_trait]
pub trait ColumnarEngine: Send + Sync {
    /// Reads a data file's full, unfiltered contents. Used both for write
    /// partitions (as the base relation of a `PartitionQuery`) and for
    /// delete-file contents.
    async fn read_data_file(&self, data_filename: &str) -> Result<RecordBatch>;

    /// Executes one of the materializer's four query shapes against
    /// `base_rows`: no filter, deletes-only, dedup-only, or both.
    async fn execute_partition_query(
        &self,
        base_rows: RecordBatch,
        query: &PartitionQuery,
    ) -> Result<RecordBatch>;
}

/// An in-memory stand-in for a real columnar engine, keyed by data
/// filename. Good enough to drive the materializer end to end in tests.
#[derive(Default)]
pub struct InMemoryColumnarEngine {
    files: std::collections::HashMap<String, RecordBatch>,
}

impl InMemoryColumnarEngine {
    pub fn new() -> Self {
        InMemoryColumnarEngine {
            files: std::collections::HashMap::new(),
        }
    }

    pub fn put_file(&mut self, data_filename: impl Into<String>, rows: RecordBatch) {
        self.files.insert(data_filename.into(), rows);
    }
}

#[async_trait]
impl ColumnarEngine for InMemoryColumnarEngine {
    async fn read_data_file(&self, data_filename: &str) -> Result<RecordBatch> {
        self.files
            .get(data_filename)
            .cloned()
            .ok_or_else(|| GridError::not_found(format!("no such data file: {data_filename}")))
    }

    async fn execute_partition_query(
        &self,
        base_rows: RecordBatch,
        query: &PartitionQuery,
    ) -> Result<RecordBatch> {
        let mut rows: RecordBatch = base_rows
            .into_iter()
            .filter(|row| {
                query
                    .predicate
                    .as_ref()
                    .map(|p| p.evaluate(row))
                    .unwrap_or(true)
            })
            .collect();

        if let Some(deletes) = &query.deletes {
            let join_columns: Vec<&String> = deletes
                .first()
                .map(|r| r.keys().collect())
                .unwrap_or_default();
            rows.retain(|row| !relation_contains(deletes, row, &join_columns));
        }

        if let (Some(seen), Some(keys)) = (&query.dedup_keys_seen, &query.dedup_keys) {
            let key_refs: Vec<&String> = keys.iter().collect();
            rows.retain(|row| !relation_contains(seen, row, &key_refs));
        }

        if let Some(columns) = &query.columns {
            rows = rows
                .into_iter()
                .map(|row| project(&row, columns))
                .collect();
        }

        Ok(rows)
    }
}

fn relation_contains(relation: &RecordBatch, row: &Row, join_columns: &[&String]) -> bool {
    if join_columns.is_empty() {
        return false;
    }
    relation.iter().any(|candidate| {
        join_columns
            .iter()
            .all(|c| candidate.get(c.as_str()) == row.get(c.as_str()))
    })
}

fn project(row: &Row, columns: &[String]) -> Row {
    let mut out = BTreeMap::new();
    for c in columns {
        if let Some(v) = row.get(c) {
            out.insert(c.clone(), v.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Literal;

    fn row(pairs: &[(&str, Literal)]) -> Row {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[tokio::test]
    async fn filters_by_predicate() {
        let engine = InMemoryColumnarEngine::new();
        let base = vec![
            row(&[("id", Literal::Int(1))]),
            row(&[("id", Literal::Int(2))]),
        ];
        let query = PartitionQuery {
            rendered_sql: String::new(),
            columns: None,
            predicate: Some(Predicate::eq(1, "id", Literal::Int(2))),
            deletes: None,
            dedup_keys_seen: None,
            dedup_keys: None,
        };
        let result = engine.execute_partition_query(base, &query).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].get("id"), Some(&Literal::Int(2)));
    }

    #[tokio::test]
    async fn applies_deletes_antijoin() {
        let engine = InMemoryColumnarEngine::new();
        let base = vec![
            row(&[("id", Literal::Int(1))]),
            row(&[("id", Literal::Int(2))]),
        ];
        let deletes = vec![row(&[("id", Literal::Int(1))])];
        let query = PartitionQuery {
            rendered_sql: String::new(),
            columns: None,
            predicate: None,
            deletes: Some(deletes),
            dedup_keys_seen: None,
            dedup_keys: None,
        };
        let result = engine.execute_partition_query(base, &query).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].get("id"), Some(&Literal::Int(2)));
    }
}

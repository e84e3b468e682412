//! Table data-file model: versions, schemas and the segment log a reader
//! walks to materialize a table.
//!
//! A table's on-disk presence is a `TableVersion` (a schema plus an
//! ordered list of `DataFileEntry`s) and the reader resolves a query
//! against it by composing `Op`s. None of this module touches actual
//! bytes on disk — persistence is left to the `ColumnarEngine` and
//! `TableVersionRegistry` collaborators (query_engine.rs,
//! table_registry.rs), which this module's types are passed through.

use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};
use crate::predicate::Predicate;

/// One entry in a table version's ordered data-file list, newest first.
/// `DeleteAll` is a terminator: the materializer stops walking the list
/// once it sees one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataFileEntry {
    Write { data_filename: String },
    Delete { data_filename: String },
    DeleteAll,
}

/// A table's column-level schema, as far as the reader cares: which
/// columns (if any) define row identity for deduplication. Column types
/// and names beyond this are owned by the columnar engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub deduplication_keys: Option<Vec<String>>,
}

impl TableSchema {
    pub fn with_dedup_keys(keys: Vec<String>) -> Self {
        TableSchema {
            deduplication_keys: Some(keys),
        }
    }
}

/// A single published version of a table: which data files exist as of
/// that version, and which schema (if any override of the table's
/// default) applies to it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableVersion {
    pub version_number: i64,
    pub table_schema_filename: Option<String>,
    pub data_list_filename: String,
}

/// The resolved value a reader operates on: a table version plus the
/// pending operations (`SelectColumns`/`SelectRows`) accumulated by a
/// chained query builder, mirroring `MdbTable.__getitem__` in the
/// original reader.
#[derive(Clone, Debug)]
pub struct MdbTable {
    pub version_number: i64,
    pub schema: TableSchema,
    pub data_files: Vec<DataFileEntry>,
    pub ops: Vec<Op>,
}

/// A pending operation queued against an `MdbTable`. Column selection and
/// row filtering are both deferred until materialization so that the
/// materializer can push them down into the per-segment SQL it issues to
/// the columnar engine.
#[derive(Clone, Debug)]
pub enum Op {
    SelectColumns(Vec<String>),
    SelectRows(Predicate),
}

impl MdbTable {
    pub fn new(version_number: i64, schema: TableSchema, data_files: Vec<DataFileEntry>) -> Self {
        MdbTable {
            version_number,
            schema,
            data_files,
            ops: Vec::new(),
        }
    }

    /// Returns a new table value with the op appended. Queued ops apply
    /// left-to-right, mirroring repeated `table[cond]`/`table[cols]`
    /// indexing chains in the original reader.
    pub fn with_op(&self, op: Op) -> Self {
        let mut next = self.clone();
        next.ops.push(op);
        next
    }

    /// Appends a `SelectColumns` op, enforcing projection monotonicity:
    /// once a projection is in effect, a later one must narrow it (be a
    /// subset of the running column set), never broaden it. Fails naming
    /// the offending columns otherwise.
    pub fn select_columns(&self, columns: Vec<String>) -> Result<Self> {
        if let Some(current) = self.projected_columns() {
            let offending: Vec<&String> = columns.iter().filter(|c| !current.contains(c)).collect();
            if !offending.is_empty() {
                return Err(GridError::validation(format!(
                    "cannot select columns {offending:?}: not present in the current projection {current:?}"
                )));
            }
        }
        Ok(self.with_op(Op::SelectColumns(columns)))
    }

    /// Appends a `SelectRows` op. Rejects a predicate built against a
    /// different table version than this one: the predicate's leaves must
    /// all agree with the outer table's `version_number`.
    pub fn select_rows(&self, predicate: Predicate) -> Result<Self> {
        if predicate.table_version() != self.version_number {
            return Err(GridError::validation(format!(
                "predicate was built against table version {}, but this table is version {}",
                predicate.table_version(),
                self.version_number
            )));
        }
        Ok(self.with_op(Op::SelectRows(predicate)))
    }

    /// The columns this table's ops would project, if any `SelectColumns`
    /// op has been queued. `None` means "all columns".
    pub fn projected_columns(&self) -> Option<&[String]> {
        self.ops.iter().rev().find_map(|op| match op {
            Op::SelectColumns(cols) => Some(cols.as_slice()),
            Op::SelectRows(_) => None,
        })
    }

    /// All row predicates queued on this table, ANDed together in queue
    /// order.
    pub fn row_predicates(&self) -> Vec<&Predicate> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::SelectRows(p) => Some(p),
                Op::SelectColumns(_) => None,
            })
            .collect()
    }
}

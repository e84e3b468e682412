//! Table materialization.
//!
//! This is the Rust counterpart of `MdbTable.to_pd` in the original
//! reader: walk a table's data files newest-first, track which rows have
//! since been deleted or superseded by a deduplication key, issue one of
//! four query shapes per write partition, then stitch the partition
//! results back together oldest-first.

use crate::datafile::{DataFileEntry, MdbTable};
use crate::error::Result;
use crate::predicate::{Predicate, Row};
use crate::query_engine::{ColumnarEngine, PartitionQuery, RecordBatch};

const TABLE_ALIAS_PLACEHOLDER: &str = "[!!__to_be_replaced_table_name__!!]";

/// Builds the combined row predicate for a table's queued `SelectRows`
/// ops, ANDed left to right, mirroring `_construct_sql`'s row_args fold.
fn combined_predicate(table: &MdbTable) -> Result<Option<Predicate>> {
    let mut predicates = table.row_predicates().into_iter();
    let Some(first) = predicates.next() else {
        return Ok(None);
    };
    let mut acc = first.clone();
    for next in predicates {
        acc = acc.and(next.clone())?;
    }
    Ok(Some(acc))
}

/// Renders the `SELECT ...` and `WHERE ...` clause text a real SQL engine
/// would receive, with `table_alias` substituted for the placeholder used
/// internally (mirrors `_table_name_placeholder` in the original reader).
/// `InMemoryColumnarEngine` doesn't parse this — it's carried on
/// `PartitionQuery::rendered_sql` for engines (and humans) that do.
pub fn render_select_and_where(table: &MdbTable, table_alias: &str) -> Result<(String, String)> {
    let select_clause = match table.projected_columns() {
        None => format!("SELECT {TABLE_ALIAS_PLACEHOLDER}.*"),
        Some(columns) => {
            let cols = columns
                .iter()
                .map(|c| format!("{TABLE_ALIAS_PLACEHOLDER}.\"{c}\""))
                .collect::<Vec<_>>()
                .join(", ");
            format!("SELECT {cols}")
        }
    };

    let where_clause = match combined_predicate(table)? {
        None => "TRUE".to_string(),
        Some(p) => p.to_sql(TABLE_ALIAS_PLACEHOLDER),
    };

    Ok((
        select_clause.replace(TABLE_ALIAS_PLACEHOLDER, table_alias),
        where_clause.replace(TABLE_ALIAS_PLACEHOLDER, table_alias),
    ))
}

/// One of the four shapes `to_pd` issues per write partition, built purely
/// for documentation/tracing — the actual filtering is expressed
/// structurally on `PartitionQuery` so `ColumnarEngine` implementations
/// don't need a SQL parser.
fn render_partition_sql(
    select_clause: &str,
    where_clause: &str,
    table_alias: &str,
    has_deletes: bool,
    has_dedup: bool,
    dedup_keys: Option<&[String]>,
) -> String {
    match (has_deletes, has_dedup) {
        (false, false) => format!("{select_clause} FROM {table_alias} WHERE {where_clause}"),
        (true, false) => format!(
            "{select_clause} FROM {table_alias} LEFT JOIN ds ON <delete columns> \
             WHERE ds.__mdb_reserved_indicator__ IS NULL AND {where_clause}"
        ),
        (false, true) => {
            let keys = dedup_keys.map(|k| k.join(", ")).unwrap_or_default();
            format!(
                "{select_clause} FROM {table_alias} LEFT JOIN pks ON {keys} \
                 WHERE pks.__mdb_reserved_indicator__ IS NULL AND {where_clause}"
            )
        }
        (true, true) => format!(
            "{select_clause} FROM {table_alias} LEFT JOIN ds ON <delete columns> \
             LEFT JOIN pks ON <dedup columns> WHERE ds.__mdb_reserved_indicator__ IS NULL \
             AND pks.__mdb_reserved_indicator__ IS NULL AND {where_clause}"
        ),
    }
}

fn project_dedup_keys(rows: &RecordBatch, keys: &[String]) -> RecordBatch {
    rows.iter()
        .map(|row| {
            keys.iter()
                .filter_map(|k| row.get(k).map(|v| (k.clone(), v.clone())))
                .collect::<Row>()
        })
        .collect()
}

/// Materializes `table` against `engine`: walks `table.data_files`
/// newest-first, accumulating deletes and (if the schema defines
/// deduplication_keys) the keys already seen in a newer partition, then
/// returns the assembled rows oldest-first.
pub async fn materialize(engine: &dyn ColumnarEngine, table: &MdbTable) -> Result<RecordBatch> {
    let (select_clause, where_clause) = render_select_and_where(table, "t")?;
    let predicate = combined_predicate(table)?;
    let columns = table.projected_columns().map(|c| c.to_vec());
    let dedup_keys = table.schema.deduplication_keys.clone();

    let mut partition_results: Vec<RecordBatch> = Vec::new();
    let mut deletes: RecordBatch = Vec::new();
    let mut deletes_columns: Option<std::collections::BTreeSet<String>> = None;
    let mut dedup_keys_seen: RecordBatch = Vec::new();

    for entry in table.data_files.iter().rev() {
        match entry {
            DataFileEntry::Write { data_filename } => {
                let base_rows = engine.read_data_file(data_filename).await?;

                let rendered_sql = render_partition_sql(
                    &select_clause,
                    &where_clause,
                    "t",
                    !deletes.is_empty(),
                    !dedup_keys_seen.is_empty(),
                    dedup_keys.as_deref(),
                );

                let query = PartitionQuery {
                    rendered_sql,
                    columns: columns.clone(),
                    predicate: predicate.clone(),
                    deletes: if deletes.is_empty() {
                        None
                    } else {
                        Some(deletes.clone())
                    },
                    dedup_keys_seen: if dedup_keys_seen.is_empty() {
                        None
                    } else {
                        Some(dedup_keys_seen.clone())
                    },
                    dedup_keys: dedup_keys.clone(),
                };

                let result = engine.execute_partition_query(base_rows, &query).await?;

                if let Some(keys) = &dedup_keys {
                    dedup_keys_seen.extend(project_dedup_keys(&result, keys));
                }

                partition_results.push(result);
            }
            DataFileEntry::Delete { data_filename } => {
                let delete_rows = engine.read_data_file(data_filename).await?;
                if let Some(first) = delete_rows.first() {
                    let columns: std::collections::BTreeSet<String> =
                        first.keys().cloned().collect();
                    match &deletes_columns {
                        Some(existing) if *existing != columns => {
                            return Err(crate::error::GridError::unsupported(format!(
                                "deletes on different columns not supported: {data_filename} has {columns:?}, expected {existing:?}"
                            )));
                        }
                        Some(_) => {}
                        None => deletes_columns = Some(columns),
                    }
                }
                deletes.extend(delete_rows);
            }
            DataFileEntry::DeleteAll => break,
        }
    }

    partition_results.reverse();
    Ok(partition_results.into_iter().flatten().collect())
}

//! Table version resolution.
//!
//! `TableVersionRegistry` is the external collaborator that tracks which
//! `TableVersion` is current for a given userspace/table pair (the prod
//! publication log plus each userspace's own log). `resolve_table` is the
//! userspace-layering algorithm from the original reader's `read()`
//! function: a non-prod read stacks its own writes on top of prod's,
//! regardless of which was published first, and falls back to prod's
//! schema when the userspace hasn't defined one of its own.

use async_trait::async_trait;

use crate::datafile::{DataFileEntry, TableSchema, TableVersion};
use crate::error::{GridError, Result};

pub const PROD_USERSPACE: &str = "prod";

#[async_trait]
pub trait TableVersionRegistry: Send + Sync {
    /// The current `TableVersion` for `userspace/table_name`, capped at
    /// `max_version_number` if given. `None` means the table does not
    /// exist in that userspace.
    async fn get_current_table_version(
        &self,
        userspace: &str,
        table_name: &str,
        max_version_number: Option<i64>,
    ) -> Result<Option<TableVersion>>;

    /// Resolves a registry-relative filename (as stored in a
    /// `TableVersion`/`DataFileEntry`) to wherever the registry actually
    /// keeps its data. The in-memory registry is a no-op passthrough; a
    /// real one would join it against a data directory root.
    fn prepend_data_dir(&self, filename: &str) -> String {
        filename.to_string()
    }

    /// Loads the ordered `DataFileEntry` list a `data_list_filename`
    /// points at.
    async fn load_data_list(&self, data_list_filename: &str) -> Result<Vec<DataFileEntry>>;

    /// Loads a `TableSchema` a `table_schema_filename` points at.
    async fn load_table_schema(&self, table_schema_filename: &str) -> Result<TableSchema>;
}

/// Resolves the table the reader should operate on: which version number
/// applies, which schema, and the merged (and, for non-prod userspaces,
/// layered) ordered list of data files.
///
/// Mirrors `meadowdb.reader.read` exactly, including the read-committed
/// layering rule: prod's data files always precede the userspace's own,
/// regardless of original write order, and the resolved version number is
/// the larger of the two.
pub async fn resolve_table(
    registry: &dyn TableVersionRegistry,
    userspace: &str,
    table_name: &str,
    max_version_number: Option<i64>,
) -> Result<(i64, TableSchema, Vec<DataFileEntry>)> {
    if userspace == PROD_USERSPACE {
        let table_version = registry
            .get_current_table_version(userspace, table_name, max_version_number)
            .await?
            .ok_or_else(|| {
                GridError::not_found(format!("table {userspace}/{table_name} does not exist"))
            })?;

        let schema = load_schema(registry, table_version.table_schema_filename.as_deref()).await?;
        let data_files = load_layered_data_files(registry, &[table_version.data_list_filename]).await?;

        return Ok((table_version.version_number, schema, data_files));
    }

    let userspace_version = registry
        .get_current_table_version(userspace, table_name, max_version_number)
        .await?;
    let prod_version = registry
        .get_current_table_version(PROD_USERSPACE, table_name, max_version_number)
        .await?;

    if userspace_version.is_none() && prod_version.is_none() {
        return Err(GridError::not_found(format!(
            "table {userspace}/{table_name} does not exist and {PROD_USERSPACE}/{table_name} also does not exist"
        )));
    }

    let table_schema_filename = match (&userspace_version, &prod_version) {
        (Some(uv), _) if uv.table_schema_filename.is_some() => uv.table_schema_filename.clone(),
        (_, Some(pv)) => pv.table_schema_filename.clone(),
        _ => None,
    };
    let schema = load_schema(registry, table_schema_filename.as_deref()).await?;

    let mut data_list_filenames = Vec::new();
    let mut version_number = -1;
    if let Some(pv) = &prod_version {
        data_list_filenames.push(pv.data_list_filename.clone());
        version_number = pv.version_number;
    }
    if let Some(uv) = &userspace_version {
        data_list_filenames.push(uv.data_list_filename.clone());
        version_number = version_number.max(uv.version_number);
    }

    let data_files = load_layered_data_files(registry, &data_list_filenames).await?;

    Ok((version_number, schema, data_files))
}

async fn load_schema(
    registry: &dyn TableVersionRegistry,
    table_schema_filename: Option<&str>,
) -> Result<TableSchema> {
    match table_schema_filename {
        Some(filename) => registry.load_table_schema(filename).await,
        None => Ok(TableSchema::default()),
    }
}

async fn load_layered_data_files(
    registry: &dyn TableVersionRegistry,
    data_list_filenames: &[String],
) -> Result<Vec<DataFileEntry>> {
    let mut out = Vec::new();
    for filename in data_list_filenames {
        out.extend(registry.load_data_list(filename).await?);
    }
    Ok(out)
}

/// An in-memory registry good enough to drive `resolve_table` in tests —
/// keyed by (userspace, table_name) -> ordered published versions, newest
/// last.
#[derive(Default)]
pub struct InMemoryTableVersionRegistry {
    versions: std::sync::Mutex<
        std::collections::HashMap<(String, String), Vec<TableVersion>>,
    >,
    data_lists: std::sync::Mutex<std::collections::HashMap<String, Vec<DataFileEntry>>>,
    schemas: std::sync::Mutex<std::collections::HashMap<String, TableSchema>>,
}

impl InMemoryTableVersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, userspace: &str, table_name: &str, version: TableVersion) {
        self.versions
            .lock()
            .expect("registry mutex poisoned")
            .entry((userspace.to_string(), table_name.to_string()))
            .or_default()
            .push(version);
    }

    pub fn put_data_list(&self, filename: impl Into<String>, entries: Vec<DataFileEntry>) {
        self.data_lists
            .lock()
            .expect("registry mutex poisoned")
            .insert(filename.into(), entries);
    }

    pub fn put_schema(&self, filename: impl Into<String>, schema: TableSchema) {
        self.schemas
            .lock()
            .expect("registry mutex poisoned")
            .insert(filename.into(), schema);
    }
}

#[async_trait]
impl TableVersionRegistry for InMemoryTableVersionRegistry {
    async fn get_current_table_version(
        &self,
        userspace: &str,
        table_name: &str,
        max_version_number: Option<i64>,
    ) -> Result<Option<TableVersion>> {
        let versions = self.versions.lock().expect("registry mutex poisoned");
        let key = (userspace.to_string(), table_name.to_string());
        Ok(versions.get(&key).and_then(|vs| {
            vs.iter()
                .filter(|v| max_version_number.map(|max| v.version_number <= max).unwrap_or(true))
                .max_by_key(|v| v.version_number)
                .cloned()
        }))
    }

    async fn load_data_list(&self, data_list_filename: &str) -> Result<Vec<DataFileEntry>> {
        self.data_lists
            .lock()
            .expect("registry mutex poisoned")
            .get(data_list_filename)
            .cloned()
            .ok_or_else(|| GridError::not_found(format!("no such data list: {data_list_filename}")))
    }

    async fn load_table_schema(&self, table_schema_filename: &str) -> Result<TableSchema> {
        self.schemas
            .lock()
            .expect("registry mutex poisoned")
            .get(table_schema_filename)
            .cloned()
            .ok_or_else(|| GridError::not_found(format!("no such schema file: {table_schema_filename}")))
    }
}

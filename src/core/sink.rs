use crate::core::encode;
use crate::domain::model::{CellValue, PartitionKey, TabularBatch, TypedColumn};
use crate::domain::ports::{Catalog, Storage};
use crate::domain::table::{ColumnDef, PartitionEntry, StorageFormat, TableDefinition};
use crate::utils::error::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

const STAGING_DIR: &str = "_staging";
pub const DEFAULT_MAX_ROWS_PER_FILE: usize = 10_000;

/// 目標資料表不存在或欄位不一致時的處理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaPolicy {
    #[default]
    CreateIfAbsent,
    FailIfAbsent,
    EvolveAddColumns,
}

impl FromStr for SchemaPolicy {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create_if_absent" => Ok(SchemaPolicy::CreateIfAbsent),
            "fail_if_absent" => Ok(SchemaPolicy::FailIfAbsent),
            "evolve_add_columns" => Ok(SchemaPolicy::EvolveAddColumns),
            other => Err(EtlError::InvalidConfigValueError {
                field: "schema_policy".to_string(),
                value: other.to_string(),
                reason: "Valid policies: create_if_absent, fail_if_absent, evolve_add_columns"
                    .to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkTarget {
    pub database: String,
    pub table: String,
    /// Storage key prefix of the table's data.
    pub location: String,
}

impl SinkTarget {
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            location: location.into(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    fn key(&self, rest: &str) -> String {
        let base = self.location.trim_matches('/');
        if base.is_empty() {
            rest.to_string()
        } else {
            format!("{}/{}", base, rest)
        }
    }
}

#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub format: StorageFormat,
    /// Batch column that carries the partition value when no override is given.
    pub partition_column: Option<String>,
    pub partition_override: Option<PartitionKey>,
    pub max_rows_per_file: usize,
    /// Publish a fresh table definition instead of altering the existing one. Only the
    /// catalog entry is replaced; data files of other partitions are kept.
    pub recreate_table: bool,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            format: StorageFormat::Parquet,
            partition_column: None,
            partition_override: None,
            max_rows_per_file: DEFAULT_MAX_ROWS_PER_FILE,
            recreate_table: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkReport {
    pub partition: PartitionKey,
    pub files: Vec<String>,
    pub rows: usize,
    pub table_created: bool,
    pub added_columns: Vec<String>,
}

#[derive(Debug)]
enum SchemaPlan {
    Create,
    AddColumns(Vec<String>),
    Unchanged,
}

/// Picks the partition for a batch: the override wins, otherwise every row must carry the
/// same non-null value in `partition_column`.
pub fn resolve_partition(
    batch: &TabularBatch,
    partition_column: Option<&str>,
    partition_override: Option<&PartitionKey>,
) -> Result<PartitionKey> {
    if let Some(key) = partition_override {
        return Ok(key.clone());
    }

    let column = partition_column.ok_or_else(|| EtlError::PartitionResolutionError {
        message: "No partition override given and no partition column configured".to_string(),
    })?;
    let values = batch
        .column_values(column)
        .ok_or_else(|| EtlError::PartitionResolutionError {
            message: format!("Partition column '{}' is not in the batch", column),
        })?;

    let mut distinct = BTreeSet::new();
    for value in values {
        match value.render() {
            Some(text) => {
                distinct.insert(text);
            }
            None => {
                return Err(EtlError::PartitionResolutionError {
                    message: format!("Partition column '{}' contains null values", column),
                })
            }
        }
    }

    let mut values = distinct.into_iter();
    match (values.next(), values.next()) {
        (Some(value), None) => Ok(PartitionKey::new(column, value)),
        (None, _) => Err(EtlError::PartitionResolutionError {
            message: format!("Partition column '{}' has no values", column),
        }),
        (Some(_), Some(_)) => Err(EtlError::PartitionResolutionError {
            message: format!(
                "Partition column '{}' holds more than one value in a single batch",
                column
            ),
        }),
    }
}

/// Lays a batch out in table column order. Table columns the batch lacks are null.
fn project(data: &TabularBatch, columns: &[ColumnDef]) -> TabularBatch {
    let positions: Vec<Option<usize>> = columns
        .iter()
        .map(|c| data.columns.iter().position(|b| b.name == c.name))
        .collect();

    TabularBatch {
        columns: columns
            .iter()
            .enumerate()
            .map(|(index, c)| TypedColumn::new(c.name.clone(), c.data_type, index))
            .collect(),
        rows: data
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|position| {
                        position
                            .and_then(|i| row.get(i).cloned())
                            .unwrap_or(CellValue::Null)
                    })
                    .collect()
            })
            .collect(),
    }
}

/// Writes typed batches into a Hive style partitioned table.
///
/// Files are encoded into `{location}/_staging/{run}/` and moved to a directory of their own,
/// `{location}/{column}={value}/run={run}/`. Nothing is visible until the catalog publishes
/// the new table definition, which carries the schema change and the partition location in
/// one write. A failure before that removes the files of the run and leaves the catalog as
/// it was. Files of a replaced partition are removed after the switch.
pub struct TabularSink<S: Storage, C: Catalog> {
    storage: S,
    catalog: C,
    target: SinkTarget,
    settings: SinkSettings,
}

impl<S: Storage, C: Catalog> TabularSink<S, C> {
    pub fn new(storage: S, catalog: C, target: SinkTarget) -> Self {
        Self {
            storage,
            catalog,
            target,
            settings: SinkSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: SinkSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn target(&self) -> &SinkTarget {
        &self.target
    }

    pub fn settings(&self) -> &SinkSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn describe(&self) -> String {
        format!(
            "{} ({}, {})",
            self.target.qualified_name(),
            self.target.location,
            self.settings.format.extension()
        )
    }

    pub async fn write(&self, batch: &TabularBatch, policy: SchemaPolicy) -> Result<SinkReport> {
        let partition = resolve_partition(
            batch,
            self.settings.partition_column.as_deref(),
            self.settings.partition_override.as_ref(),
        )?;
        tracing::info!("Writing {} rows to partition {}", batch.len(), partition);

        let existing = self
            .catalog
            .get_table(&self.target.database, &self.target.table)
            .await?;
        let batch = batch.without_column(&partition.column);
        let (mut definition, plan) =
            self.plan_schema(existing.as_ref(), &batch, &partition, policy)?;
        let data = project(&batch, &definition.columns);

        let run_id = Uuid::new_v4().simple().to_string();
        let location = self
            .target
            .key(&format!("{}/run={}", partition.path_segment(), run_id));
        let replaced = existing
            .as_ref()
            .and_then(|t| t.partition(&partition.column, &partition.value))
            .cloned();
        definition.upsert_partition(PartitionEntry {
            column: partition.column.clone(),
            value: partition.value.clone(),
            location: location.clone(),
        });

        let mut written = Vec::new();
        if let Err(e) = self
            .publish(&data, &definition, &location, &run_id, &mut written)
            .await
        {
            tracing::error!("❌ Write to {} failed: {}", self.target.qualified_name(), e);
            self.discard(&written).await;
            return Err(e);
        }
        tracing::info!(
            "✅ Published {} file(s) to {} partition {}",
            written.len(),
            self.target.qualified_name(),
            partition
        );

        if let Some(previous) = replaced {
            self.remove_replaced(&previous, &location).await;
        }

        let (table_created, added_columns) = match plan {
            SchemaPlan::Create => (true, Vec::new()),
            SchemaPlan::AddColumns(columns) => (false, columns),
            SchemaPlan::Unchanged => (false, Vec::new()),
        };
        Ok(SinkReport {
            partition,
            files: written,
            rows: data.len(),
            table_created,
            added_columns,
        })
    }

    fn mismatch(&self, message: String) -> EtlError {
        EtlError::SchemaMismatchError {
            table: self.target.qualified_name(),
            message,
        }
    }

    /// Builds the definition the table will have once this batch is published, minus the
    /// entry for the batch's own partition.
    fn plan_schema(
        &self,
        existing: Option<&TableDefinition>,
        data: &TabularBatch,
        partition: &PartitionKey,
        policy: SchemaPolicy,
    ) -> Result<(TableDefinition, SchemaPlan)> {
        if existing.is_none() && policy == SchemaPolicy::FailIfAbsent {
            return Err(self.mismatch(
                "Table does not exist and the schema policy is fail_if_absent".to_string(),
            ));
        }

        let current = existing.filter(|_| !self.settings.recreate_table);
        let Some(table) = current else {
            if existing.is_some() {
                tracing::info!("Recreating table {}", self.target.qualified_name());
            }
            let definition = TableDefinition {
                database: self.target.database.clone(),
                name: self.target.table.clone(),
                columns: data
                    .columns
                    .iter()
                    .map(|c| ColumnDef::new(c.name.clone(), c.declared_type))
                    .collect(),
                partition_columns: vec![partition.column.clone()],
                location: self.target.location.clone(),
                format: self.settings.format,
                partitions: Vec::new(),
            };
            return Ok((definition, SchemaPlan::Create));
        };

        if table.partition_columns != [partition.column.clone()] {
            return Err(self.mismatch(format!(
                "Table is partitioned by [{}], not by {}",
                table.partition_columns.join(", "),
                partition.column
            )));
        }
        if table.format != self.settings.format {
            return Err(self.mismatch(format!(
                "Table stores {} files, not {}",
                table.format.extension(),
                self.settings.format.extension()
            )));
        }

        let mut missing = Vec::new();
        for column in &data.columns {
            match table.column(&column.name) {
                Some(existing) if existing.data_type != column.declared_type => {
                    return Err(self.mismatch(format!(
                        "Column {} is {} in the table but {} in the batch",
                        column.name, existing.data_type, column.declared_type
                    )));
                }
                Some(_) => {}
                None => missing.push(ColumnDef::new(column.name.clone(), column.declared_type)),
            }
        }

        let mut definition = table.clone();
        if missing.is_empty() {
            Ok((definition, SchemaPlan::Unchanged))
        } else if policy == SchemaPolicy::EvolveAddColumns {
            let names = missing.iter().map(|c| c.name.clone()).collect();
            definition.columns.extend(missing);
            Ok((definition, SchemaPlan::AddColumns(names)))
        } else {
            let names: Vec<&str> = missing.iter().map(|c| c.name.as_str()).collect();
            Err(self.mismatch(format!(
                "Columns not in table: {} (use evolve_add_columns to add them)",
                names.join(", ")
            )))
        }
    }

    /// Stages, moves and publishes. Keeps `written` pointing at the current key of every
    /// file this run created.
    async fn publish(
        &self,
        data: &TabularBatch,
        definition: &TableDefinition,
        location: &str,
        run_id: &str,
        written: &mut Vec<String>,
    ) -> Result<()> {
        let extension = self.settings.format.extension();
        let staging = self.target.key(&format!("{}/{}", STAGING_DIR, run_id));

        let chunk_size = self.settings.max_rows_per_file.max(1);
        let chunks: Vec<_> = if data.rows.is_empty() {
            vec![data.rows.as_slice()]
        } else {
            data.rows.chunks(chunk_size).collect()
        };

        for (index, rows) in chunks.into_iter().enumerate() {
            let chunk = TabularBatch {
                columns: data.columns.clone(),
                rows: rows.to_vec(),
            };
            let bytes = encode::encode(&chunk, self.settings.format)?;
            let key = format!("{}/part-{:05}.{}", staging, index, extension);
            written.push(key.clone());
            self.storage.write_file(&key, &bytes).await?;
            tracing::debug!("Staged {} ({} rows, {} bytes)", key, rows.len(), bytes.len());
        }

        for (index, key) in written.iter_mut().enumerate() {
            let destination = format!("{}/part-{:05}.{}", location, index, extension);
            self.storage.rename_file(key, &destination).await?;
            *key = destination;
        }

        self.catalog
            .publish_table(definition, self.settings.recreate_table)
            .await
    }

    /// Deletes the files of a partition location the catalog no longer points at.
    async fn remove_replaced(&self, previous: &PartitionEntry, location: &str) {
        let current = format!("{}/", location);
        let files = match self
            .storage
            .list_files(&format!("{}/", previous.location))
            .await
        {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Could not list replaced files in {}: {}", previous.location, e);
                return;
            }
        };

        for old in files.iter().filter(|f| !f.starts_with(&current)) {
            if let Err(e) = self.storage.delete_file(old).await {
                tracing::warn!("Could not remove replaced file {}: {}", old, e);
            }
        }
    }

    async fn discard(&self, written: &[String]) {
        for key in written {
            if let Err(e) = self.storage.delete_file(key).await {
                tracing::warn!("Could not remove {} after failed write: {}", key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::catalog::FileCatalog;
    use crate::adapters::local::LocalStorage;
    use crate::domain::model::ColumnType;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Local storage that starts failing writes and renames after a number of calls.
    struct FlakyStorage {
        inner: LocalStorage,
        allowed: usize,
        calls: Arc<AtomicUsize>,
    }

    impl FlakyStorage {
        fn new(inner: LocalStorage, allowed: usize) -> Self {
            Self {
                inner,
                allowed,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn check(&self) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.allowed {
                return Err(EtlError::StorageError {
                    message: "simulated outage".to_string(),
                });
            }
            Ok(())
        }
    }

    impl Storage for FlakyStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            self.inner.read_file(path).await
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            self.check()?;
            self.inner.write_file(path, data).await
        }

        async fn delete_file(&self, path: &str) -> Result<()> {
            self.inner.delete_file(path).await
        }

        async fn rename_file(&self, from: &str, to: &str) -> Result<()> {
            self.check()?;
            self.inner.rename_file(from, to).await
        }

        async fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.list_files(prefix).await
        }

        async fn exists(&self, path: &str) -> Result<bool> {
            self.inner.exists(path).await
        }
    }

    fn date(value: &str) -> CellValue {
        CellValue::Date(NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap())
    }

    fn batch(start_dates: &[&str]) -> TabularBatch {
        TabularBatch {
            columns: vec![
                TypedColumn::new("id", ColumnType::Int, 0),
                TypedColumn::new("name", ColumnType::String, 1),
                TypedColumn::new("start_date", ColumnType::Date, 2),
            ],
            rows: start_dates
                .iter()
                .enumerate()
                .map(|(i, d)| {
                    vec![
                        CellValue::Int(i as i64 + 1),
                        CellValue::String(format!("row{}", i + 1)),
                        date(d),
                    ]
                })
                .collect(),
        }
    }

    fn target() -> SinkTarget {
        SinkTarget::new("dev", "targets", "warehouse/targets")
    }

    fn local_sink(
        dir: &TempDir,
        settings: SinkSettings,
    ) -> TabularSink<LocalStorage, FileCatalog<LocalStorage>> {
        TabularSink::new(
            LocalStorage::new(dir.path()),
            FileCatalog::new(LocalStorage::new(dir.path())),
            target(),
        )
        .with_settings(settings)
    }

    fn partitioned_by(column: &str) -> SinkSettings {
        SinkSettings {
            partition_column: Some(column.to_string()),
            ..SinkSettings::default()
        }
    }

    #[test]
    fn test_resolve_partition_order() {
        let data = batch(&["2024-05-01", "2024-05-01"]);
        let manual = PartitionKey::new("start_date", "2023-01-01");

        assert_eq!(
            resolve_partition(&data, Some("start_date"), Some(&manual)).unwrap(),
            manual
        );
        assert_eq!(
            resolve_partition(&data, Some("start_date"), None).unwrap(),
            PartitionKey::new("start_date", "2024-05-01")
        );
        assert!(matches!(
            resolve_partition(&data, None, None),
            Err(EtlError::PartitionResolutionError { .. })
        ));
        assert!(matches!(
            resolve_partition(&data, Some("missing"), None),
            Err(EtlError::PartitionResolutionError { .. })
        ));
    }

    #[test]
    fn test_resolve_partition_rejects_mixed_or_null_values() {
        let mixed = batch(&["2024-05-01", "2024-06-01"]);
        assert!(matches!(
            resolve_partition(&mixed, Some("start_date"), None),
            Err(EtlError::PartitionResolutionError { .. })
        ));

        let mut with_null = batch(&["2024-05-01", "2024-05-01"]);
        with_null.rows[1][2] = CellValue::Null;
        assert!(matches!(
            resolve_partition(&with_null, Some("start_date"), None),
            Err(EtlError::PartitionResolutionError { .. })
        ));
    }

    #[tokio::test]
    async fn test_override_wins_over_batch_column() {
        let temp_dir = TempDir::new().unwrap();
        let sink = local_sink(
            &temp_dir,
            SinkSettings {
                partition_override: Some(PartitionKey::new("start_date", "2023-01-01")),
                ..partitioned_by("start_date")
            },
        );

        let report = sink
            .write(&batch(&["2024-05-01", "2024-06-01"]), SchemaPolicy::CreateIfAbsent)
            .await
            .unwrap();

        assert_eq!(report.partition, PartitionKey::new("start_date", "2023-01-01"));
        assert!(report.table_created);
        assert_eq!(report.rows, 2);
        assert_eq!(report.files.len(), 1);
        assert!(report.files[0].starts_with("warehouse/targets/start_date=2023-01-01/run="));

        let partitions = sink.catalog().list_partitions("dev", "targets").await.unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].value, "2023-01-01");
        assert!(report.files[0].starts_with(&format!("{}/part-", partitions[0].location)));

        let table = sink.catalog().get_table("dev", "targets").await.unwrap().unwrap();
        assert!(table.column("start_date").is_none());
        assert_eq!(table.partition_columns, vec!["start_date".to_string()]);
    }

    #[tokio::test]
    async fn test_rows_split_across_files_and_staging_cleared() {
        let temp_dir = TempDir::new().unwrap();
        let sink = local_sink(
            &temp_dir,
            SinkSettings {
                format: StorageFormat::Csv,
                max_rows_per_file: 2,
                ..partitioned_by("start_date")
            },
        );

        let report = sink
            .write(&batch(&["2024-05-01"; 5]), SchemaPolicy::CreateIfAbsent)
            .await
            .unwrap();
        assert_eq!(report.files.len(), 3);

        let storage = LocalStorage::new(temp_dir.path());
        let staged = storage.list_files("warehouse/targets/_staging").await.unwrap();
        assert!(staged.is_empty());

        let first = storage.read_file(&report.files[0]).await.unwrap();
        assert_eq!(String::from_utf8(first).unwrap(), "id,name\n1,row1\n2,row2\n");
    }

    #[tokio::test]
    async fn test_reload_replaces_partition_files() {
        let temp_dir = TempDir::new().unwrap();
        let sink = local_sink(&temp_dir, partitioned_by("start_date"));

        let first = sink
            .write(&batch(&["2024-05-01"]), SchemaPolicy::CreateIfAbsent)
            .await
            .unwrap();
        let second = sink
            .write(&batch(&["2024-05-01", "2024-05-01"]), SchemaPolicy::CreateIfAbsent)
            .await
            .unwrap();
        assert!(!second.table_created);

        let storage = LocalStorage::new(temp_dir.path());
        let files = storage
            .list_files("warehouse/targets/start_date=2024-05-01/")
            .await
            .unwrap();
        assert_eq!(files, second.files);
        assert!(!storage.exists(&first.files[0]).await.unwrap());

        let partitions = sink.catalog().list_partitions("dev", "targets").await.unwrap();
        assert_eq!(partitions.len(), 1);
        assert!(second.files[0].starts_with(&format!("{}/", partitions[0].location)));
    }

    fn flaky_sink(
        dir: &TempDir,
        allowed: usize,
        settings: SinkSettings,
    ) -> TabularSink<FlakyStorage, FileCatalog<LocalStorage>> {
        TabularSink::new(
            FlakyStorage::new(LocalStorage::new(dir.path()), allowed),
            FileCatalog::new(LocalStorage::new(dir.path())),
            target(),
        )
        .with_settings(settings)
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_partition_files() {
        let temp_dir = TempDir::new().unwrap();
        let first = local_sink(&temp_dir, partitioned_by("start_date"))
            .write(&batch(&["2024-05-01"]), SchemaPolicy::CreateIfAbsent)
            .await
            .unwrap();

        // the staged write succeeds, the move fails
        let sink = flaky_sink(&temp_dir, 1, partitioned_by("start_date"));
        let result = sink
            .write(&batch(&["2024-05-01", "2024-05-01"]), SchemaPolicy::CreateIfAbsent)
            .await;
        assert!(result.is_err());

        let storage = LocalStorage::new(temp_dir.path());
        let files = storage
            .list_files("warehouse/targets/start_date=2024-05-01/")
            .await
            .unwrap();
        assert_eq!(files, first.files);
        let partitions = sink.catalog().list_partitions("dev", "targets").await.unwrap();
        assert!(first.files[0].starts_with(&format!("{}/", partitions[0].location)));
    }

    #[tokio::test]
    async fn test_failed_recreate_keeps_table_and_partitions() {
        let temp_dir = TempDir::new().unwrap();
        let first = local_sink(&temp_dir, partitioned_by("start_date"))
            .write(&batch(&["2024-01-01"]), SchemaPolicy::CreateIfAbsent)
            .await
            .unwrap();
        let catalog = FileCatalog::new(LocalStorage::new(temp_dir.path()));
        let before = catalog.get_table("dev", "targets").await.unwrap().unwrap();

        let sink = flaky_sink(
            &temp_dir,
            1,
            SinkSettings {
                recreate_table: true,
                ..partitioned_by("start_date")
            },
        );
        let result = sink
            .write(&batch(&["2024-02-01"]), SchemaPolicy::CreateIfAbsent)
            .await;
        assert!(matches!(result, Err(EtlError::StorageError { .. })));

        let after = catalog.get_table("dev", "targets").await.unwrap().unwrap();
        assert_eq!(after, before);
        assert_eq!(after.partitions.len(), 1);
        let storage = LocalStorage::new(temp_dir.path());
        assert!(storage.exists(&first.files[0]).await.unwrap());
        assert!(storage
            .list_files("warehouse/targets/start_date=2024-02-01")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_recreate_table_replaces_definition() {
        let temp_dir = TempDir::new().unwrap();
        let first = local_sink(&temp_dir, partitioned_by("start_date"))
            .write(&batch(&["2024-01-01"]), SchemaPolicy::CreateIfAbsent)
            .await
            .unwrap();

        let mut retyped = batch(&["2024-02-01"]);
        retyped.columns[0].declared_type = ColumnType::String;
        retyped.rows[0][0] = CellValue::String("A1".to_string());

        let sink = local_sink(
            &temp_dir,
            SinkSettings {
                recreate_table: true,
                ..partitioned_by("start_date")
            },
        );
        let report = sink.write(&retyped, SchemaPolicy::FailIfAbsent).await.unwrap();
        assert!(report.table_created);

        let table = sink.catalog().get_table("dev", "targets").await.unwrap().unwrap();
        assert_eq!(table.column("id").unwrap().data_type, ColumnType::String);
        let values: Vec<&str> = table.partitions.iter().map(|p| p.value.as_str()).collect();
        assert_eq!(values, vec!["2024-02-01"]);

        // only the catalog entry is replaced
        let storage = LocalStorage::new(temp_dir.path());
        assert!(storage.exists(&first.files[0]).await.unwrap());
    }

    #[tokio::test]
    async fn test_recreate_with_fail_if_absent_needs_existing_table() {
        let temp_dir = TempDir::new().unwrap();
        let sink = local_sink(
            &temp_dir,
            SinkSettings {
                recreate_table: true,
                ..partitioned_by("start_date")
            },
        );
        let result = sink
            .write(&batch(&["2024-01-01"]), SchemaPolicy::FailIfAbsent)
            .await;
        assert!(matches!(result, Err(EtlError::SchemaMismatchError { .. })));
    }

    #[tokio::test]
    async fn test_failed_evolve_keeps_table_columns() {
        let temp_dir = TempDir::new().unwrap();
        local_sink(&temp_dir, partitioned_by("start_date"))
            .write(&batch(&["2024-05-01"]), SchemaPolicy::CreateIfAbsent)
            .await
            .unwrap();

        let mut wider = batch(&["2024-05-02"]);
        wider.columns.push(TypedColumn::new("score", ColumnType::Float, 3));
        wider.rows[0].push(CellValue::Float(0.5));

        let sink = flaky_sink(&temp_dir, 1, partitioned_by("start_date"));
        let result = sink.write(&wider, SchemaPolicy::EvolveAddColumns).await;
        assert!(result.is_err());

        let table = sink.catalog().get_table("dev", "targets").await.unwrap().unwrap();
        let columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(columns, vec!["id", "name"]);
        assert_eq!(table.partitions.len(), 1);
    }

    #[tokio::test]
    async fn test_csv_files_follow_table_column_order() {
        let temp_dir = TempDir::new().unwrap();
        let settings = SinkSettings {
            format: StorageFormat::Csv,
            ..partitioned_by("start_date")
        };
        let sink = local_sink(&temp_dir, settings);
        sink.write(&batch(&["2024-05-01"]), SchemaPolicy::CreateIfAbsent)
            .await
            .unwrap();

        // columns reordered, and `id` missing from the next one
        let reordered = TabularBatch {
            columns: vec![
                TypedColumn::new("name", ColumnType::String, 0),
                TypedColumn::new("id", ColumnType::Int, 1),
                TypedColumn::new("start_date", ColumnType::Date, 2),
            ],
            rows: vec![vec![
                CellValue::String("b".to_string()),
                CellValue::Int(2),
                date("2024-05-02"),
            ]],
        };
        let without_id = TabularBatch {
            columns: vec![
                TypedColumn::new("name", ColumnType::String, 0),
                TypedColumn::new("start_date", ColumnType::Date, 1),
            ],
            rows: vec![vec![CellValue::String("c".to_string()), date("2024-05-03")]],
        };

        let storage = LocalStorage::new(temp_dir.path());
        let report = sink
            .write(&reordered, SchemaPolicy::CreateIfAbsent)
            .await
            .unwrap();
        let data = storage.read_file(&report.files[0]).await.unwrap();
        assert_eq!(String::from_utf8(data).unwrap(), "id,name\n2,b\n");

        let report = sink
            .write(&without_id, SchemaPolicy::CreateIfAbsent)
            .await
            .unwrap();
        let data = storage.read_file(&report.files[0]).await.unwrap();
        assert_eq!(String::from_utf8(data).unwrap(), "id,name\n,c\n");
    }

    #[tokio::test]
    async fn test_partition_value_stays_inside_table_location() {
        let temp_dir = TempDir::new().unwrap();
        let sink = local_sink(&temp_dir, partitioned_by("region"));
        let data = TabularBatch {
            columns: vec![
                TypedColumn::new("id", ColumnType::Int, 0),
                TypedColumn::new("region", ColumnType::String, 1),
            ],
            rows: vec![vec![
                CellValue::Int(1),
                CellValue::String("../../../escaped".to_string()),
            ]],
        };

        let report = sink.write(&data, SchemaPolicy::CreateIfAbsent).await.unwrap();
        assert!(report.files[0].starts_with("warehouse/targets/region=..%2F..%2F..%2Fescaped/"));
        let storage = LocalStorage::new(temp_dir.path());
        let outside: Vec<String> = storage
            .list_files("")
            .await
            .unwrap()
            .into_iter()
            .filter(|f| !f.starts_with("warehouse/targets/") && !f.starts_with("_catalog/"))
            .collect();
        assert!(outside.is_empty());
    }

    #[tokio::test]
    async fn test_fail_if_absent() {
        let temp_dir = TempDir::new().unwrap();
        let sink = local_sink(&temp_dir, partitioned_by("start_date"));

        let result = sink
            .write(&batch(&["2024-05-01"]), SchemaPolicy::FailIfAbsent)
            .await;
        assert!(matches!(result, Err(EtlError::SchemaMismatchError { .. })));
        let storage = LocalStorage::new(temp_dir.path());
        assert!(storage.list_files("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_columns_need_evolve_policy() {
        let temp_dir = TempDir::new().unwrap();
        let sink = local_sink(&temp_dir, partitioned_by("start_date"));
        sink.write(&batch(&["2024-05-01"]), SchemaPolicy::CreateIfAbsent)
            .await
            .unwrap();

        let mut wider = batch(&["2024-05-02"]);
        wider.columns.push(TypedColumn::new("score", ColumnType::Float, 3));
        wider.rows[0].push(CellValue::Float(0.5));

        let rejected = sink.write(&wider, SchemaPolicy::CreateIfAbsent).await;
        assert!(matches!(rejected, Err(EtlError::SchemaMismatchError { .. })));

        let report = sink
            .write(&wider, SchemaPolicy::EvolveAddColumns)
            .await
            .unwrap();
        assert_eq!(report.added_columns, vec!["score".to_string()]);
        let table = sink.catalog().get_table("dev", "targets").await.unwrap().unwrap();
        assert!(table.column("score").is_some());
    }

    #[tokio::test]
    async fn test_type_change_is_a_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let sink = local_sink(&temp_dir, partitioned_by("start_date"));
        sink.write(&batch(&["2024-05-01"]), SchemaPolicy::CreateIfAbsent)
            .await
            .unwrap();

        let mut retyped = batch(&["2024-05-02"]);
        retyped.columns[0].declared_type = ColumnType::String;
        retyped.rows[0][0] = CellValue::String("A1".to_string());

        let result = sink.write(&retyped, SchemaPolicy::EvolveAddColumns).await;
        assert!(matches!(result, Err(EtlError::SchemaMismatchError { .. })));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_visible_partition() {
        let temp_dir = TempDir::new().unwrap();
        // two staged files succeed, the third write fails
        let sink = TabularSink::new(
            FlakyStorage::new(LocalStorage::new(temp_dir.path()), 2),
            FileCatalog::new(LocalStorage::new(temp_dir.path())),
            target(),
        )
        .with_settings(SinkSettings {
            max_rows_per_file: 1,
            ..partitioned_by("start_date")
        });

        let result = sink
            .write(&batch(&["2024-05-01"; 3]), SchemaPolicy::CreateIfAbsent)
            .await;
        assert!(matches!(result, Err(EtlError::StorageError { .. })));

        let partitions = sink.catalog().list_partitions("dev", "targets").await.unwrap();
        assert!(partitions.is_empty());
        let storage = LocalStorage::new(temp_dir.path());
        assert!(storage.list_files("warehouse").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_move_removes_published_files() {
        let temp_dir = TempDir::new().unwrap();
        // both staged writes and the first rename succeed, the second rename fails
        let sink = TabularSink::new(
            FlakyStorage::new(LocalStorage::new(temp_dir.path()), 3),
            FileCatalog::new(LocalStorage::new(temp_dir.path())),
            target(),
        )
        .with_settings(SinkSettings {
            max_rows_per_file: 1,
            ..partitioned_by("start_date")
        });

        let result = sink
            .write(&batch(&["2024-05-01"; 2]), SchemaPolicy::CreateIfAbsent)
            .await;
        assert!(result.is_err());

        let partitions = sink.catalog().list_partitions("dev", "targets").await.unwrap();
        assert!(partitions.is_empty());
        let storage = LocalStorage::new(temp_dir.path());
        assert!(storage.list_files("warehouse").await.unwrap().is_empty());
    }

    #[test]
    fn test_schema_policy_from_str() {
        assert_eq!(
            "evolve_add_columns".parse::<SchemaPolicy>().unwrap(),
            SchemaPolicy::EvolveAddColumns
        );
        assert!("replace".parse::<SchemaPolicy>().is_err());
    }
}

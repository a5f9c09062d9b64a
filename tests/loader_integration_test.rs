use sheet_etl::config::job_config::JobConfig;
use sheet_etl::core::typing::TypeCoercer;
use sheet_etl::domain::ports::{Catalog, Storage};
use sheet_etl::utils::error::{EtlError, Result};
use sheet_etl::{
    CsvGrid, FileCatalog, InMemoryGrid, Loader, LoaderState, LocalStorage, PartitionKey, RangeSpec,
    SchemaPolicy, SinkSettings, SinkTarget, TabularSink, TabularSource,
};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::{NamedTempFile, TempDir};

const TARGETS_CSV: &str = "\
Monthly targets,,
owner,finance,
,,
int,string,date
id,name,start_date
1,Alice,2024-05-01
x,Bob,2024-05-01
3,Carol,2024-05-01
";

fn targets_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(TARGETS_CSV.as_bytes()).unwrap();
    file
}

fn sink(
    dir: &TempDir,
    settings: SinkSettings,
) -> TabularSink<LocalStorage, FileCatalog<LocalStorage>> {
    let storage = LocalStorage::new(dir.path());
    TabularSink::new(
        storage.clone(),
        FileCatalog::new(storage),
        SinkTarget::new("dev", "targets", "warehouse/dev/targets"),
    )
    .with_settings(settings)
}

#[tokio::test]
async fn test_csv_to_partitioned_parquet() {
    let csv = targets_file();
    let warehouse = TempDir::new().unwrap();

    let mut loader = Loader::new(
        TabularSource::new(CsvGrid::new(csv.path())),
        RangeSpec::declared(5, 4, 6),
        sink(
            &warehouse,
            SinkSettings {
                partition_column: Some("start_date".to_string()),
                ..SinkSettings::default()
            },
        ),
    );

    let report = loader.run().await.unwrap();
    assert_eq!(loader.state(), LoaderState::Done);
    assert_eq!(report.rows, 3);
    assert_eq!(report.partition, PartitionKey::new("start_date", "2024-05-01"));
    assert_eq!(report.coerced_to_null, 1);

    let storage = LocalStorage::new(warehouse.path());
    let files = storage
        .list_files("warehouse/dev/targets/start_date=2024-05-01")
        .await
        .unwrap();
    assert_eq!(files, report.files);
    assert!(files[0].ends_with(".parquet"));

    let catalog = FileCatalog::new(storage);
    let table = catalog.get_table("dev", "targets").await.unwrap().unwrap();
    let columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, vec!["id", "name"]);
    assert_eq!(table.partitions.len(), 1);
}

#[tokio::test]
async fn test_override_partition_with_csv_output() {
    let warehouse = TempDir::new().unwrap();
    let grid = InMemoryGrid::from_rows(&[
        &["int", "string", "date"],
        &["id", "name", "start_date"],
        &["1", "Alice", "2024-05-01"],
        &["2", "Bob", "2024-06-01"],
    ]);

    let mut loader = Loader::new(
        TabularSource::new(grid),
        RangeSpec::declared(2, 1, 3),
        sink(
            &warehouse,
            SinkSettings {
                format: sheet_etl::domain::table::StorageFormat::Csv,
                partition_column: Some("start_date".to_string()),
                partition_override: Some(PartitionKey::new("start_date", "2023-01-01")),
                ..SinkSettings::default()
            },
        ),
    );

    let report = loader.run().await.unwrap();
    assert_eq!(report.partition.path_segment(), "start_date=2023-01-01");

    let storage = LocalStorage::new(warehouse.path());
    let data = storage.read_file(&report.files[0]).await.unwrap();
    assert_eq!(String::from_utf8(data).unwrap(), "id,name\n1,Alice\n2,Bob\n");
}

#[tokio::test]
async fn test_strict_coercion_fails_before_sinking() {
    let csv = targets_file();
    let warehouse = TempDir::new().unwrap();

    let mut loader = Loader::new(
        TabularSource::new(CsvGrid::new(csv.path()))
            .with_coercer(TypeCoercer::new(sheet_etl::core::typing::CoercionPolicy::Fail)),
        RangeSpec::declared(5, 4, 6),
        sink(
            &warehouse,
            SinkSettings {
                partition_column: Some("start_date".to_string()),
                ..SinkSettings::default()
            },
        ),
    )
    .with_schema_policy(SchemaPolicy::CreateIfAbsent);

    let result = loader.run().await;
    assert!(matches!(result, Err(EtlError::CoercionError { row: 7, .. })));
    assert_eq!(loader.state(), LoaderState::Failed);
    assert!(!loader.history().contains(&LoaderState::Sinking));
}

/// Storage whose renames fail once switched off, to break a load between staging and publish.
#[derive(Clone)]
struct BrokenRenameStorage {
    inner: LocalStorage,
    broken: std::sync::Arc<AtomicBool>,
}

impl Storage for BrokenRenameStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.read_file(path).await
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        self.inner.write_file(path, data).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.inner.delete_file(path).await
    }

    async fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(EtlError::StorageError {
                message: format!("rename {} → {} refused", from, to),
            });
        }
        self.inner.rename_file(from, to).await
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_files(prefix).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path).await
    }
}

#[tokio::test]
async fn test_failed_load_keeps_previous_partition_state() {
    let warehouse = TempDir::new().unwrap();
    let storage = BrokenRenameStorage {
        inner: LocalStorage::new(warehouse.path()),
        broken: std::sync::Arc::new(AtomicBool::new(false)),
    };
    let target = SinkTarget::new("dev", "targets", "warehouse/dev/targets");
    let settings = SinkSettings {
        partition_column: Some("start_date".to_string()),
        ..SinkSettings::default()
    };
    let grid = |date: &str| {
        InMemoryGrid::new(vec![
            vec!["int".to_string(), "date".to_string()],
            vec!["id".to_string(), "start_date".to_string()],
            vec!["1".to_string(), date.to_string()],
        ])
    };

    let mut first = Loader::new(
        TabularSource::new(grid("2024-05-01")),
        RangeSpec::declared(2, 1, 3),
        TabularSink::new(storage.clone(), FileCatalog::new(storage.clone()), target.clone())
            .with_settings(settings.clone()),
    );
    first.run().await.unwrap();

    storage.broken.store(true, Ordering::SeqCst);
    let mut second = Loader::new(
        TabularSource::new(grid("2024-06-01")),
        RangeSpec::declared(2, 1, 3),
        TabularSink::new(storage.clone(), FileCatalog::new(storage.clone()), target)
            .with_settings(settings),
    );
    let result = second.run().await;
    assert!(matches!(result, Err(EtlError::StorageError { .. })));
    assert_eq!(second.state(), LoaderState::Failed);

    let catalog = FileCatalog::new(storage.inner.clone());
    let partitions = catalog.list_partitions("dev", "targets").await.unwrap();
    let values: Vec<&str> = partitions.iter().map(|p| p.value.as_str()).collect();
    assert_eq!(values, vec!["2024-05-01"]);

    let leftovers = storage
        .inner
        .list_files("warehouse/dev/targets/_staging")
        .await
        .unwrap();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_job_file_drives_a_load() {
    let csv = targets_file();
    let warehouse = TempDir::new().unwrap();
    let job = format!(
        r#"
[job]
name = "targets"

[source]
type = "csv"
path = "{}"

[source.range]
field_names_row = 5
field_types_row = 4

[target]
database = "dev"
table = "targets"
root = "{}"
partition_column = "start_date"
"#,
        csv.path().display().to_string().replace('\\', "/"),
        warehouse.path().display().to_string().replace('\\', "/")
    );

    let config = JobConfig::from_toml_str(&job).unwrap();
    sheet_etl::utils::validation::Validate::validate(&config).unwrap();

    let storage = LocalStorage::new(config.local_root());
    let mut loader = Loader::new(
        TabularSource::new(CsvGrid::new(config.source.path.clone().unwrap()))
            .with_coercer(TypeCoercer::new(config.coercion_policy())),
        config.range_spec().unwrap(),
        TabularSink::new(storage.clone(), FileCatalog::new(storage), config.sink_target())
            .with_settings(config.sink_settings()),
    )
    .with_schema_policy(config.schema_policy());

    let report = loader.run().await.unwrap();
    assert_eq!(report.rows, 3);
    assert!(report.files[0].starts_with("dev/targets/start_date=2024-05-01/"));
}

use anyhow::Context;
use clap::Parser;
use sheet_etl::config::job_config::{JobConfig, SourceKind, StorageKind};
use sheet_etl::core::typing::TypeCoercer;
use sheet_etl::domain::ports::{Storage, TabularProvider};
use sheet_etl::utils::error::{EtlError, ErrorSeverity, Result};
use sheet_etl::utils::{logger, validation::Validate};
use sheet_etl::{
    CliArgs, ConnectionManager, CsvGrid, FileCatalog, GoogleSheetsConnector, LoadReport, Loader,
    LocalStorage, ManagedConnection, RangeSpec, SheetsWorksheet, TabularSink, TabularSource,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // 初始化日誌
    if args.json_logs {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("Starting sheet-etl");
    if args.verbose {
        tracing::debug!("CLI args: {:?}", args);
    }

    let config = match args
        .validate()
        .and_then(|_| JobConfig::from_file(&args.config))
        .and_then(|config| config.validate().map(|_| config))
    {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };
    tracing::info!("Job '{}' loaded from {}", config.job.name, args.config.display());

    match run(&config, args.dry_run).await {
        Ok(Some(report)) => {
            tracing::info!("✅ Load completed successfully!");
            tracing::info!("📁 Partition {} ({} files)", report.partition, report.files.len());
            let summary =
                serde_json::to_string_pretty(&report).context("Could not render load report")?;
            println!("{}", summary);
        }
        Ok(None) => {
            tracing::info!("Dry run finished, nothing was written");
        }
        Err(e) => {
            tracing::error!(
                "❌ Load failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            let exit_code = match e.severity() {
                ErrorSeverity::Low => 0,
                ErrorSeverity::Medium => 2,
                ErrorSeverity::High => 1,
                ErrorSeverity::Critical => 3,
            };
            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}

async fn run(config: &JobConfig, dry_run: bool) -> Result<Option<LoadReport>> {
    match config.source.kind {
        SourceKind::Csv => {
            let path = config.source.path.clone().unwrap_or_default();
            let mut grid = CsvGrid::new(path);
            if let Some(delimiter) = config.source.delimiter {
                let delimiter = u8::try_from(delimiter).map_err(|_| EtlError::InvalidConfigValueError {
                    field: "source.delimiter".to_string(),
                    value: delimiter.to_string(),
                    reason: "Delimiter must be a single-byte character".to_string(),
                })?;
                grid = grid.with_delimiter(delimiter);
            }
            run_with_provider(config, grid, dry_run).await
        }
        SourceKind::GoogleSheets => {
            let manager =
                ConnectionManager::new(config.source_connection()?, GoogleSheetsConnector)?;
            let client = manager.get_client().await?;
            let worksheet = SheetsWorksheet::new(
                client,
                config.source.workbook.clone().unwrap_or_default(),
                config.source.sheet.clone().unwrap_or_default(),
            );
            run_with_provider(config, worksheet, dry_run).await
        }
    }
}

async fn run_with_provider<P: TabularProvider>(
    config: &JobConfig,
    provider: P,
    dry_run: bool,
) -> Result<Option<LoadReport>> {
    let source = TabularSource::new(provider).with_coercer(TypeCoercer::new(config.coercion_policy()));
    let range = config.range_spec()?;

    if dry_run {
        let batch = source.read(&range).await?;
        for row in batch.to_json_rows()? {
            println!("{}", row);
        }
        tracing::info!("{} rows, {} null cells", batch.len(), batch.null_count());
        return Ok(None);
    }

    let report = match config.storage_kind() {
        StorageKind::Local => {
            let storage = LocalStorage::new(config.local_root());
            load(config, source, range, storage).await?
        }
        StorageKind::S3 => load_s3(config, source, range).await?,
    };
    Ok(Some(report))
}

async fn load<P: TabularProvider, S: Storage + Clone>(
    config: &JobConfig,
    source: TabularSource<P>,
    range: RangeSpec,
    storage: S,
) -> Result<LoadReport> {
    let catalog = FileCatalog::new(storage.clone());
    let sink = TabularSink::new(storage, catalog, config.sink_target())
        .with_settings(config.sink_settings());
    let mut loader = Loader::new(source, range, sink).with_schema_policy(config.schema_policy());
    loader.run().await
}

#[cfg(feature = "aws")]
async fn load_s3<P: TabularProvider>(
    config: &JobConfig,
    source: TabularSource<P>,
    range: RangeSpec,
) -> Result<LoadReport> {
    use sheet_etl::{AwsConnector, S3Storage};

    let manager = ConnectionManager::new(config.target_connection()?, AwsConnector)?;
    let client = manager.get_client().await?;
    let bucket = config.target.bucket.clone().unwrap_or_default();
    load(config, source, range, S3Storage::new(client, bucket, "")).await
}

#[cfg(not(feature = "aws"))]
async fn load_s3<P: TabularProvider>(
    _config: &JobConfig,
    _source: TabularSource<P>,
    _range: RangeSpec,
) -> Result<LoadReport> {
    Err(EtlError::ConfigError {
        message: "S3 targets need a build with the `aws` feature".to_string(),
    })
}

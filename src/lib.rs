pub mod adapters;
pub mod config;
pub mod connect;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::CliArgs;

#[cfg(feature = "aws")]
pub use crate::connect::aws::{AwsConnector, S3Storage};

pub use crate::adapters::{catalog::FileCatalog, grid::CsvGrid, grid::InMemoryGrid, local::LocalStorage};
pub use crate::config::connection::{AuthPath, ConnectionSettings};
pub use crate::config::job_config::JobConfig;
pub use crate::connect::secrets::SecretsResolver;
pub use crate::connect::sheets::{GoogleSheetsConnector, SheetsClient, SheetsWorksheet};
pub use crate::connect::{ConnectionManager, ManagedConnection};
pub use crate::core::loader::{LoadReport, Loader, LoaderState};
pub use crate::core::sink::{SchemaPolicy, SinkSettings, SinkTarget, TabularSink};
pub use crate::core::source::{RangeSpec, TabularSource};
pub use crate::domain::model::{CellValue, ColumnType, PartitionKey, TabularBatch, TypedColumn};
pub use crate::utils::error::{EtlError, Result};

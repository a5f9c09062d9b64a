use crate::domain::model::ColumnType;
use crate::utils::error::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    #[default]
    Parquet,
    Csv,
}

impl StorageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            StorageFormat::Parquet => "parquet",
            StorageFormat::Csv => "csv",
        }
    }
}

impl FromStr for StorageFormat {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parquet" => Ok(StorageFormat::Parquet),
            "csv" => Ok(StorageFormat::Csv),
            other => Err(EtlError::InvalidConfigValueError {
                field: "format".to_string(),
                value: other.to_string(),
                reason: "Valid formats: parquet, csv".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub column: String,
    pub value: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub database: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub partition_columns: Vec<String>,
    pub location: String,
    pub format: StorageFormat,
    #[serde(default)]
    pub partitions: Vec<PartitionEntry>,
}

impl TableDefinition {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn partition(&self, column: &str, value: &str) -> Option<&PartitionEntry> {
        self.partitions
            .iter()
            .find(|p| p.column == column && p.value == value)
    }

    /// Adds the partition, or points an already listed one at its new location.
    pub fn upsert_partition(&mut self, entry: PartitionEntry) {
        match self
            .partitions
            .iter_mut()
            .find(|p| p.column == entry.column && p.value == entry.value)
        {
            Some(existing) => existing.location = entry.location,
            None => self.partitions.push(entry),
        }
    }
}

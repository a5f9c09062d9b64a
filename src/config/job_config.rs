use crate::config::connection::ConnectionSettings;
use crate::connect::secrets::SecretsResolver;
use crate::core::sink::{SchemaPolicy, SinkSettings, SinkTarget, DEFAULT_MAX_ROWS_PER_FILE};
use crate::core::source::{parse_field_specs, ColumnSpec, RangeSpec, RowRange};
use crate::core::typing::CoercionPolicy;
use crate::domain::model::PartitionKey;
use crate::domain::table::StorageFormat;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// 一個載入工作的 TOML 設定檔
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub job: JobSection,
    pub source: SourceConfig,
    pub target: TargetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSection {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    GoogleSheets,
    Csv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Spreadsheet id or full workbook URL.
    pub workbook: Option<String>,
    pub sheet: Option<String>,
    pub path: Option<String>,
    pub delimiter: Option<char>,
    pub connection: Option<ConnectionConfig>,
    pub range: RangeConfig,
}

/// Connection section shared by the source and the target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub endpoints: Vec<String>,
    pub port: Option<u16>,
    pub region: Option<String>,
    pub profile: Option<String>,
    /// Read `{PREFIX}_ENDPOINTS`, `{PREFIX}_PORT` ... from the environment instead.
    pub env_prefix: Option<String>,
    /// 邏輯名稱 → 環境變數名稱
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    #[serde(default)]
    pub optional_secrets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RangeConfig {
    pub field_names_row: Option<usize>,
    pub field_types_row: Option<usize>,
    pub data_start_row: Option<usize>,
    pub row_range: Option<String>,
    pub max_rows: Option<usize>,
    pub column_count: Option<usize>,
    /// `name:type` declarations; replaces the names and types rows.
    pub fields: Option<Vec<String>>,
    pub infer_types: Option<bool>,
    pub coercion: Option<CoercionPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub database: String,
    pub table: String,
    pub storage: Option<StorageKind>,
    /// Local directory holding the warehouse (local storage only).
    pub root: Option<String>,
    pub bucket: Option<String>,
    /// Key prefix of the table data, defaults to `{database}/{table}`.
    pub location: Option<String>,
    pub format: Option<StorageFormat>,
    pub schema_policy: Option<SchemaPolicy>,
    pub partition_column: Option<String>,
    pub partition: Option<PartitionKey>,
    pub recreate_table: Option<bool>,
    pub max_rows_per_file: Option<usize>,
    pub connection: Option<ConnectionConfig>,
}

impl ConnectionConfig {
    /// `None` when no secrets are configured.
    pub fn secrets_resolver(&self) -> Option<SecretsResolver> {
        if self.secrets.is_empty() && self.optional_secrets.is_empty() {
            return None;
        }
        let mut resolver = SecretsResolver::new();
        for (name, variable) in &self.secrets {
            resolver = resolver.require(name.as_str(), variable.as_str());
        }
        for (name, variable) in &self.optional_secrets {
            resolver = resolver.optional(name.as_str(), variable.as_str());
        }
        Some(resolver)
    }

    pub fn to_settings(&self) -> Result<ConnectionSettings> {
        if let Some(prefix) = &self.env_prefix {
            return ConnectionSettings::from_env(prefix, self.secrets_resolver());
        }

        let mut builder = ConnectionSettings::builder().endpoints(self.endpoints.iter().cloned());
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(region) = &self.region {
            builder = builder.region(region.as_str());
        }
        if let Some(profile) = &self.profile {
            builder = builder.profile(profile.as_str());
        }
        if let Some(resolver) = self.secrets_resolver() {
            builder = builder.secrets(resolver);
        }
        builder.build()
    }

    fn validate_with_prefix(&self, prefix: &str) -> Result<()> {
        for endpoint in &self.endpoints {
            validation::validate_url(&format!("{}.endpoints", prefix), endpoint)?;
        }
        for variable in self.secrets.values().chain(self.optional_secrets.values()) {
            validation::validate_non_empty_string(&format!("{}.secrets", prefix), variable)?;
        }
        Ok(())
    }
}

impl JobConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${SHEET_ID})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| EtlError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("job.name", &self.job.name)?;

        match self.source.kind {
            SourceKind::GoogleSheets => {
                let workbook = validation::validate_required_field("source.workbook", &self.source.workbook)?;
                validation::validate_non_empty_string("source.workbook", workbook)?;
                let sheet = validation::validate_required_field("source.sheet", &self.source.sheet)?;
                validation::validate_non_empty_string("source.sheet", sheet)?;
            }
            SourceKind::Csv => {
                let path = validation::validate_required_field("source.path", &self.source.path)?;
                validation::validate_path("source.path", path)?;
            }
        }
        if let Some(connection) = &self.source.connection {
            connection.validate_with_prefix("source.connection")?;
        }

        self.validate_range()?;

        let target = &self.target;
        validation::validate_identifier("target.database", &target.database)?;
        validation::validate_identifier("target.table", &target.table)?;
        if let Some(column) = &target.partition_column {
            validation::validate_identifier("target.partition_column", column)?;
        }
        if let Some(partition) = &target.partition {
            validation::validate_identifier("target.partition.column", &partition.column)?;
            validation::validate_partition_value("target.partition.value", &partition.value)?;
        }
        if let Some(max) = target.max_rows_per_file {
            validation::validate_positive_number("target.max_rows_per_file", max, 1)?;
        }
        match self.storage_kind() {
            StorageKind::Local => {
                validation::validate_path("target.root", self.local_root())?;
            }
            StorageKind::S3 => {
                let bucket = validation::validate_required_field("target.bucket", &target.bucket)?;
                validation::validate_non_empty_string("target.bucket", bucket)?;
            }
        }
        if let Some(connection) = &target.connection {
            connection.validate_with_prefix("target.connection")?;
        }

        Ok(())
    }

    fn validate_range(&self) -> Result<()> {
        let range = &self.source.range;
        let rows = [
            ("source.range.field_names_row", range.field_names_row),
            ("source.range.field_types_row", range.field_types_row),
            ("source.range.data_start_row", range.data_start_row),
            ("source.range.max_rows", range.max_rows),
            ("source.range.column_count", range.column_count),
        ];
        for (field, value) in rows {
            if let Some(value) = value {
                validation::validate_positive_number(field, value, 1)?;
            }
        }

        if let Some(row_range) = &range.row_range {
            row_range
                .parse::<RowRange>()
                .map_err(|e| EtlError::InvalidConfigValueError {
                    field: "source.range.row_range".to_string(),
                    value: row_range.clone(),
                    reason: e.to_string(),
                })?;
        }

        match &range.fields {
            Some(fields) => {
                parse_field_specs(fields)?;
            }
            None => {
                validation::validate_required_field(
                    "source.range.field_names_row",
                    &range.field_names_row,
                )?;
                if !range.infer_types.unwrap_or(false) {
                    validation::validate_required_field(
                        "source.range.field_types_row",
                        &range.field_types_row,
                    )?;
                }
            }
        }
        Ok(())
    }

    pub fn coercion_policy(&self) -> CoercionPolicy {
        self.source.range.coercion.unwrap_or_default()
    }

    /// Column layout and data region of the source.
    pub fn range_spec(&self) -> Result<RangeSpec> {
        let range = &self.source.range;

        let (columns, first_free_row) = match (&range.fields, range.field_names_row) {
            (Some(fields), _) => (ColumnSpec::Explicit(parse_field_specs(fields)?), 1),
            (None, Some(names_row)) if range.infer_types.unwrap_or(false) => {
                (ColumnSpec::Inferred { names_row }, names_row + 1)
            }
            (None, Some(names_row)) => {
                let types_row = range.field_types_row.ok_or_else(|| EtlError::MissingConfigError {
                    field: "source.range.field_types_row".to_string(),
                })?;
                (
                    ColumnSpec::Declared {
                        names_row,
                        types_row,
                    },
                    names_row.max(types_row) + 1,
                )
            }
            (None, None) => {
                return Err(EtlError::MissingConfigError {
                    field: "source.range.field_names_row".to_string(),
                })
            }
        };

        let row_range = range
            .row_range
            .as_deref()
            .map(str::parse::<RowRange>)
            .transpose()?;

        Ok(RangeSpec {
            columns,
            data_start_row: range.data_start_row.unwrap_or(first_free_row),
            row_range,
            max_rows: range.max_rows,
            column_count: range.column_count,
        })
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.target.storage.unwrap_or_default()
    }

    pub fn local_root(&self) -> &str {
        self.target.root.as_deref().unwrap_or(".")
    }

    pub fn schema_policy(&self) -> SchemaPolicy {
        self.target.schema_policy.unwrap_or_default()
    }

    pub fn sink_target(&self) -> SinkTarget {
        let location = self
            .target
            .location
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.target.database, self.target.table));
        SinkTarget::new(self.target.database.as_str(), self.target.table.as_str(), location)
    }

    pub fn sink_settings(&self) -> SinkSettings {
        SinkSettings {
            format: self.target.format.unwrap_or_default(),
            partition_column: self.target.partition_column.clone(),
            partition_override: self.target.partition.clone(),
            max_rows_per_file: self
                .target
                .max_rows_per_file
                .unwrap_or(DEFAULT_MAX_ROWS_PER_FILE),
            recreate_table: self.target.recreate_table.unwrap_or(false),
        }
    }

    pub fn source_connection(&self) -> Result<ConnectionSettings> {
        self.source
            .connection
            .clone()
            .unwrap_or_default()
            .to_settings()
    }

    pub fn target_connection(&self) -> Result<ConnectionSettings> {
        self.target
            .connection
            .clone()
            .unwrap_or_default()
            .to_settings()
    }
}

impl Validate for JobConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

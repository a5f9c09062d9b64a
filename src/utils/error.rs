use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Authentication failed for {service}: {message}")]
    AuthenticationError { service: String, message: String },

    #[error("Required environment variable {variable} does not exist")]
    MissingSecretError { variable: String },

    #[error("Could not connect to {service}: {message}")]
    ConnectivityError { service: String, message: String },

    #[error("Requested range exceeds the source extent: {message}")]
    RangeError { message: String },

    #[error("Could not resolve a partition value: {message}")]
    PartitionResolutionError { message: String },

    #[error("Schema mismatch for table {table}: {message}")]
    SchemaMismatchError { table: String, message: String },

    #[error("Cannot coerce '{value}' in column {column} (row {row}) to {expected}")]
    CoercionError {
        column: String,
        row: usize,
        value: String,
        expected: String,
    },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow_schema::ArrowError),

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Credentials,
    Connectivity,
    Configuration,
    Source,
    Data,
    Sink,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::AuthenticationError { .. } | EtlError::MissingSecretError { .. } => {
                ErrorCategory::Credentials
            }
            EtlError::ConnectivityError { .. } | EtlError::HttpError(_) => {
                ErrorCategory::Connectivity
            }
            EtlError::ConfigError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            EtlError::RangeError { .. } | EtlError::CsvError(_) => ErrorCategory::Source,
            EtlError::CoercionError { .. }
            | EtlError::ValidationError { .. }
            | EtlError::ProcessingError { .. } => ErrorCategory::Data,
            EtlError::PartitionResolutionError { .. }
            | EtlError::SchemaMismatchError { .. }
            | EtlError::StorageError { .. }
            | EtlError::ParquetError(_)
            | EtlError::ArrowError(_) => ErrorCategory::Sink,
            EtlError::IoError(_) | EtlError::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Connectivity => ErrorSeverity::Medium,
            ErrorCategory::Credentials
            | ErrorCategory::Configuration
            | ErrorCategory::Source
            | ErrorCategory::Data
            | ErrorCategory::Sink => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            EtlError::MissingSecretError { variable } => {
                format!("Export {} before starting the job", variable)
            }
            EtlError::AuthenticationError { .. } => {
                "Check the configured profile or secret variables for this service".to_string()
            }
            EtlError::ConnectivityError { .. } | EtlError::HttpError(_) => {
                "Check the endpoint list and network access, then retry".to_string()
            }
            EtlError::RangeError { .. } => {
                "Check the header, type and data row numbers against the sheet".to_string()
            }
            EtlError::PartitionResolutionError { .. } => {
                "Set [target.partition] or make sure the partition column has one value"
                    .to_string()
            }
            EtlError::SchemaMismatchError { .. } => {
                "Use schema_policy = \"evolve_add_columns\" or recreate the table".to_string()
            }
            EtlError::CoercionError { .. } => {
                "Fix the cell in the source or use coercion = \"null\"".to_string()
            }
            EtlError::ConfigError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. } => {
                "Review the job configuration file".to_string()
            }
            _ => "Inspect the logs for details".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Credentials => format!("Credentials problem: {}", self),
            ErrorCategory::Connectivity => format!("Connection problem: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Source => format!("Source problem: {}", self),
            ErrorCategory::Data => format!("Data problem: {}", self),
            ErrorCategory::Sink => format!("Warehouse problem: {}", self),
            ErrorCategory::System => format!("System problem: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

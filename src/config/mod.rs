pub mod connection;
pub mod job_config;

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "sheet-etl")]
#[command(about = "Load a spreadsheet range into a partitioned warehouse table")]
pub struct CliArgs {
    #[arg(short, long, help = "Path to the job TOML file")]
    pub config: PathBuf,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, help = "Read and type the source, print the rows, write nothing")]
    pub dry_run: bool,
}

#[cfg(feature = "cli")]
impl crate::utils::validation::Validate for CliArgs {
    fn validate(&self) -> crate::utils::error::Result<()> {
        let path = self.config.to_string_lossy();
        crate::utils::validation::validate_path("config", &path)?;
        if !self.config.is_file() {
            return Err(crate::utils::error::EtlError::InvalidConfigValueError {
                field: "config".to_string(),
                value: path.into_owned(),
                reason: "File does not exist".to_string(),
            });
        }
        Ok(())
    }
}

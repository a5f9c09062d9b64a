use crate::domain::ports::TabularProvider;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// A sheet exported as a delimited text file. Every record is a sheet row; fully empty
/// lines are skipped by the reader, so empty sheet rows must be exported as `,,`.
#[derive(Debug, Clone)]
pub struct CsvGrid {
    path: PathBuf,
    delimiter: u8,
}

impl CsvGrid {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

#[async_trait]
impl TabularProvider for CsvGrid {
    fn describe(&self) -> String {
        format!("csv file {}", self.path.display())
    }

    async fn read_grid(&self) -> Result<Vec<Vec<String>>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_path(&self.path)?;

        let mut grid = Vec::new();
        for record in reader.records() {
            let record = record?;
            grid.push(record.iter().map(str::to_string).collect());
        }
        tracing::debug!("Read {} rows from {}", grid.len(), self.path.display());
        Ok(grid)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryGrid {
    rows: Vec<Vec<String>>,
}

impl InMemoryGrid {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn from_rows(rows: &[&[&str]]) -> Self {
        Self {
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }
}

#[async_trait]
impl TabularProvider for InMemoryGrid {
    fn describe(&self) -> String {
        format!("in-memory grid ({} rows)", self.rows.len())
    }

    async fn read_grid(&self) -> Result<Vec<Vec<String>>> {
        Ok(self.rows.clone())
    }
}

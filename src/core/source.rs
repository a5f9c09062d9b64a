use crate::core::typing::{infer_column_type, TypeCoercer};
use crate::domain::model::{ColumnType, RawRow, RawTable, TabularBatch, TypedColumn};
use crate::domain::ports::TabularProvider;
use crate::utils::error::{EtlError, Result};
use std::collections::HashSet;
use std::str::FromStr;

/// Inclusive 1-based row range, written `first:last` (e.g. `12:20`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub first: usize,
    pub last: usize,
}

impl FromStr for RowRange {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| EtlError::RangeError {
            message: format!("Invalid row range '{}': {}", s, reason),
        };

        let (first, last) = s
            .split_once(':')
            .ok_or_else(|| invalid("expected first:last"))?;
        let first: usize = first
            .trim()
            .parse()
            .map_err(|_| invalid("first row is not a number"))?;
        let last: usize = last
            .trim()
            .parse()
            .map_err(|_| invalid("last row is not a number"))?;

        if first == 0 {
            return Err(invalid("rows are numbered from 1"));
        }
        if last < first {
            return Err(invalid("last row is before first row"));
        }
        Ok(RowRange { first, last })
    }
}

/// Where column names and types come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSpec {
    /// 名稱列與型別列各自指定，不假設相鄰
    Declared { names_row: usize, types_row: usize },
    Explicit(Vec<TypedColumn>),
    /// Names from a row, types inferred from the data body.
    Inferred { names_row: usize },
}

/// Parses `name:type` field declarations; position in the list is the source column.
pub fn parse_field_specs<S: AsRef<str>>(fields: &[S]) -> Result<Vec<TypedColumn>> {
    fields
        .iter()
        .enumerate()
        .map(|(index, field)| {
            let field = field.as_ref();
            let (name, type_name) =
                field
                    .split_once(':')
                    .ok_or_else(|| EtlError::InvalidConfigValueError {
                        field: "fields".to_string(),
                        value: field.to_string(),
                        reason: "Expected name:type".to_string(),
                    })?;
            Ok(TypedColumn::new(
                name.trim(),
                ColumnType::from_str(type_name)?,
                index,
            ))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeSpec {
    pub columns: ColumnSpec,
    pub data_start_row: usize,
    pub row_range: Option<RowRange>,
    pub max_rows: Option<usize>,
    pub column_count: Option<usize>,
}

impl RangeSpec {
    pub fn declared(names_row: usize, types_row: usize, data_start_row: usize) -> Self {
        Self {
            columns: ColumnSpec::Declared {
                names_row,
                types_row,
            },
            data_start_row,
            row_range: None,
            max_rows: None,
            column_count: None,
        }
    }

    pub fn with_columns(mut self, columns: ColumnSpec) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_row_range(mut self, range: &str) -> Result<Self> {
        self.row_range = Some(range.parse()?);
        Ok(self)
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn with_column_count(mut self, column_count: usize) -> Self {
        self.column_count = Some(column_count);
        self
    }
}

struct Grid {
    rows: Vec<Vec<String>>,
    width: usize,
}

impl Grid {
    fn new(rows: Vec<Vec<String>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        Self { rows, width }
    }

    fn height(&self) -> usize {
        self.rows.len()
    }

    fn row(&self, number: usize, purpose: &str) -> Result<&[String]> {
        if number == 0 || number > self.height() {
            return Err(EtlError::RangeError {
                message: format!(
                    "{} row {} is outside the source's {} rows",
                    purpose,
                    number,
                    self.height()
                ),
            });
        }
        Ok(&self.rows[number - 1])
    }
}

fn header_names(row: &[String], column_count: Option<usize>) -> Vec<String> {
    let mut names: Vec<String> = row.iter().map(|c| c.trim().to_string()).collect();
    match column_count {
        Some(count) => names.resize(count, String::new()),
        None => {
            while names.last().is_some_and(|n| n.is_empty()) {
                names.pop();
            }
        }
    }
    names
}

fn check_names(names: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for (index, name) in names.iter().enumerate() {
        if name.is_empty() {
            return Err(EtlError::ValidationError {
                message: format!("Column {} has an empty name", index + 1),
            });
        }
        if !seen.insert(name.as_str()) {
            return Err(EtlError::ValidationError {
                message: format!("Column name '{}' appears more than once", name),
            });
        }
    }
    Ok(())
}

/// Reads a rectangular region of a sheet-like provider.
pub struct TabularSource<P: TabularProvider> {
    provider: P,
    coercer: TypeCoercer,
}

impl<P: TabularProvider> TabularSource<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            coercer: TypeCoercer::default(),
        }
    }

    pub fn with_coercer(mut self, coercer: TypeCoercer) -> Self {
        self.coercer = coercer;
        self
    }

    pub fn coercer(&self) -> &TypeCoercer {
        &self.coercer
    }

    pub fn describe(&self) -> String {
        self.provider.describe()
    }

    /// 讀取並轉型
    pub async fn read(&self, spec: &RangeSpec) -> Result<TabularBatch> {
        let raw = self.read_raw(spec).await?;
        let (batch, _) = self.coercer.apply(&raw)?;
        Ok(batch)
    }

    /// Reads names, declared types and the untyped data body.
    pub async fn read_raw(&self, spec: &RangeSpec) -> Result<RawTable> {
        let grid = Grid::new(self.provider.read_grid().await?);
        tracing::debug!(
            "{} has {} rows and {} columns",
            self.provider.describe(),
            grid.height(),
            grid.width
        );

        if let Some(count) = spec.column_count {
            if count > grid.width {
                return Err(EtlError::RangeError {
                    message: format!(
                        "{} columns requested but the source has {}",
                        count, grid.width
                    ),
                });
            }
        }

        let mut columns = match &spec.columns {
            ColumnSpec::Declared {
                names_row,
                types_row,
            } => {
                let names = header_names(grid.row(*names_row, "Field names")?, spec.column_count);
                check_names(&names)?;
                let types = grid.row(*types_row, "Field types")?;

                names
                    .into_iter()
                    .enumerate()
                    .map(|(index, name)| {
                        let type_name = types.get(index).map(|t| t.trim()).unwrap_or("");
                        if type_name.is_empty() {
                            return Err(EtlError::ValidationError {
                                message: format!("Column '{}' has no declared type", name),
                            });
                        }
                        let declared_type =
                            ColumnType::from_str(type_name).map_err(|_| EtlError::ValidationError {
                                message: format!(
                                    "Column '{}' declares unknown type '{}'",
                                    name, type_name
                                ),
                            })?;
                        Ok(TypedColumn::new(name, declared_type, index))
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            ColumnSpec::Explicit(columns) => {
                let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
                check_names(&names)?;
                columns.clone()
            }
            ColumnSpec::Inferred { names_row } => {
                let names = header_names(grid.row(*names_row, "Field names")?, spec.column_count);
                check_names(&names)?;
                names
                    .into_iter()
                    .enumerate()
                    .map(|(index, name)| TypedColumn::new(name, ColumnType::String, index))
                    .collect()
            }
        };

        let body: Vec<usize> = match spec.row_range {
            Some(range) => {
                if range.last > grid.height() {
                    return Err(EtlError::RangeError {
                        message: format!(
                            "Row range {}:{} ends after the source's {} rows",
                            range.first,
                            range.last,
                            grid.height()
                        ),
                    });
                }
                (range.first..=range.last).collect()
            }
            None => {
                if spec.data_start_row == 0 || spec.data_start_row > grid.height() + 1 {
                    return Err(EtlError::RangeError {
                        message: format!(
                            "Data start row {} is outside the source's {} rows",
                            spec.data_start_row,
                            grid.height()
                        ),
                    });
                }
                (spec.data_start_row..=grid.height()).collect()
            }
        };

        let mut rows = Vec::new();
        for number in body {
            if spec.max_rows.is_some_and(|max| rows.len() >= max) {
                break;
            }
            let source_row = &grid.rows[number - 1];
            let cells: Vec<String> = columns
                .iter()
                .map(|c| source_row.get(c.source_index).cloned().unwrap_or_default())
                .collect();

            if cells.iter().all(|c| c.trim().is_empty()) {
                tracing::debug!("Skipping blank row {}", number);
                continue;
            }
            rows.push(RawRow {
                row_number: number,
                cells,
            });
        }

        if matches!(spec.columns, ColumnSpec::Inferred { .. }) {
            for (index, column) in columns.iter_mut().enumerate() {
                column.declared_type =
                    infer_column_type(rows.iter().map(|r| r.cells[index].as_str()));
                tracing::debug!("Inferred {} for column {}", column.declared_type, column.name);
            }
        }

        tracing::info!(
            "Read {} rows x {} columns from {}",
            rows.len(),
            columns.len(),
            self.provider.describe()
        );
        Ok(RawTable { columns, rows })
    }
}

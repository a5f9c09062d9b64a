use crate::domain::model::{CellValue, ColumnType, RawTable, TabularBatch};
use crate::utils::error::{EtlError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];

/// What to do with a cell that does not fit its column's declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoercionPolicy {
    /// 轉型失敗的儲存格變成 null，該列仍會輸出
    #[default]
    Null,
    Fail,
}

/// Strips thousands separators. Commas are only accepted between groups of three digits
/// in the integer part, so `"1,5"` is not a number.
fn parse_number_text(text: &str) -> Option<String> {
    let text = text.trim();
    if !text.contains(',') {
        return Some(text.to_string());
    }

    let (sign, unsigned) = match text.strip_prefix(['-', '+']) {
        Some(rest) => (&text[..1], rest),
        None => ("", text),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (unsigned, None),
    };
    if fraction.is_some_and(|f| f.contains(',')) {
        return None;
    }

    let digits = |group: &str| group.chars().all(|c| c.is_ascii_digit());
    let mut groups = integer.split(',');
    let lead = groups.next().unwrap_or_default();
    if lead.is_empty() || lead.len() > 3 || !digits(lead) {
        return None;
    }
    let mut number = format!("{}{}", sign, lead);
    for group in groups {
        if group.len() != 3 || !digits(group) {
            return None;
        }
        number.push_str(group);
    }
    if let Some(fraction) = fraction {
        number.push('.');
        number.push_str(fraction);
    }
    Some(number)
}

fn parse_int(text: &str) -> Option<i64> {
    parse_number_text(text)?.parse::<i64>().ok()
}

fn parse_float(text: &str) -> Option<f64> {
    parse_number_text(text)?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

/// `None` when the text cannot be coerced. Empty non-string cells are `Null`.
pub fn coerce_cell(text: &str, column_type: ColumnType) -> Option<CellValue> {
    if column_type != ColumnType::String && text.trim().is_empty() {
        return Some(CellValue::Null);
    }

    match column_type {
        ColumnType::Int => parse_int(text).map(CellValue::Int),
        ColumnType::Float => parse_float(text).map(CellValue::Float),
        ColumnType::String => Some(CellValue::String(text.to_string())),
        ColumnType::Date => parse_date(text).map(CellValue::Date),
        ColumnType::Bool => parse_bool(text).map(CellValue::Bool),
    }
}

/// 從資料推論欄位型別：int → float → bool → date → string
pub fn infer_column_type<'a, I>(values: I) -> ColumnType
where
    I: IntoIterator<Item = &'a str>,
{
    let values: Vec<&str> = values
        .into_iter()
        .filter(|v| !v.trim().is_empty())
        .collect();
    if values.is_empty() {
        return ColumnType::String;
    }

    let candidates = [
        ColumnType::Int,
        ColumnType::Float,
        ColumnType::Bool,
        ColumnType::Date,
    ];
    candidates
        .into_iter()
        .find(|candidate| {
            values
                .iter()
                .all(|v| !matches!(coerce_cell(v, *candidate), None | Some(CellValue::Null)))
        })
        .unwrap_or(ColumnType::String)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoercionStats {
    pub cells: usize,
    /// Cells that could not be coerced and were nulled.
    pub failed_cells: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TypeCoercer {
    policy: CoercionPolicy,
}

impl TypeCoercer {
    pub fn new(policy: CoercionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CoercionPolicy {
        self.policy
    }

    pub fn apply(&self, raw: &RawTable) -> Result<(TabularBatch, CoercionStats)> {
        let mut batch = TabularBatch::new(raw.columns.clone());
        let mut stats = CoercionStats::default();

        for row in &raw.rows {
            let mut values = Vec::with_capacity(raw.columns.len());
            for (index, column) in raw.columns.iter().enumerate() {
                let text = row.cells.get(index).map(String::as_str).unwrap_or("");
                stats.cells += 1;

                match coerce_cell(text, column.declared_type) {
                    Some(value) => values.push(value),
                    None => match self.policy {
                        CoercionPolicy::Null => {
                            tracing::debug!(
                                "Row {}: '{}' is not a valid {} for column {}, using null",
                                row.row_number,
                                text,
                                column.declared_type,
                                column.name
                            );
                            stats.failed_cells += 1;
                            values.push(CellValue::Null);
                        }
                        CoercionPolicy::Fail => {
                            return Err(EtlError::CoercionError {
                                column: column.name.clone(),
                                row: row.row_number,
                                value: text.to_string(),
                                expected: column.declared_type.to_string(),
                            })
                        }
                    },
                }
            }
            batch.rows.push(values);
        }

        if stats.failed_cells > 0 {
            tracing::warn!(
                "{} of {} cells could not be coerced and were set to null",
                stats.failed_cells,
                stats.cells
            );
        }

        Ok((batch, stats))
    }
}

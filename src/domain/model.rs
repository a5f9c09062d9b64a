use crate::utils::error::{EtlError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 欄位宣告型別 (由來源的型別列取得，而非從資料推論)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    String,
    Date,
    Bool,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Date => "date",
            ColumnType::Bool => "bool",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" | "bigint" | "long" => Ok(ColumnType::Int),
            "float" | "double" | "number" | "decimal" => Ok(ColumnType::Float),
            "string" | "str" | "text" | "varchar" => Ok(ColumnType::String),
            "date" => Ok(ColumnType::Date),
            "bool" | "boolean" => Ok(ColumnType::Bool),
            other => Err(EtlError::ValidationError {
                message: format!("Unknown column type '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedColumn {
    pub name: String,
    pub declared_type: ColumnType,
    /// 來源中的欄位位置 (0-based)
    pub source_index: usize,
}

impl TypedColumn {
    pub fn new(name: impl Into<String>, declared_type: ColumnType, source_index: usize) -> Self {
        Self {
            name: name.into(),
            declared_type,
            source_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    Bool(bool),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Text form used for partition values and CSV output. `None` for nulls.
    pub fn render(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Int(v) => Some(v.to_string()),
            CellValue::Float(v) => Some(v.to_string()),
            CellValue::String(v) => Some(v.clone()),
            CellValue::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            CellValue::Bool(v) => Some(v.to_string()),
        }
    }
}

/// 未轉型的資料列，保留來源列號以便錯誤訊息定位
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub row_number: usize,
    pub cells: Vec<String>,
}

/// SOURCING 階段的輸出：欄位定義加上原始字串
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub columns: Vec<TypedColumn>,
    pub rows: Vec<RawRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TabularBatch {
    pub columns: Vec<TypedColumn>,
    pub rows: Vec<Vec<CellValue>>,
}

impl TabularBatch {
    pub fn new(columns: Vec<TypedColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    pub fn column_values<'a>(&'a self, column: &str) -> Option<impl Iterator<Item = &'a CellValue>> {
        let index = self.column_index(column)?;
        Some(self.rows.iter().map(move |r| &r[index]))
    }

    pub fn null_count(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|r| r.iter())
            .filter(|v| v.is_null())
            .count()
    }

    /// Copy of the batch without `column`; unchanged when the column is absent.
    pub fn without_column(&self, column: &str) -> TabularBatch {
        match self.column_index(column) {
            None => self.clone(),
            Some(index) => TabularBatch {
                columns: self
                    .columns
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != index)
                    .map(|(_, c)| c.clone())
                    .collect(),
                rows: self
                    .rows
                    .iter()
                    .map(|r| {
                        r.iter()
                            .enumerate()
                            .filter(|(i, _)| *i != index)
                            .map(|(_, v)| v.clone())
                            .collect()
                    })
                    .collect(),
            },
        }
    }

    /// 以 `欄位名稱 -> 值` 的 JSON 物件輸出每一列
    pub fn to_json_rows(&self) -> Result<Vec<serde_json::Value>> {
        let mut out = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut object = serde_json::Map::new();
            for (column, value) in self.columns.iter().zip(row) {
                object.insert(column.name.clone(), serde_json::to_value(value)?);
            }
            out.push(serde_json::Value::Object(object));
        }
        Ok(out)
    }
}

/// Percent-encodes the characters Hive escapes in partition directory names.
pub fn escape_path_name(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        let needs_escape = c.is_control()
            || matches!(
                c,
                '"' | '#' | '%' | '\'' | '*' | '/' | ':' | '=' | '?' | '\\' | '{' | '[' | ']' | '^'
            );
        if needs_escape {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                escaped.push_str(&format!("%{:02X}", byte));
            }
        } else {
            escaped.push(c);
        }
    }
    // "." and ".." are path components on their own
    if escaped == "." || escaped == ".." {
        return escaped.replace('.', "%2E");
    }
    escaped
}

/// 手動指定的分區，優先於批次資料中的欄位值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionKey {
    pub column: String,
    pub value: String,
}

impl PartitionKey {
    pub fn new(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    /// Hive style path segment, e.g. `start_date=2023-01-01`. Both sides are escaped the
    /// way Hive escapes partition paths, so a value can never add a path level.
    pub fn path_segment(&self) -> String {
        format!("{}={}", escape_path_name(&self.column), escape_path_name(&self.value))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.column, self.value)
    }
}

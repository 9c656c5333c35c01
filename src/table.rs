//! Whitespace-delimited shot tables and CSVT-style column type declarations.

use std::fs;
use std::io::BufRead;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Real,
    Integer,
    String,
}

impl ColumnType {
    /// Parse one CSVT entry such as `Real`, `"Integer"` or `Real(12.3)`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().trim_matches('"');
        let base = s.split('(').next().unwrap_or(s).trim().to_ascii_lowercase();

        match base.as_str() {
            "real" => Some(ColumnType::Real),
            "integer" | "integer64" => Some(ColumnType::Integer),
            "string" => Some(ColumnType::String),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FieldValue {
    Real(f64),
    Integer(i64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Real(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn is_numeric(&self) -> bool {
        match self.ty {
            ColumnType::Real | ColumnType::Integer => true,
            ColumnType::String => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShotTable {
    pub columns: Vec<Column>,
    pub records: Vec<Vec<FieldValue>>,
}

impl ShotTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        find_column(&self.columns, name)
    }
}

pub fn find_column(columns: &[Column], name: &str) -> Option<usize> {
    columns.iter().position(|c| c.name == name)
}

/// Indices of the requested columns, failing on missing or non-numeric ones.
pub fn numeric_columns(columns: &[Column], requested: &[String]) -> Result<Vec<usize>> {
    requested
        .iter()
        .map(|name| {
            let i = find_column(columns, name).ok_or_else(|| {
                Error::Column(format!("Column '{name}' does not exist in the shot table"))
            })?;
            if !columns[i].is_numeric() {
                return Err(Error::Column(format!(
                    "Column '{name}' is declared as {:?} and cannot be aggregated",
                    columns[i].ty
                )));
            }
            Ok(i)
        })
        .collect()
}

/// Read a single-line, comma separated column type declaration.
pub fn read_column_types(path: &Path) -> Result<Vec<ColumnType>> {
    let text = fs::read_to_string(path)?;
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");

    line.split(',')
        .enumerate()
        .map(|(i, entry)| {
            ColumnType::parse(entry).ok_or_else(|| Error::InputFormat {
                line: 1,
                message: format!("Unknown type '{}' for column {}", entry.trim(), i + 1),
            })
        })
        .collect()
}

/// Parse a shot table.
///
/// Lines starting with `#` are comments. Column names are taken from the last comment before the
/// first data line whose token count matches the data width, falling back to `field_N`.
/// Columns without a declared type are Real.
pub fn read_shot_table<R: BufRead>(reader: R, types: Option<&[ColumnType]>) -> Result<ShotTable> {
    let mut comments: Vec<Vec<String>> = Vec::new();
    let mut columns: Option<Vec<Column>> = None;
    let mut records = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = i + 1;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }
        if let Some(comment) = trimmed.strip_prefix('#') {
            if columns.is_none() {
                comments.push(comment.split_whitespace().map(str::to_string).collect());
            }
            continue;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let columns = columns.get_or_insert_with(|| build_columns(&comments, tokens.len(), types));

        if tokens.len() != columns.len() {
            return Err(Error::InputFormat {
                line: line_no,
                message: format!("Expected {} fields, found {}", columns.len(), tokens.len()),
            });
        }

        let record = tokens
            .iter()
            .zip(columns.iter())
            .map(|(token, column)| parse_value(token, column, line_no))
            .collect::<Result<Vec<_>>>()?;
        records.push(record);
    }

    Ok(ShotTable {
        columns: columns.unwrap_or_default(),
        records,
    })
}

fn build_columns(comments: &[Vec<String>], width: usize, types: Option<&[ColumnType]>) -> Vec<Column> {
    let names: Vec<String> = comments
        .iter()
        .rev()
        .find(|tokens| tokens.len() == width)
        .cloned()
        .unwrap_or_else(|| (1..=width).map(|i| format!("field_{i}")).collect());

    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let ty = types
                .and_then(|t| t.get(i))
                .copied()
                .unwrap_or(ColumnType::Real);
            Column::new(name, ty)
        })
        .collect()
}

fn parse_value(token: &str, column: &Column, line: usize) -> Result<FieldValue> {
    let bad = |what: &str| Error::InputFormat {
        line,
        message: format!("'{token}' is not a valid {what} for column '{}'", column.name),
    };

    match column.ty {
        ColumnType::Real => token.parse().map(FieldValue::Real).map_err(|_| bad("real")),
        ColumnType::Integer => token
            .parse()
            .map(FieldValue::Integer)
            .map_err(|_| bad("integer")),
        ColumnType::String => Ok(FieldValue::Text(token.to_string())),
    }
}

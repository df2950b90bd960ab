//! Row-oriented string tables produced by source queries.
//!
//! Every query returns a [`Table`] whose column list is fixed even when no
//! row matched, so mappers can rely on the schema instead of probing for
//! keys. Cells are raw source text; absent values are `None`.

use std::collections::HashSet;

use gridconv_core::{GridError, GridResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

/// Borrowed view of one table row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Option<String>],
}

pub type Record = Vec<(String, Option<String>)>;

impl Table {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row in column order; short rows are padded with nulls.
    pub fn push(&mut self, mut values: Vec<Option<String>>) {
        values.resize(self.columns.len(), None);
        self.rows.push(values);
    }

    /// Append a named record, growing the schema for unseen columns.
    pub fn push_record(&mut self, record: Record) {
        let mut values = vec![None; self.columns.len()];
        for (column, value) in record {
            match self.column_index(&column) {
                Some(index) => values[index] = value,
                None => {
                    self.columns.push(column);
                    for row in &mut self.rows {
                        row.push(None);
                    }
                    values.push(value);
                }
            }
        }
        self.rows.push(values);
    }

    /// Set `column` to `value` on every row, adding the column if needed.
    pub fn set_column(&mut self, column: &str, values: Vec<Option<String>>) {
        let index = match self.column_index(column) {
            Some(index) => index,
            None => {
                self.columns.push(column.to_string());
                for row in &mut self.rows {
                    row.push(None);
                }
                self.columns.len() - 1
            }
        };
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[index] = value;
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Drop repeated rows, keeping the first occurrence.
    pub fn dedup(&mut self) {
        let mut seen = HashSet::new();
        self.rows.retain(|row| seen.insert(row.clone()));
    }

    /// Distinct non-null values of a column in order of first appearance.
    pub fn unique(&self, column: &str) -> Vec<String> {
        let Some(index) = self.column_index(column) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter_map(|row| row[index].clone())
            .filter(|value| seen.insert(value.clone()))
            .collect()
    }

    /// Rows whose `column` equals `value`.
    pub fn filter<'a>(&'a self, column: &str, value: &str) -> Vec<Row<'a>> {
        self.rows()
            .filter(|row| row.get(column) == Some(value))
            .collect()
    }
}

impl<'a> Row<'a> {
    /// Cell text; `None` for a null cell or an unknown column.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|index| self.values[index].as_deref())
    }

    pub fn has(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Cell text of a mandatory column.
    pub fn require(&self, column: &str, context: &str) -> GridResult<&'a str> {
        if !self.has(column) {
            return Err(GridError::missing_field(column, context));
        }
        self.get(column)
            .ok_or_else(|| GridError::null_field(column, context))
    }

    pub fn f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(|value| value.trim().parse().ok())
    }

    pub fn require_f64(&self, column: &str, context: &str) -> GridResult<f64> {
        let text = self.require(column, context)?;
        text.trim().parse().map_err(|_| {
            GridError::Parse(format!(
                "field '{}' of {} is not a number: '{}'",
                column, context, text
            ))
        })
    }

    /// Numeric cell with a fallback for null, missing or unparsable text.
    pub fn f64_or(&self, column: &str, default: f64) -> f64 {
        self.f64(column).unwrap_or(default)
    }

    pub fn is_true(&self, column: &str) -> bool {
        self.get(column)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    }

    /// Name-value pairs in column order.
    pub fn to_record(&self) -> Record {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

/// Numbers stored in one cell, comma separated.
pub fn join_numbers(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn split_numbers(text: &str) -> GridResult<Vec<f64>> {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse()
                .map_err(|_| GridError::Parse(format!("invalid number '{}' in list", part)))
        })
        .collect()
}

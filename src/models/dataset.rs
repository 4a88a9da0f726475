//! Column-oriented dataset.
//!
//! Row order is significant and preserved by every operation. Every column
//! has the same length; a column that would break this is rejected when it
//! is added.

use crate::models::{EvalError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// One dataset row: column name to cell value.
pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
struct Column {
    name: String,
    values: Vec<Value>,
}

/// Ordered collection of equal-length named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dataset from `(name, values)` pairs, validating lengths.
    pub fn from_columns<S, I>(columns: I) -> Result<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Vec<Value>)>,
    {
        let mut dataset = Self::new();
        for (name, values) in columns {
            dataset.push_column(name.into(), values)?;
        }
        Ok(dataset)
    }

    fn push_column(&mut self, name: String, values: Vec<Value>) -> Result<()> {
        if self.has_column(&name) {
            return Err(EvalError::DuplicateColumn(name));
        }
        if let Some(first) = self.columns.first()
            && first.values.len() != values.len()
        {
            return Err(EvalError::ColumnLengthMismatch {
                column: name,
                expected: first.values.len(),
                actual: values.len(),
            });
        }
        self.columns.push(Column { name, values });
        Ok(())
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Return a new dataset with `name` appended.
    ///
    /// The receiver is left untouched.
    pub fn add_column(&self, name: impl Into<String>, values: Vec<Value>) -> Result<Self> {
        let mut next = self.clone();
        next.push_column(name.into(), values)?;
        Ok(next)
    }

    /// Row at `index`, if in bounds.
    pub fn row(&self, index: usize) -> Option<Row> {
        if index >= self.len() {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|c| (c.name.clone(), c.values[index].clone()))
                .collect(),
        )
    }

    /// Iterate rows in order.
    pub fn rows(&self) -> impl Iterator<Item = Row> + '_ {
        (0..self.len()).filter_map(move |i| self.row(i))
    }

    /// Build a new dataset by transforming every row.
    ///
    /// Columns that survive the transform keep their position; new columns
    /// follow in key order. Every output row must carry the same keys.
    pub fn map<F>(&self, transform: F) -> Result<Self>
    where
        F: Fn(Row) -> Row,
    {
        let rows: Vec<Row> = self.rows().map(transform).collect();
        let Some(first) = rows.first() else {
            return Ok(self.clone());
        };

        let mut names: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.name.clone())
            .filter(|n| first.contains_key(n))
            .collect();
        names.extend(first.keys().filter(|k| !self.has_column(k)).cloned());

        let mut columns: Vec<(String, Vec<Value>)> = names
            .into_iter()
            .map(|n| (n, Vec::with_capacity(rows.len())))
            .collect();

        for (index, mut row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(EvalError::InvalidConfig(format!(
                    "map produced {} fields at row {index}, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            for (name, values) in columns.iter_mut() {
                let value = row
                    .remove(name.as_str())
                    .ok_or_else(|| EvalError::ColumnNotFound(format!("{name} (row {index})")))?;
                values.push(value);
            }
        }

        Self::from_columns(columns)
    }

    /// Load a dataset from a JSONL file, one object per row.
    ///
    /// Columns appear in first-seen key order; rows that lack a key get
    /// `null` for it.
    pub fn from_jsonl(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| EvalError::io("opening dataset file", e))?;
        let reader = BufReader::new(file);

        let mut names: Vec<String> = Vec::new();
        let mut objects: Vec<Map<String, Value>> = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| EvalError::io("reading dataset file", e))?;
            if line.trim().is_empty() {
                continue;
            }
            let object: Map<String, Value> = serde_json::from_str(&line)
                .map_err(|e| EvalError::ParseError(format!("Line {}: {}", line_num + 1, e)))?;
            for key in object.keys() {
                if !names.contains(key) {
                    names.push(key.clone());
                }
            }
            objects.push(object);
        }

        let columns = names.into_iter().map(|name| {
            let values = objects
                .iter()
                .map(|o| o.get(&name).cloned().unwrap_or(Value::Null))
                .collect();
            (name, values)
        });

        let dataset = Self::from_columns(columns)?;
        info!(
            rows = dataset.len(),
            columns = dataset.columns.len(),
            "Loaded dataset"
        );
        Ok(dataset)
    }

    /// Write the dataset to a JSONL file, one object per row.
    pub fn to_jsonl(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| EvalError::io("creating output file", e))?;
        let mut writer = BufWriter::new(file);

        for index in 0..self.len() {
            let object: Map<String, Value> = self
                .columns
                .iter()
                .map(|c| (c.name.clone(), c.values[index].clone()))
                .collect();
            let json = serde_json::to_string(&object)
                .map_err(|e| EvalError::Internal(format!("Failed to serialize row: {e}")))?;
            writeln!(writer, "{json}").map_err(|e| EvalError::io("writing output", e))?;
        }

        writer
            .flush()
            .map_err(|e| EvalError::io("flushing output", e))
    }
}

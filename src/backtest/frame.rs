//! Minimal row-oriented table of JSON cells.

use serde_json::{Map, Value};

/// Ordered columns plus rows of JSON values. Rows always have one cell per
/// column; missing cells are null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    /// First non-null value among `columns`.
    pub fn first_of(&self, columns: &[&str]) -> Option<&'a Value> {
        columns
            .iter()
            .filter_map(|c| self.get(c))
            .find(|v| !v.is_null())
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    pub fn to_record(&self) -> Map<String, Value> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// From an array of objects; columns in first-seen order. Anything that is
    /// not an array of objects gives an empty frame.
    pub fn from_records(value: &Value) -> Self {
        let Some(items) = value.as_array() else {
            return Self::default();
        };
        let mut frame = Self::default();
        for item in items {
            let Some(obj) = item.as_object() else { continue };
            for key in obj.keys() {
                if frame.column_index(key).is_none() {
                    frame.add_column(key, Value::Null);
                }
            }
            let row = frame
                .columns
                .iter()
                .map(|c| obj.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            frame.rows.push(row);
        }
        frame
    }

    pub fn to_records(&self) -> Vec<Value> {
        self.rows().map(|r| Value::Object(r.to_record())).collect()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Appends a row, padding or truncating to the column count.
    pub fn push_row(&mut self, mut values: Vec<Value>) {
        values.resize(self.columns.len(), Value::Null);
        self.rows.push(values);
    }

    /// Renames `from` to `to` unless `to` already exists.
    pub fn rename(&mut self, from: &str, to: &str) {
        if self.has_column(to) {
            return;
        }
        if let Some(i) = self.column_index(from) {
            self.columns[i] = to.to_string();
        }
    }

    pub fn add_column(&mut self, name: &str, fill: Value) {
        if self.has_column(name) {
            return;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(fill.clone());
        }
    }

    pub fn drop_column(&mut self, name: &str) {
        if let Some(i) = self.column_index(name) {
            self.columns.remove(i);
            for row in &mut self.rows {
                row.remove(i);
            }
        }
    }

    /// Rewrites every cell of `column` in place.
    pub fn map_column(&mut self, column: &str, f: impl Fn(&Value) -> Value) {
        if let Some(i) = self.column_index(column) {
            for row in &mut self.rows {
                row[i] = f(&row[i]);
            }
        }
    }

    /// Sets `column` for every row, creating it if needed.
    pub fn fill_column(&mut self, column: &str, value: Value) {
        self.add_column(column, Value::Null);
        self.map_column(column, |_| value.clone());
    }

    pub fn filter(&self, keep: impl Fn(&Row<'_>) -> bool) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self
                .rows()
                .filter(|r| keep(r))
                .map(|r| r.values.to_vec())
                .collect(),
        }
    }

    pub fn head(&self, n: usize) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Stable sort by the string form of `column`.
    pub fn sort_by_text(&mut self, column: &str) {
        if let Some(i) = self.column_index(column) {
            self.rows.sort_by_key(|row| cell_text(&row[i]));
        }
    }
}

/// Numeric value of a cell: numbers, or strings that parse as numbers.
pub fn cell_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

/// Text of a cell as it would appear in a table; null is empty.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Null, empty strings and NaN-like text count as missing.
pub fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let t = s.trim();
            t.is_empty() || t.eq_ignore_ascii_case("nan")
        }
        _ => false,
    }
}

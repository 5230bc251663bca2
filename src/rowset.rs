//! Tabular query results
//!
//! A [`Rowset`] is an immutable column description plus a flat, row-major
//! value array. Slicing and filtering build new rowsets that share the
//! column description.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::protocol::Value;

/// Column description. Version 1 rowsets only carry `name`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
  pub name: String,
  #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
  pub column_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub database: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub table: Option<String>,
  /// Name of the column in its origin table
  #[serde(skip_serializing_if = "Option::is_none")]
  pub column: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub not_null: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub primary_key: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub auto_increment: Option<bool>,
}

impl ColumnMetadata {
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowsetMetadata {
  pub version: u8,
  pub number_of_rows: usize,
  pub number_of_columns: usize,
  pub columns: Vec<ColumnMetadata>,
}

#[derive(Debug, PartialEq)]
struct Columns {
  version: u8,
  list: Vec<ColumnMetadata>,
  /// Row-view keys, unique even when column names collide
  keys: Vec<String>,
}

/// Suffix repeated names with `_0`, `_1`, ... counting per base name and
/// skipping keys that are already taken.
fn unique_keys(columns: &[ColumnMetadata]) -> Vec<String> {
  let mut taken: HashSet<String> = HashSet::with_capacity(columns.len());
  let mut keys = Vec::with_capacity(columns.len());

  for column in columns {
    let mut key = column.name.clone();
    let mut suffix = 0usize;
    while taken.contains(&key) {
      key = format!("{}_{}", column.name, suffix);
      suffix += 1;
    }
    taken.insert(key.clone());
    keys.push(key);
  }

  keys
}

/// Decoded result of a query
#[derive(Debug, Clone, PartialEq)]
pub struct Rowset {
  columns: Arc<Columns>,
  rows: usize,
  data: Vec<Value>,
}

impl Rowset {
  /// Build a rowset, checking that `data` holds exactly
  /// `number_of_rows * number_of_columns` values.
  pub fn new(metadata: RowsetMetadata, data: Vec<Value>) -> Result<Self> {
    if metadata.columns.len() != metadata.number_of_columns {
      return Err(Error::protocol(format!(
        "rowset declares {} columns but describes {}",
        metadata.number_of_columns,
        metadata.columns.len()
      )));
    }

    let expected = metadata
      .number_of_rows
      .checked_mul(metadata.number_of_columns)
      .ok_or_else(|| Error::protocol("rowset dimensions overflow"))?;
    if data.len() != expected {
      return Err(Error::protocol(format!(
        "rowset holds {} values, expected {} ({} rows x {} columns)",
        data.len(),
        expected,
        metadata.number_of_rows,
        metadata.number_of_columns
      )));
    }

    let keys = unique_keys(&metadata.columns);
    Ok(Self {
      columns: Arc::new(Columns {
        version: metadata.version,
        list: metadata.columns,
        keys,
      }),
      rows: metadata.number_of_rows,
      data,
    })
  }

  fn derive(&self, rows: usize, data: Vec<Value>) -> Self {
    debug_assert_eq!(data.len(), rows * self.number_of_columns());
    Self {
      columns: Arc::clone(&self.columns),
      rows,
      data,
    }
  }

  pub fn version(&self) -> u8 {
    self.columns.version
  }

  pub fn number_of_rows(&self) -> usize {
    self.rows
  }

  pub fn number_of_columns(&self) -> usize {
    self.columns.list.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows == 0
  }

  pub fn columns(&self) -> &[ColumnMetadata] {
    &self.columns.list
  }

  pub fn column_names(&self) -> Vec<&str> {
    self.columns.list.iter().map(|c| c.name.as_str()).collect()
  }

  /// Keys used by row views, with collisions suffixed
  pub fn column_keys(&self) -> &[String] {
    &self.columns.keys
  }

  pub fn metadata(&self) -> RowsetMetadata {
    RowsetMetadata {
      version: self.version(),
      number_of_rows: self.rows,
      number_of_columns: self.number_of_columns(),
      columns: self.columns.list.clone(),
    }
  }

  /// Flat row-major values
  pub fn data(&self) -> &[Value] {
    &self.data
  }

  pub fn into_data(self) -> Vec<Value> {
    self.data
  }

  pub fn get_value(&self, row: usize, column: usize) -> Result<&Value> {
    if row >= self.rows {
      return Err(Error::protocol(format!(
        "row index {} out of range (rows: {})",
        row, self.rows
      )));
    }
    if column >= self.number_of_columns() {
      return Err(Error::protocol(format!(
        "column index {} out of range (columns: {})",
        column,
        self.number_of_columns()
      )));
    }
    Ok(&self.data[row * self.number_of_columns() + column])
  }

  pub fn row(&self, index: usize) -> Option<Row<'_>> {
    (index < self.rows).then_some(Row {
      rowset: self,
      index,
    })
  }

  pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
    (0..self.rows).map(move |index| Row {
      rowset: self,
      index,
    })
  }

  fn row_values(&self, index: usize) -> &[Value] {
    let width = self.number_of_columns();
    &self.data[index * width..(index + 1) * width]
  }

  /// Rows `start..end` with negative indices counted from the end and
  /// out-of-range bounds clamped. `None` as `end` means "to the end".
  pub fn slice(&self, start: isize, end: Option<isize>) -> Rowset {
    let len = self.rows as isize;
    let clamp = |i: isize| -> usize {
      if i < 0 {
        (len + i).max(0) as usize
      } else {
        i.min(len) as usize
      }
    };

    let from = clamp(start);
    let to = end.map_or(self.rows, clamp);
    if from >= to {
      return self.derive(0, Vec::new());
    }

    let width = self.number_of_columns();
    let data = self.data[from * width..to * width].to_vec();
    self.derive(to - from, data)
  }

  /// Rows matching `predicate`
  pub fn filter<F>(&self, mut predicate: F) -> Rowset
  where
    F: FnMut(&Row<'_>) -> bool,
  {
    let mut rows = 0;
    let mut data = Vec::new();
    for row in self.rows() {
      if predicate(&row) {
        data.extend_from_slice(row.values());
        rows += 1;
      }
    }
    self.derive(rows, data)
  }

  pub fn map<T, F>(&self, f: F) -> Vec<T>
  where
    F: FnMut(Row<'_>) -> T,
  {
    self.rows().map(f).collect()
  }

  pub fn reduce<T, F>(&self, init: T, f: F) -> T
  where
    F: FnMut(T, Row<'_>) -> T,
  {
    self.rows().fold(init, f)
  }

  /// Array of row objects keyed by [`Rowset::column_keys`]
  pub fn to_json(&self) -> serde_json::Value {
    serde_json::Value::Array(
      self.rows()
        .map(|row| serde_json::Value::Object(row.to_json()))
        .collect(),
    )
  }
}

/// Borrowed view of one row
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
  rowset: &'a Rowset,
  index: usize,
}

impl<'a> Row<'a> {
  pub fn index(&self) -> usize {
    self.index
  }

  pub fn values(&self) -> &'a [Value] {
    self.rowset.row_values(self.index)
  }

  /// Value by row-view key (see [`Rowset::column_keys`])
  pub fn get(&self, key: &str) -> Option<&'a Value> {
    let position = self.rowset.columns.keys.iter().position(|k| k == key)?;
    self.values().get(position)
  }

  pub fn get_index(&self, column: usize) -> Option<&'a Value> {
    self.values().get(column)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
    let keys = &self.rowset.columns.keys;
    keys.iter().map(String::as_str).zip(self.values().iter())
  }

  pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
    self.iter()
      .map(|(key, value)| (key.to_string(), value.to_json()))
      .collect()
  }
}

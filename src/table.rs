//! In-memory tabular results.
//!
//! Every query that returns rows hands back a [`Table`]: an ordered list of
//! column names plus rows of [`Cell`]s. Rows always have exactly one cell per
//! column; missing values are [`Cell::Null`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::io;

use crate::error::Result;

use crate::util::parse_time;

/// One value of a [`Table`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Time(DateTime<Utc>),
}

impl Cell {
    /// Converts a JSON value. Arrays and objects are kept as their JSON text.
    pub fn from_json(v: &Value) -> Cell {
        match v {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
            },
            Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; integers are widened and numeric text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&DateTime<Utc>> {
        match self {
            Cell::Time(t) => Some(t),
            _ => None,
        }
    }

    /// Time coercion: times pass through, text is parsed, anything else is null.
    fn to_time(&self) -> Cell {
        match self {
            Cell::Time(t) => Cell::Time(*t),
            Cell::Text(s) => parse_time(s).map(Cell::Time).unwrap_or(Cell::Null),
            _ => Cell::Null,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Float(x) => write!(f, "{x}"),
            Cell::Text(s) => f.write_str(s),
            Cell::Time(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S%.3f")),
        }
    }
}

/// Named columns × rows of cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// An empty table with the given columns.
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Builds a table from rows given positionally. Short rows are padded
    /// with nulls and extra cells are dropped.
    pub fn from_rows<I, S>(columns: I, rows: Vec<Vec<Cell>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::with_columns(columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Builds a table from JSON objects. Columns are the union of keys in
    /// first-seen order.
    pub fn from_records(records: &[Map<String, Value>]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for rec in records {
            for k in rec.keys() {
                if !columns.iter().any(|c| c == k) {
                    columns.push(k.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|rec| {
                columns
                    .iter()
                    .map(|c| rec.get(c).map(Cell::from_json).unwrap_or(Cell::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub(crate) fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Null);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.len(), self.width())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All cells of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Replaces every column name; `names` must match the current width.
    pub(crate) fn set_columns(&mut self, names: Vec<String>) -> bool {
        if names.len() != self.columns.len() {
            return false;
        }
        self.columns = names;
        true
    }

    pub(crate) fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| !names.contains(&c.as_str()))
            .collect();
        let mut i = 0;
        self.columns.retain(|_| {
            i += 1;
            keep[i - 1]
        });
        for row in &mut self.rows {
            let mut i = 0;
            row.retain(|_| {
                i += 1;
                keep[i - 1]
            });
        }
    }

    /// Converts the named columns to [`Cell::Time`]; values that do not parse become null.
    pub fn convert_time_columns(&mut self, names: &[&str]) {
        let idxs: Vec<usize> = names.iter().filter_map(|n| self.column_index(n)).collect();
        for row in &mut self.rows {
            for &i in &idxs {
                row[i] = row[i].to_time();
            }
        }
    }

    /// Writes the table as CSV with a header line; nulls are empty fields.
    pub fn write_csv<W: io::Write>(&self, out: W) -> csv::Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|c| c.to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// [`Table::write_csv`] into a string.
    pub fn to_csv(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(v: Value) -> Vec<Map<String, Value>> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn records_union_columns_in_first_seen_order() {
        let t = Table::from_records(&records(json!([
            {"a": 1, "b": "x"},
            {"b": "y", "c": 2.5}
        ])));
        assert_eq!(t.columns(), ["a", "b", "c"]);
        assert_eq!(t.shape(), (2, 3));
        assert_eq!(t.get(1, "a"), Some(&Cell::Null));
        assert_eq!(t.get(1, "c"), Some(&Cell::Float(2.5)));
    }

    #[test]
    fn rows_are_padded_to_width() {
        let t = Table::from_rows(["a", "b"], vec![vec![Cell::Int(1)]]);
        assert_eq!(t.rows()[0], vec![Cell::Int(1), Cell::Null]);
    }

    #[test]
    fn drop_then_set_columns() {
        let mut t = Table::from_rows(
            ["a", "b", "c"],
            vec![vec![Cell::Int(1), Cell::Int(2), Cell::Int(3)]],
        );
        t.drop_columns(&["b"]);
        assert!(!t.set_columns(vec!["x".into()]));
        assert!(t.set_columns(vec!["a".into(), "z".into()]));
        assert_eq!(t.columns(), ["a", "z"]);
        assert_eq!(t.rows()[0], vec![Cell::Int(1), Cell::Int(3)]);
    }

    #[test]
    fn time_conversion_coerces_bad_values_to_null() {
        let mut t = Table::from_rows(
            ["Time"],
            vec![
                vec![Cell::Text("2020-01-02 03:04:05".into())],
                vec![Cell::Text("garbage".into())],
            ],
        );
        t.convert_time_columns(&["Time"]);
        assert!(t.get(0, "Time").unwrap().as_time().is_some());
        assert!(t.get(1, "Time").unwrap().is_null());
    }

    #[test]
    fn csv_quotes_when_needed() {
        let t = Table::from_rows(
            ["name", "desc"],
            vec![vec![Cell::Text("A".into()), Cell::Text("x, \"y\"".into())]],
        );
        assert_eq!(t.to_csv().unwrap(), "name,desc\nA,\"x, \"\"y\"\"\"\n");
    }

    #[test]
    fn csv_writes_nulls_as_empty_fields() {
        let t = Table::from_rows(
            ["date", "P1"],
            vec![vec![Cell::Text("line\nbreak".into()), Cell::Null]],
        );
        assert_eq!(t.to_csv().unwrap(), "date,P1\n\"line\nbreak\",\n");
    }

    #[test]
    fn nested_json_is_kept_as_text() {
        assert_eq!(
            Cell::from_json(&json!({"k": 1})),
            Cell::Text("{\"k\":1}".to_string())
        );
        assert_eq!(Cell::from_json(&json!(3)), Cell::Int(3));
        assert_eq!(Cell::Text(" 4.5 ".into()).as_f64(), Some(4.5));
    }
}

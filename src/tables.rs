use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::table::{Cell, Table};
use crate::util::{DATE_FORMAT_MS, format_time, resolve_window, set_query_pct20};

// Presentation-only fields of a table-parameter cell.
const PARAM_CELL_EXTRAS: [&str; 6] = [
    "cellValue",
    "altText",
    "bgColor",
    "detail",
    "webpagelink",
    "rowParams",
];

/// How many columns the table data endpoint returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableMode {
    #[default]
    Brief,
    Full,
}

impl TableMode {
    fn as_str(self) -> &'static str {
        match self {
            TableMode::Brief => "BRIEF",
            TableMode::Full => "FULL",
        }
    }
}

/// Row layout requested from the table data endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Representation {
    Simple,
    #[default]
    Complex,
}

impl Representation {
    fn as_str(self) -> &'static str {
        match self {
            Representation::Simple => "SIMPLE",
            Representation::Complex => "COMPLEX",
        }
    }
}

/// Options for [`Client::table_data`].
#[derive(Debug, Clone)]
pub struct TableDataOptions {
    /// Defaults to 24 hours before `stop`.
    pub start: Option<DateTime<Utc>>,
    /// Defaults to now.
    pub stop: Option<DateTime<Utc>>,
    /// Column the filter applies to.
    pub filter_key: String,
    /// Empty matches everything.
    pub filter_value: String,
    /// Server-side row limit; WebMUST caps unbounded queries at 5000.
    pub max_rows: u32,
    pub mode: TableMode,
    pub representation: Representation,
}

impl Default for TableDataOptions {
    fn default() -> Self {
        Self {
            start: None,
            stop: None,
            filter_key: "name".to_string(),
            filter_value: String::new(),
            max_rows: 1000,
            mode: TableMode::Brief,
            representation: Representation::Complex,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct TableReply {
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    data: Vec<Value>,
}

impl Client {
    /// Lists the tables of a provider, one row per table.
    pub fn tables(&self, provider: Option<&str>) -> Result<Table> {
        let records = self.table_records(provider)?;
        Ok(Table::from_records(&records))
    }

    /// The `dataType` of every table of a provider; these are the names the
    /// other table queries accept.
    pub fn table_names(&self, provider: Option<&str>) -> Result<Vec<String>> {
        let records = self.table_records(provider)?;
        Ok(records
            .iter()
            .filter_map(|t| t.get("dataType").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    fn table_records(&self, provider: Option<&str>) -> Result<Vec<Map<String, Value>>> {
        let provider = self.resolve_provider(provider)?;
        let url = self.endpoint(&["dataproviders", provider.as_str(), "tables"])?;
        let records: Vec<Map<String, Value>> = self.get_json(&url, &[])?;
        info!("provider {} has {} table(s)", provider, records.len());
        Ok(records)
    }

    /// Raw metadata document of one table.
    pub fn table_meta(&self, provider: Option<&str>, table: &str) -> Result<Value> {
        let provider = self.resolve_provider(provider)?;
        let url = self.endpoint(&["dataproviders", provider.as_str(), "table", table, "metadata"])?;
        self.get_json(&url, &[])
    }

    /// Rows of a provider table within a time window.
    ///
    /// Columns with "time" in their name (except `Time Quality`) are converted
    /// to times; values that do not parse become null.
    pub fn table_data(
        &self,
        provider: Option<&str>,
        table: &str,
        opts: &TableDataOptions,
    ) -> Result<Table> {
        let provider = self.resolve_provider(provider)?;
        let (start, stop) = resolve_window(opts.start, opts.stop);
        if start > stop {
            return Err(Error::InvalidArgument(
                "start time must not be after stop time".to_string(),
            ));
        }

        let from = format_time(&start);
        let to = format_time(&stop);
        let max_rows = opts.max_rows.to_string();
        let url = self.endpoint(&["dataproviders", provider.as_str(), "table", table, "data"])?;
        let reply: TableReply = self.get_json(
            &url,
            &[
                ("dateFormat", "fromTo"),
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("filterKeys", opts.filter_key.as_str()),
                ("filterValues", opts.filter_value.as_str()),
                ("mode", opts.mode.as_str()),
                ("representation", opts.representation.as_str()),
                ("maxRows", max_rows.as_str()),
            ],
        )?;

        let table_data = parse_table_data(reply, opts.representation, url.as_str())?;
        if table_data.is_empty() {
            warn!("no table data found for those inputs");
        } else {
            info!("{} table entries retrieved", table_data.len());
        }
        if table_data.len() == opts.max_rows as usize {
            warn!("number of rows returned equal to maximum - increase max_rows for more data");
        }
        Ok(table_data)
    }

    /// Parameter rows of a table entry at a given time.
    pub fn table_param(
        &self,
        provider: Option<&str>,
        table: &str,
        element_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Table> {
        let provider = self.resolve_provider(provider)?;
        let ts = timestamp.format(DATE_FORMAT_MS).to_string();
        let endpoint = self.endpoint(&["web", "tables", "params", provider.as_str(), table])?;
        let mut url = endpoint.clone();
        set_query_pct20(
            &mut url,
            &[
                ("elementId", element_id),
                ("ssc", "null"),
                ("timestamp", ts.as_str()),
            ],
        );
        let reply: TableReply = self.fetch_json(url)?;

        let table_data = parse_table_param(reply, endpoint.as_str())?;
        if table_data.is_empty() {
            warn!("no data found for the given parameter and time");
        }
        Ok(table_data)
    }

    /// Aggregations defined for a provider, optionally only the one with `id`.
    pub fn aggregations(&self, provider: Option<&str>, id: Option<&str>) -> Result<Table> {
        let provider = self.resolve_provider(provider)?;
        let url = self.endpoint(&["dataproviders", provider.as_str(), "aggregations"])?;
        let reply: Value = match id {
            Some(id) => self.get_json(&url, &[("key", "id"), ("value", id)])?,
            None => self.get_json(&url, &[])?,
        };
        records_to_table(reply, url.as_str())
    }
}

/// Turns an array of objects (or a single object) into a table.
pub(crate) fn records_to_table(reply: Value, url: &str) -> Result<Table> {
    let records: Vec<Map<String, Value>> = match reply {
        Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                Value::Object(m) => Ok(m),
                other => Err(Error::parse(url, format!("expected an object, got {other}"))),
            })
            .collect::<Result<_>>()?,
        Value::Object(m) => vec![m],
        Value::Null => Vec::new(),
        other => return Err(Error::parse(url, format!("expected records, got {other}"))),
    };
    Ok(Table::from_records(&records))
}

pub(crate) fn time_columns(table: &Table) -> Vec<String> {
    table
        .columns()
        .iter()
        .filter(|c| c.to_lowercase().contains("time") && c.as_str() != "Time Quality")
        .cloned()
        .collect()
}

pub(crate) fn parse_table_data(
    reply: TableReply,
    representation: Representation,
    url: &str,
) -> Result<Table> {
    let mut table = match representation {
        Representation::Complex => {
            let mut rows = Vec::with_capacity(reply.data.len());
            for row in &reply.data {
                let cells = row
                    .get("dataCells")
                    .and_then(Value::as_array)
                    .ok_or_else(|| Error::parse(url, "complex row without dataCells"))?;
                rows.push(
                    cells
                        .iter()
                        .map(|c| c.get("cellValue").map(Cell::from_json).unwrap_or(Cell::Null))
                        .collect(),
                );
            }
            Table::from_rows(reply.headers, rows)
        }
        Representation::Simple => {
            if reply.data.iter().all(Value::is_array) {
                let rows = reply
                    .data
                    .iter()
                    .filter_map(Value::as_array)
                    .map(|r| r.iter().map(Cell::from_json).collect())
                    .collect();
                Table::from_rows(reply.headers, rows)
            } else {
                records_to_table(Value::Array(reply.data), url)?
            }
        }
    };

    let time_cols = time_columns(&table);
    let time_cols: Vec<&str> = time_cols.iter().map(String::as_str).collect();
    table.convert_time_columns(&time_cols);
    Ok(table)
}

pub(crate) fn parse_table_param(reply: TableReply, url: &str) -> Result<Table> {
    let Some(first) = reply.data.first() else {
        return Ok(Table::with_columns(reply.headers));
    };
    let cells = first
        .get("dataCells")
        .cloned()
        .ok_or_else(|| Error::parse(url, "row without dataCells"))?;

    let mut table = records_to_table(cells, url)?;
    table.drop_columns(&PARAM_CELL_EXTRAS);
    let width = table.width();
    if !table.set_columns(reply.headers) {
        return Err(Error::parse(
            url,
            format!("{width} cell field(s) do not match the table headers"),
        ));
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(v: Value) -> TableReply {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn complex_rows_map_cell_values_onto_headers() {
        let r = reply(json!({
            "headers": ["Name", "Reception Time", "Time Quality"],
            "data": [
                {"dataCells": [{"cellValue": "EV1"}, {"cellValue": "2020-01-02 03:04:05"}, {"cellValue": "GOOD"}]},
                {"dataCells": [{"cellValue": "EV2"}, {"cellValue": "n/a"}, {"cellValue": "BAD"}]}
            ]
        }));
        let t = parse_table_data(r, Representation::Complex, "u").unwrap();
        assert_eq!(t.shape(), (2, 3));
        assert!(t.get(0, "Reception Time").unwrap().as_time().is_some());
        assert!(t.get(1, "Reception Time").unwrap().is_null());
        assert_eq!(t.get(0, "Time Quality"), Some(&Cell::Text("GOOD".into())));
    }

    #[test]
    fn complex_row_without_cells_is_a_parse_error() {
        let r = reply(json!({"headers": ["a"], "data": [{"nope": 1}]}));
        let err = parse_table_data(r, Representation::Complex, "u").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn simple_rows_may_be_objects() {
        let r = reply(json!({
            "headers": ["name", "value"],
            "data": [{"name": "A", "value": 1}, {"name": "B", "value": 2}]
        }));
        let t = parse_table_data(r, Representation::Simple, "u").unwrap();
        assert_eq!(t.columns(), ["name", "value"]);
        assert_eq!(t.get(1, "value"), Some(&Cell::Int(2)));
    }

    #[test]
    fn empty_data_keeps_headers() {
        let r = reply(json!({"headers": ["a", "b"], "data": []}));
        let t = parse_table_data(r, Representation::Simple, "u").unwrap();
        assert_eq!(t.shape(), (0, 2));
    }

    #[test]
    fn table_param_drops_presentation_fields_and_renames() {
        let r = reply(json!({
            "headers": ["Parameter", "Raw", "Eng"],
            "data": [{"dataCells": [
                {"cellValue": "x", "altText": "", "bgColor": "", "detail": "", "webpagelink": "", "rowParams": "",
                 "name": "P1", "raw": 10, "eng": "ON"},
                {"cellValue": "y", "altText": "", "bgColor": "", "detail": "", "webpagelink": "", "rowParams": "",
                 "name": "P2", "raw": 11, "eng": "OFF"}
            ]}]
        }));
        let t = parse_table_param(r, "u").unwrap();
        assert_eq!(t.columns(), ["Parameter", "Raw", "Eng"]);
        assert_eq!(t.get(1, "Eng"), Some(&Cell::Text("OFF".into())));
    }

    #[test]
    fn table_param_header_mismatch_is_a_parse_error() {
        let r = reply(json!({
            "headers": ["only"],
            "data": [{"dataCells": [{"a": 1, "b": 2}]}]
        }));
        assert!(matches!(parse_table_param(r, "u"), Err(Error::Parse { .. })));
    }

    #[test]
    fn single_object_becomes_one_row() {
        let t = records_to_table(json!({"id": 7, "name": "agg"}), "u").unwrap();
        assert_eq!(t.shape(), (1, 2));
    }
}

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::table::{Cell, Table};
use crate::tables::records_to_table;
use crate::util::{format_time, from_epoch_millis, parse_time, resolve_window};

/// Name of the time column of every series table.
pub const DATE_COLUMN: &str = "date";

const FIRST_SAMPLE: &str = "First Sample";
const LAST_SAMPLE: &str = "Last Sample";

/// Options for [`Client::data`].
#[derive(Debug, Clone, Default)]
pub struct DataOptions {
    /// Defaults to 24 hours before `stop`.
    pub start: Option<DateTime<Utc>>,
    /// Defaults to now.
    pub stop: Option<DateTime<Utc>>,
    /// Return engineering values instead of raw ones.
    pub calibrated: bool,
    /// Ask the server to down-sample to roughly this many points.
    pub max_points: Option<u32>,
}

/// Level of detail for [`Client::param_info`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InfoMode {
    #[default]
    Simple,
    /// Adds monitoring checks, from which limits are extracted.
    Complex,
}

impl InfoMode {
    fn as_str(self) -> &'static str {
        match self {
            InfoMode::Simple => "SIMPLE",
            InfoMode::Complex => "COMPLEX",
        }
    }
}

/// Field matched by [`Client::search_parameters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchBy {
    #[default]
    Description,
    /// The parameter mnemonic.
    Name,
}

impl SearchBy {
    fn as_str(self) -> &'static str {
        match self {
            SearchBy::Description => "Description",
            SearchBy::Name => "Name",
        }
    }
}

/// Monitoring limits of a parameter. Absent when the parameter has no such check.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Limits {
    pub soft_low: Option<f64>,
    pub soft_high: Option<f64>,
    pub hard_low: Option<f64>,
    pub hard_high: Option<f64>,
}

/// Metadata of one telemetry parameter.
#[derive(Debug, Clone, Default)]
pub struct ParameterInfo {
    /// Every metadata field as returned by the server.
    pub fields: Map<String, Value>,
    pub first_sample: Option<DateTime<Utc>>,
    pub last_sample: Option<DateTime<Utc>>,
    /// Only filled in [`InfoMode::Complex`].
    pub limits: Option<Limits>,
    /// Whether the checks apply to calibrated values; unset when checks disagree.
    pub check_calibrated: Option<bool>,
    pub check_interpretation: Option<String>,
}

impl ParameterInfo {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.text("Name")
    }

    pub fn description(&self) -> Option<&str> {
        self.text("Description")
    }

    pub fn unit(&self) -> Option<&str> {
        self.text("Unit")
    }
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    key: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ParameterSeries {
    #[serde(default)]
    metadata: Vec<KeyValue>,
    #[serde(default)]
    data: Vec<Sample>,
}

#[derive(Debug, Deserialize)]
struct Sample {
    date: Value,
    #[serde(default)]
    value: Value,
    #[serde(default, rename = "calibratedValue")]
    calibrated_value: Value,
}

#[derive(Debug, Deserialize)]
struct ComplexInfo {
    #[serde(default)]
    metadata: Vec<KeyValue>,
    #[serde(default, rename = "monitoringChecks")]
    monitoring_checks: Vec<MonitoringCheck>,
}

#[derive(Debug, Deserialize)]
struct MonitoringCheck {
    #[serde(default, rename = "useCalibrated")]
    use_calibrated: Option<bool>,
    #[serde(default, rename = "checkInterpretation")]
    check_interpretation: Option<String>,
    #[serde(default, rename = "checkDefinitions")]
    check_definitions: Value,
}

/// One fetched series: column name and its samples.
pub(crate) struct Series {
    name: String,
    samples: Vec<(DateTime<Utc>, Cell)>,
    /// Samples whose date could not be read.
    dropped: usize,
}

impl Client {
    /// Samples of one or more parameters in a time window.
    ///
    /// Each parameter is fetched with its own request. The result has a
    /// `date` column followed by one column per parameter; series are
    /// outer-joined on identical timestamps and sorted by time. Parameters
    /// without samples are left out.
    pub fn data<S: AsRef<str>>(
        &self,
        provider: Option<&str>,
        names: &[S],
        opts: &DataOptions,
    ) -> Result<Table> {
        if names.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one parameter name is required".to_string(),
            ));
        }
        let provider = self.resolve_provider(provider)?;
        let (start, stop) = resolve_window(opts.start, opts.stop);

        let mut series = Vec::with_capacity(names.len());
        for name in names {
            let name: &str = name.as_ref();
            let reply = self.fetch_series(
                &provider,
                name,
                start,
                stop,
                opts.calibrated,
                opts.max_points,
            )?;
            let s = series_values(reply, name, opts.calibrated);
            if s.dropped > 0 {
                warn!("{} sample(s) of {} dropped: unreadable date", s.dropped, name);
            }
            if s.samples.is_empty() {
                warn!("no data available for parameter {} in this time range", name);
                continue;
            }
            info!("{} values retrieved for parameter {}", s.samples.len(), name);
            series.push(s);
        }

        if series.is_empty() {
            warn!("no data found for any parameter");
        }
        Ok(merge_series(series))
    }

    /// Timestamp and value of the most recent sample of a parameter.
    ///
    /// The table has the `date` column and a value column named after the
    /// parameter; with `calibrated` the `calibratedValue` column is kept too.
    pub fn latest_value(
        &self,
        provider: Option<&str>,
        name: &str,
        calibrated: bool,
    ) -> Result<Table> {
        let provider = self.resolve_provider(provider)?;
        let info = self.param_info(Some(provider.as_str()), name, InfoMode::Simple)?;
        let last = info
            .last_sample
            .ok_or_else(|| Error::NotFound(format!("parameter {name} has no samples")))?;

        let reply = self.fetch_series(
            &provider,
            name,
            last,
            last + TimeDelta::seconds(1),
            calibrated,
            None,
        )?;
        let column = info.name().unwrap_or(name).to_string();
        let table = latest_table(reply, &column, calibrated);
        if table.is_empty() {
            warn!("no data available for parameter {} in this time range", name);
        } else {
            info!("value retrieved at time {}", format_time(&last));
        }
        Ok(table)
    }

    fn fetch_series(
        &self,
        provider: &str,
        name: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        calibrated: bool,
        max_points: Option<u32>,
    ) -> Result<ParameterSeries> {
        let url = self.endpoint(&["dataproviders", provider, "parameters", "data"])?;
        let from = format_time(&start);
        let to = format_time(&stop);
        let chunks = max_points.map(|n| n.to_string()).unwrap_or_default();
        let reply: Vec<ParameterSeries> = self.get_json(
            &url,
            &[
                ("key", "name"),
                ("values", name),
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("calibrate", if calibrated { "true" } else { "false" }),
                ("chunkCount", chunks.as_str()),
            ],
        )?;
        reply
            .into_iter()
            .next()
            .ok_or_else(|| Error::parse(url.as_str(), format!("no series returned for {name}")))
    }

    /// Metadata of a single parameter.
    pub fn param_info(
        &self,
        provider: Option<&str>,
        name: &str,
        mode: InfoMode,
    ) -> Result<ParameterInfo> {
        let provider = self.resolve_provider(provider)?;
        let url = self.endpoint(&["dataproviders", provider.as_str(), "parameters"])?;
        let reply: Value = self.get_json(
            &url,
            &[
                ("key", "name"),
                ("value", name),
                ("search", "false"),
                ("mode", mode.as_str()),
                ("parameterType", "TM"),
            ],
        )?;

        let info = parse_param_info(reply, mode, url.as_str())?
            .ok_or_else(|| Error::NotFound(format!("no matches found for parameter {name}")))?;
        info!(
            "parameter info for {} extracted",
            info.description().unwrap_or(name)
        );
        Ok(info)
    }

    /// Statistics of a parameter over a time window, as a one-row table.
    pub fn param_stats(
        &self,
        provider: Option<&str>,
        name: &str,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
    ) -> Result<Table> {
        let provider = self.resolve_provider(provider)?;
        let (start, stop) = resolve_window(start, stop);
        let from = format_time(&start);
        let to = format_time(&stop);
        let url = self.endpoint(&["dataproviders", provider.as_str(), "parameters", "statistics"])?;
        let reply: Value = self.get_json(
            &url,
            &[
                ("key", "name"),
                ("values", name),
                ("from", from.as_str()),
                ("to", to.as_str()),
            ],
        )?;
        if !reply.is_object() {
            return Err(Error::parse(url.as_str(), "statistics reply is not an object"));
        }

        let mut stats = records_to_table(reply, url.as_str())?;
        stats.convert_time_columns(&["from", "to"]);
        info!("parameter statistics for {} extracted", name);
        Ok(stats)
    }

    /// Parameters whose description (or name) contains `text`.
    pub fn search_parameters(
        &self,
        provider: Option<&str>,
        text: &str,
        by: SearchBy,
    ) -> Result<Table> {
        let provider = self.resolve_provider(provider)?;
        let url = self.endpoint(&["dataproviders", provider.as_str(), "parameters"])?;
        let reply: Value = self.get_json(
            &url,
            &[
                ("key", by.as_str()),
                ("value", text),
                ("search", "true"),
                ("mode", "SIMPLE"),
                ("parameterType", "TM"),
            ],
        )?;

        let mut params = records_to_table(reply, url.as_str())?;
        if params.is_empty() {
            warn!("no matches found for {}", text);
            return Ok(params);
        }
        params.convert_time_columns(&[FIRST_SAMPLE, LAST_SAMPLE]);
        info!("{} parameters match search text: {}", params.len(), text);
        Ok(params)
    }

    /// Searches the metadata tree and returns the node belonging to the
    /// provider, if any. `fields` is a comma-separated list such as
    /// `"Name,Description"`.
    pub fn tree_search(
        &self,
        provider: Option<&str>,
        text: &str,
        fields: &str,
    ) -> Result<Option<Value>> {
        let provider = self.resolve_provider(provider)?;
        let nodes: Vec<Value> = self.get_json(
            &self.endpoint(&["metadata", "treesearch"])?,
            &[
                ("field", fields),
                ("text", text),
                ("dataproviders", provider.as_str()),
            ],
        )?;
        Ok(nodes.into_iter().find(|n| {
            n.get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.starts_with(provider.as_str()))
        }))
    }
}

fn sample_time(date: &Value) -> Option<DateTime<Utc>> {
    match date {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_epoch_millis),
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .and_then(from_epoch_millis)
            .or_else(|| parse_time(s)),
        _ => None,
    }
}

fn series_name(series: &ParameterSeries, fallback: &str) -> String {
    series
        .metadata
        .iter()
        .find(|kv| kv.key == "name")
        .and_then(|kv| kv.value.as_str())
        .unwrap_or(fallback)
        .to_string()
}

/// One value per sample: the calibrated one when asked for, the raw one otherwise.
pub(crate) fn series_values(series: ParameterSeries, fallback: &str, calibrated: bool) -> Series {
    let name = series_name(&series, fallback);
    let samples: Vec<(DateTime<Utc>, Cell)> = series
        .data
        .iter()
        .filter_map(|s| {
            let t = sample_time(&s.date)?;
            let v = if calibrated {
                &s.calibrated_value
            } else {
                &s.value
            };
            Some((t, Cell::from_json(v)))
        })
        .collect();
    let dropped = series.data.len() - samples.len();
    Series {
        name,
        samples,
        dropped,
    }
}

fn latest_table(series: ParameterSeries, column: &str, calibrated: bool) -> Table {
    let mut columns = vec![DATE_COLUMN.to_string(), column.to_string()];
    if calibrated {
        columns.push("calibratedValue".to_string());
    }
    let rows: Vec<Vec<Cell>> = series
        .data
        .iter()
        .filter_map(|s| {
            let t = sample_time(&s.date)?;
            let mut row = vec![Cell::Time(t), Cell::from_json(&s.value)];
            if calibrated {
                row.push(Cell::from_json(&s.calibrated_value));
            }
            Some(row)
        })
        .collect();
    let dropped = series.data.len() - rows.len();
    if dropped > 0 {
        warn!("{} sample(s) of {} dropped: unreadable date", dropped, column);
    }
    Table::from_rows(columns, rows)
}

/// Outer join on timestamp, ascending. A timestamp repeated within one
/// series keeps its last value.
pub(crate) fn merge_series(series: Vec<Series>) -> Table {
    let mut columns = vec![DATE_COLUMN.to_string()];
    columns.extend(series.iter().map(|s| s.name.clone()));

    let lookups: Vec<BTreeMap<DateTime<Utc>, Cell>> = series
        .into_iter()
        .map(|s| s.samples.into_iter().collect())
        .collect();
    let times: BTreeSet<DateTime<Utc>> =
        lookups.iter().flat_map(|m| m.keys().copied()).collect();

    let rows = times
        .into_iter()
        .map(|t| {
            let mut row = Vec::with_capacity(lookups.len() + 1);
            row.push(Cell::Time(t));
            for m in &lookups {
                row.push(m.get(&t).cloned().unwrap_or(Cell::Null));
            }
            row
        })
        .collect();
    Table::from_rows(columns, rows)
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn extract_limits(checks: &[MonitoringCheck]) -> Option<Limits> {
    if checks.len() > 2 {
        warn!("extracting limits for parameters with >2 checks not supported");
        return None;
    }

    let mut limits = Limits::default();
    for check in checks {
        let definitions: Vec<&Value> = match &check.check_definitions {
            Value::Array(items) => items.iter().collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        };
        for d in definitions {
            let low = d.get("lowValue").and_then(as_f64);
            let high = d.get("highValue").and_then(as_f64);
            match d.get("type").and_then(Value::as_str) {
                Some("SOFT") => {
                    limits.soft_low = low;
                    limits.soft_high = high;
                }
                Some("HARD") => {
                    limits.hard_low = low;
                    limits.hard_high = high;
                }
                other => warn!("unsupported check type {:?}", other),
            }
        }
    }
    Some(limits)
}

// A value shared by every check, or None when they disagree.
fn unanimous<T: PartialEq>(values: impl Iterator<Item = Option<T>>, what: &str) -> Option<T> {
    let mut seen: Vec<Option<T>> = Vec::new();
    for v in values {
        if !seen.contains(&v) {
            seen.push(v);
        }
    }
    match seen.len() {
        0 => None,
        1 => seen.pop().flatten(),
        _ => {
            warn!("mixed {} in checks, ignoring", what);
            None
        }
    }
}

/// `Ok(None)` when the server found no such parameter.
pub(crate) fn parse_param_info(
    reply: Value,
    mode: InfoMode,
    url: &str,
) -> Result<Option<ParameterInfo>> {
    let reply = match reply {
        Value::Array(items) => match items.into_iter().next() {
            Some(first) => first,
            None => return Ok(None),
        },
        Value::Null => return Ok(None),
        other => other,
    };
    if reply.as_object().is_some_and(Map::is_empty) {
        return Ok(None);
    }

    let mut info = ParameterInfo::default();
    match mode {
        InfoMode::Simple => match reply {
            Value::Object(fields) => info.fields = fields,
            other => return Err(Error::parse(url, format!("expected an object, got {other}"))),
        },
        InfoMode::Complex => {
            let complex: ComplexInfo =
                serde_json::from_value(reply).map_err(|e| Error::parse(url, e.to_string()))?;
            info.fields = complex
                .metadata
                .into_iter()
                .map(|kv| (kv.key, kv.value))
                .collect();
            let checks = &complex.monitoring_checks;
            info.check_calibrated =
                unanimous(checks.iter().map(|c| c.use_calibrated), "calibration type");
            info.check_interpretation = unanimous(
                checks.iter().map(|c| c.check_interpretation.clone()),
                "interpretation type",
            );
            info.limits = extract_limits(checks);
        }
    }

    info.first_sample = info.text(FIRST_SAMPLE).and_then(parse_time);
    info.last_sample = info.text(LAST_SAMPLE).and_then(parse_time);
    Ok(Some(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn series(v: Value) -> ParameterSeries {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn series_takes_its_name_from_metadata() {
        let s = series(json!({
            "metadata": [{"key": "name", "value": "NCADAF41"}, {"key": "unit", "value": "V"}],
            "data": [{"date": 1577934245000i64, "value": "1.5", "calibratedValue": "ON"}]
        }));
        let raw = series_values(s, "fallback", false);
        assert_eq!(raw.name, "NCADAF41");
        assert_eq!(raw.samples[0].1, Cell::Text("1.5".into()));
    }

    #[test]
    fn calibrated_series_uses_calibrated_values() {
        let s = series(json!({
            "metadata": [],
            "data": [{"date": 1577934245000i64, "value": 3, "calibratedValue": "ON"}]
        }));
        let cal = series_values(s, "P1", true);
        assert_eq!(cal.name, "P1");
        assert_eq!(cal.samples[0].1, Cell::Text("ON".into()));
    }

    #[test]
    fn samples_with_unreadable_dates_are_counted() {
        let s = series(json!({
            "metadata": [{"key": "name", "value": "P1"}],
            "data": [
                {"date": 1577934245000i64, "value": 1},
                {"date": "yesterday", "value": 2},
                {"date": null, "value": 3},
                {"date": "2020-01-02 03:04:06", "value": 4}
            ]
        }));
        let s = series_values(s, "P1", false);
        assert_eq!(s.samples.len(), 2);
        assert_eq!(s.dropped, 2);
        assert_eq!(s.samples[1].1, Cell::Int(4));
    }

    #[test]
    fn merge_is_an_outer_join_sorted_by_time() {
        let t0 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + TimeDelta::seconds(1);
        let t2 = t0 + TimeDelta::seconds(2);
        let a = Series {
            name: "A".into(),
            samples: vec![(t2, Cell::Int(2)), (t0, Cell::Int(0))],
            dropped: 0,
        };
        let b = Series {
            name: "B".into(),
            samples: vec![(t1, Cell::Int(10)), (t2, Cell::Int(20))],
            dropped: 0,
        };
        let t = merge_series(vec![a, b]);
        assert_eq!(t.columns(), ["date", "A", "B"]);
        assert_eq!(t.len(), 3);
        assert_eq!(t.get(0, "date"), Some(&Cell::Time(t0)));
        assert_eq!(t.get(0, "B"), Some(&Cell::Null));
        assert_eq!(t.get(1, "A"), Some(&Cell::Null));
        assert_eq!(t.get(2, "A"), Some(&Cell::Int(2)));
        assert_eq!(t.get(2, "B"), Some(&Cell::Int(20)));
    }

    #[test]
    fn merge_of_nothing_has_only_the_date_column() {
        let t = merge_series(Vec::new());
        assert_eq!(t.shape(), (0, 1));
    }

    #[test]
    fn simple_info_parses_sample_times() {
        let info = parse_param_info(
            json!({
                "Name": "NCADAF41",
                "Description": "Battery voltage",
                "First Sample": "2019-01-01 00:00:00",
                "Last Sample": "N/A"
            }),
            InfoMode::Simple,
            "u",
        )
        .unwrap()
        .unwrap();
        assert_eq!(info.name(), Some("NCADAF41"));
        assert_eq!(
            info.first_sample,
            Some(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(info.last_sample, None);
        assert!(info.limits.is_none());
    }

    #[test]
    fn empty_reply_means_not_found() {
        assert!(parse_param_info(json!([]), InfoMode::Simple, "u").unwrap().is_none());
        assert!(parse_param_info(json!({}), InfoMode::Simple, "u").unwrap().is_none());
    }

    #[test]
    fn complex_info_extracts_limits() {
        let info = parse_param_info(
            json!({
                "metadata": [
                    {"key": "Name", "value": "NCADAF41"},
                    {"key": "Last Sample", "value": "2020-01-02 03:04:05"}
                ],
                "monitoringChecks": [
                    {"useCalibrated": true, "checkInterpretation": "LIMIT",
                     "checkDefinitions": {"type": "SOFT", "lowValue": "1.0", "highValue": "5.0"}},
                    {"useCalibrated": true, "checkInterpretation": "LIMIT",
                     "checkDefinitions": {"type": "HARD", "lowValue": 0.5, "highValue": 6}}
                ]
            }),
            InfoMode::Complex,
            "u",
        )
        .unwrap()
        .unwrap();
        let limits = info.limits.unwrap();
        assert_eq!(limits.soft_low, Some(1.0));
        assert_eq!(limits.soft_high, Some(5.0));
        assert_eq!(limits.hard_low, Some(0.5));
        assert_eq!(limits.hard_high, Some(6.0));
        assert_eq!(info.check_calibrated, Some(true));
        assert_eq!(info.check_interpretation.as_deref(), Some("LIMIT"));
        assert!(info.last_sample.is_some());
    }

    #[test]
    fn mixed_calibration_is_left_unset() {
        let info = parse_param_info(
            json!({
                "metadata": [{"key": "Name", "value": "X"}],
                "monitoringChecks": [
                    {"useCalibrated": true, "checkDefinitions": {"type": "SOFT", "lowValue": 1, "highValue": 2}},
                    {"useCalibrated": false, "checkDefinitions": {"type": "HARD", "lowValue": 0, "highValue": 3}}
                ]
            }),
            InfoMode::Complex,
            "u",
        )
        .unwrap()
        .unwrap();
        assert_eq!(info.check_calibrated, None);
    }

    #[test]
    fn more_than_two_checks_yield_no_limits() {
        let check = json!({"useCalibrated": true, "checkDefinitions": {"type": "SOFT", "lowValue": 1, "highValue": 2}});
        let info = parse_param_info(
            json!({"metadata": [{"key": "Name", "value": "X"}], "monitoringChecks": [check.clone(), check.clone(), check]}),
            InfoMode::Complex,
            "u",
        )
        .unwrap()
        .unwrap();
        assert!(info.limits.is_none());
    }

    #[test]
    fn latest_table_keeps_calibrated_column_on_request() {
        let s = series(json!({
            "metadata": [],
            "data": [{"date": "1577934245000", "value": 7, "calibratedValue": 7.5}]
        }));
        let t = latest_table(s, "P1", true);
        assert_eq!(t.columns(), ["date", "P1", "calibratedValue"]);
        assert_eq!(t.get(0, "calibratedValue"), Some(&Cell::Float(7.5)));
    }
}

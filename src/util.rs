use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use url::{Url, form_urlencoded};

use crate::error::{Error, Result};

/// Timestamp format WebMUST expects in `from`/`to` query parameters.
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Millisecond variant used by the table-parameter endpoint.
pub(crate) const DATE_FORMAT_MS: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Appends `segments` to the path of `base`, percent-encoding each one.
///
/// Segments that are empty or carry `/`, `?` or `#` are rejected.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    if let Some(bad) = segments
        .iter()
        .find(|s| s.is_empty() || s.contains(['/', '?', '#']))
    {
        return Err(Error::InvalidArgument(format!(
            "invalid name {bad:?} in request path"
        )));
    }
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::InvalidArgument(format!("{base} cannot be used as a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Sets the query of `url` with spaces sent as `%20` instead of `+`.
/// The table-parameter endpoint does not decode `+`.
pub(crate) fn set_query_pct20(url: &mut Url, params: &[(&str, &str)]) {
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", pct20(k), pct20(v)))
        .collect::<Vec<_>>()
        .join("&");
    url.set_query(Some(&query));
}

// form-urlencoding escapes a literal `+` as `%2B`, so every `+` left is a space.
fn pct20(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

pub(crate) fn format_time(t: &DateTime<Utc>) -> String {
    t.format(DATE_FORMAT).to_string()
}

/// Missing bounds default to the last 24 hours, ending now.
pub(crate) fn resolve_window(
    start: Option<DateTime<Utc>>,
    stop: Option<DateTime<Utc>>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    let start = start.unwrap_or_else(|| now - TimeDelta::days(1));
    let stop = stop.unwrap_or(now);
    (start, stop)
}

/// Best-effort parse of the timestamp strings WebMUST puts in tables and
/// metadata. Naive values are taken as UTC.
pub(crate) fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    const FORMATS: [&str; 6] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S%.f",
        "%Y-%jT%H:%M:%S%.f",
    ];
    for f in FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, f) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

pub(crate) fn from_epoch_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

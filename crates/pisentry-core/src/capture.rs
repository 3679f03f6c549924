//! File naming for captured media.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Timestamp format embedded in capture file names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Default prefix placed after the timestamp.
pub const DEFAULT_PREFIX: &str = "security";

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Join the present parts with `-` and append `suffix`.
///
/// ```text
/// ("2018-01-27T00:00:00", Some("foo"), Some("bar"), Some(".jpg")) -> "2018-01-27T00:00:00-foo-bar.jpg"
/// ```
pub fn make_filename(
    timestamp: &str,
    prefix: Option<&str>,
    name: Option<&str>,
    suffix: Option<&str>,
) -> String {
    let parts: Vec<&str> = [Some(timestamp), prefix, name].into_iter().flatten().collect();
    format!("{}{}", parts.join("-"), suffix.unwrap_or(""))
}

/// Path for a capture under `dir`, using the default prefix.
///
/// The prefix is dropped when it equals `name` so it is never repeated.
pub fn image_path(dir: &Path, timestamp: &str, name: Option<&str>, suffix: &str) -> PathBuf {
    let prefix = Some(DEFAULT_PREFIX).filter(|p| Some(*p) != name);
    dir.join(make_filename(timestamp, prefix, name, Some(suffix)))
}

use chrono::DateTime;
use serde_json::Value;

/// Change-log records mark a page deletion with this change type.
pub const DELETION_CHANGE_TYPE: &str = "D";

const HEADING_MARKER: char = '=';
const MIN_HEADING_MARKERS: usize = 2;
const MAX_HEADING_MARKERS: usize = 6;

/// Typed projection of one page's metadata blob. Every field tolerates a
/// missing or malformed source value by going empty instead of failing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    pub creator: Option<String>,
    pub contributors: Vec<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Projects the nested current/persistent blob into a [`PageMeta`].
///
/// The title is only taken from `current.title` when it is a non-empty
/// string; callers fall back to [`title_from_text`] otherwise. The
/// description is only taken from a non-empty `current.description` section.
pub fn parse_page_meta(blob: &Value) -> PageMeta {
    let title = blob
        .pointer("/current/title")
        .and_then(Value::as_str)
        .filter(|title| !title.is_empty())
        .map(str::to_string);

    let description = match blob.pointer("/current/description") {
        Some(Value::Object(section)) if !section.is_empty() => section
            .get("abstract")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    };

    let creator = blob
        .pointer("/persistent/creator")
        .and_then(Value::as_str)
        .map(str::to_string);

    let contributors = match blob.pointer("/persistent/contributor") {
        Some(Value::Object(entries)) => entries
            .values()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let created_at = blob
        .pointer("/persistent/date/created")
        .and_then(epoch_to_iso);
    let updated_at = blob
        .pointer("/persistent/date/modified")
        .and_then(epoch_to_iso);

    PageMeta {
        title,
        description,
        creator,
        contributors,
        created_at,
        updated_at,
    }
}

/// Derives a title from body text: the trimmed inner text of the first line
/// bounded on both ends by 2-6 repeated heading markers.
pub fn title_from_text(text: &str) -> Option<String> {
    for line in text.lines() {
        let trimmed = line.trim();
        let leading = trimmed
            .chars()
            .take_while(|&marker| marker == HEADING_MARKER)
            .count();
        if !(MIN_HEADING_MARKERS..=MAX_HEADING_MARKERS).contains(&leading) {
            continue;
        }
        let trailing = trimmed
            .chars()
            .rev()
            .take_while(|&marker| marker == HEADING_MARKER)
            .count();
        if !(MIN_HEADING_MARKERS..=MAX_HEADING_MARKERS).contains(&trailing) {
            continue;
        }
        if leading + trailing >= trimmed.len() {
            continue;
        }
        let inner = trimmed[leading..trimmed.len() - trailing].trim();
        if inner.is_empty() {
            continue;
        }
        return Some(inner.to_string());
    }
    None
}

/// True iff the last well-formed change-log record marks a deletion. Records
/// are tab-separated with the single-character change type in the third
/// field; lines with fewer fields are ignored.
pub fn deleted_from_changelog(log: &str) -> bool {
    let mut deleted = false;
    for line in log.lines() {
        if let Some(change_type) = line.split('\t').nth(2) {
            deleted = change_type == DELETION_CHANGE_TYPE;
        }
    }
    deleted
}

/// Epoch seconds (integer, float, or numeric string) to an ISO-8601 string.
/// Anything else yields `None`.
fn epoch_to_iso(value: &Value) -> Option<String> {
    let seconds = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    if !seconds.is_finite() {
        return None;
    }
    let timestamp = DateTime::from_timestamp(seconds as i64, 0)?;
    Some(timestamp.format("%Y-%m-%dT%H:%M:%S").to_string())
}

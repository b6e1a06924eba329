//! Flat `key<delimiter>value` config tables
//!
//! One entry per line. Surrounding whitespace is ignored, as are blank
//! lines and lines starting with `#`. A line is split at the first
//! occurrence of the delimiter, so values may contain it. Lines without a
//! delimiter are skipped with a warning rather than failing the whole read.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use tracing::{error, warn};

use crate::error::{CodecError, ErrorCategory, ErrorKind, Result};
use crate::file_ops;

/// Delimiter used when the caller has no preference
pub const DEFAULT_DELIMITER: &str = " ";

/// A parsed table. Serialization order is the map's (sorted) key order.
pub type Table = BTreeMap<String, String>;

const LINE_BREAKS: [char; 2] = ['\n', '\r'];

/// Result of parsing table text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTable {
    pub entries: Table,
    /// 1-based numbers of lines that were skipped for lacking the delimiter
    pub skipped: Vec<usize>,
}

/// Render entries as table text, rendering keys and values with `Display`
///
/// Fails with `InvalidFormat` for a key or value containing a line break,
/// which would read back as extra lines. Other entries that will not
/// read back as the same key and value (a key containing the delimiter, a
/// value with trailing whitespace) are still written, with a warning.
pub fn format_table<I, K, V>(entries: I, delimiter: &str) -> Result<String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Display,
    V: Display,
{
    check_delimiter(delimiter)?;

    let mut text = String::new();
    for (key, value) in entries {
        let key = key.to_string();
        let value = value.to_string();
        if key.contains(LINE_BREAKS) || value.contains(LINE_BREAKS) {
            return Err(CodecError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidFormat,
                format!("entry {:?} contains a line break", key),
            ));
        }

        let line = format!("{key}{delimiter}{value}");
        if !round_trips(&line, &key, &value, delimiter) {
            warn!(key = %key, "entry will not read back unchanged");
        }
        text.push_str(&line);
        text.push('\n');
    }
    Ok(text)
}

/// Parse table text
pub fn parse_table(text: &str, delimiter: &str) -> Result<ParsedTable> {
    check_delimiter(delimiter)?;

    let mut parsed = ParsedTable::default();
    for (index, raw_line) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line.split_once(delimiter) {
            Some((key, value)) => {
                if parsed
                    .entries
                    .insert(key.to_string(), value.to_string())
                    .is_some()
                {
                    warn!(line = line_number, "duplicate key replaces an earlier entry");
                }
            }
            None => {
                warn!(line = line_number, "skipping line without delimiter");
                parsed.skipped.push(line_number);
            }
        }
    }
    Ok(parsed)
}

/// Write entries to a table file at `path`
///
/// With a `key_path`, the table text is encrypted with that key file and
/// the token is written instead. An existing file is overwritten (with a
/// warning).
pub fn write_table<I, K, V>(
    path: &Path,
    entries: I,
    key_path: Option<&Path>,
    delimiter: &str,
) -> Result<()>
where
    I: IntoIterator<Item = (K, V)>,
    K: Display,
    V: Display,
{
    format_table(entries, delimiter)
        .and_then(|text| file_ops::store(path, text.as_bytes(), key_path))
        .inspect_err(|e| error!(path = %path.display(), error = %e, "failed to write table"))
}

/// Read a table file from `path`, decrypting it with `key_path` if given
///
/// An empty file yields an empty table; any failure is an error.
pub fn read_table(path: &Path, key_path: Option<&Path>, delimiter: &str) -> Result<Table> {
    read_table_entries(path, key_path, delimiter)
        .inspect_err(|e| error!(path = %path.display(), error = %e, "failed to read table"))
}

fn read_table_entries(path: &Path, key_path: Option<&Path>, delimiter: &str) -> Result<Table> {
    check_delimiter(delimiter)?;
    let contents = file_ops::load(path, key_path)?;
    let text = String::from_utf8(contents).map_err(|e| {
        CodecError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::InvalidFormat,
            format!("table {} is not valid UTF-8", path.display()),
            e,
        )
    })?;
    Ok(parse_table(&text, delimiter)?.entries)
}

fn round_trips(line: &str, key: &str, value: &str, delimiter: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && !line.starts_with('#') && line.split_once(delimiter) == Some((key, value))
}

fn check_delimiter(delimiter: &str) -> Result<()> {
    if delimiter.is_empty() || delimiter.contains(LINE_BREAKS) {
        return Err(CodecError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidFormat,
            format!("unusable table delimiter {:?}", delimiter),
        ));
    }
    Ok(())
}

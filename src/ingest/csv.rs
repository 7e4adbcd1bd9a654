/// Minimal delimited-text helpers shared by the sample and station loaders.
///
/// The inputs are spreadsheet exports: comma separated, optionally
/// double-quoted, with a single header row. Column names vary between
/// exports, so columns are resolved through alias lists rather than by
/// position.

use crate::model::{AnalysisError, Result};

// ---------------------------------------------------------------------------
// Field splitting
// ---------------------------------------------------------------------------

/// Splits one line into trimmed fields.
///
/// Double-quoted fields may contain commas; `""` inside a quoted field is a
/// literal quote. A leading UTF-8 BOM is dropped.
pub fn parse_csv_line(line: &str) -> Vec<String> {
    let line = line.strip_prefix('\u{feff}').unwrap_or(line);
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.trim().is_empty() => {
                current.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            '\r' if !in_quotes => {}
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Quotes a field for output if it contains a delimiter or quote.
///
/// Readers in this crate are line-based, so embedded line breaks are
/// written as spaces to keep every record on one line.
pub fn quote_field(value: &str) -> String {
    let value = value.replace("\r\n", " ").replace(['\n', '\r'], " ");
    if value.contains([',', '"']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value
    }
}

/// Normalises a header cell for alias matching: lowercase, with spaces,
/// dots and hyphens folded to underscores.
fn normalize_header(name: &str) -> String {
    name.trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '.' || c == '-' { '_' } else { c })
        .collect()
}

// ---------------------------------------------------------------------------
// Header resolution
// ---------------------------------------------------------------------------

/// Parsed header row with alias lookup.
#[derive(Debug, Clone)]
pub struct Header {
    names: Vec<String>,
    table: &'static str,
}

impl Header {
    pub fn parse(line: &str, table: &'static str) -> Self {
        Header {
            names: parse_csv_line(line).iter().map(|n| normalize_header(n)).collect(),
            table,
        }
    }

    /// Index of the first column matching any alias, if present.
    pub fn find(&self, aliases: &[&str]) -> Option<usize> {
        aliases.iter().find_map(|alias| {
            let wanted = normalize_header(alias);
            self.names.iter().position(|n| *n == wanted)
        })
    }

    /// Like `find`, but a missing column is an error. `column` names the
    /// canonical column in the error message.
    pub fn require(&self, column: &'static str, aliases: &[&str]) -> Result<usize> {
        self.find(aliases).ok_or(AnalysisError::MissingColumn {
            table: self.table,
            column,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Returns the trimmed field at `index`, treating blank and `null` cells as
/// absent.
pub fn optional_field(fields: &[String], index: Option<usize>) -> Option<&str> {
    let value = fields.get(index?)?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(value)
    }
}

/// Parses an optional numeric field; unparseable values are treated as
/// missing.
pub fn optional_f64(fields: &[String], index: Option<usize>) -> Option<f64> {
    optional_field(fields, index).and_then(|s| s.trim_end_matches('%').trim().parse().ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

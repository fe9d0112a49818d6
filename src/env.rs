//! Settings file parsing and rendering
//!
//! The settings file is a plain `KEY=value` list shared between the static
//! OAuth client credentials and the current token pair. Reading is
//! permissive: blank lines, `#` comments and lines without `=` are skipped.
//! Writing is deterministic: only uppercase keys, sorted, one per line,
//! terminated by a trailing newline.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Regex pattern for keys that are persisted: uppercase identifiers
static SETTINGS_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("settings key pattern is valid"));

/// Returns true if `key` is eligible to be written back to the settings file.
pub fn is_settings_key(key: &str) -> bool {
    SETTINGS_KEY_PATTERN.is_match(key)
}

/// Parse settings file content into an ordered key/value mapping.
///
/// Keys and values are whitespace-trimmed and only the first `=` separates
/// them, so values may themselves contain `=`.
pub fn parse_settings(content: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();

    for line in content.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        let Some((key, value)) = stripped.split_once('=') else {
            continue;
        };
        entries.insert(key.trim().to_string(), value.trim().to_string());
    }

    entries
}

/// Render a mapping back into settings file content.
pub fn render_settings(entries: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in entries.iter().filter(|(k, _)| is_settings_key(k)) {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    if out.is_empty() {
        out.push('\n');
    }
    out
}

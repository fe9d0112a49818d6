//! Output rendering for command results

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Output format for rendered rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// GitHub-style pipe table
    #[default]
    Plain,
    Csv,
    Json,
    Yaml,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(OutputFormat::Plain),
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            other => Err(Error::InvalidArgument(format!(
                "unknown output format: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Plain => "plain",
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
        };
        f.write_str(name)
    }
}

/// Project rows onto `fields`, in order. Missing fields become empty strings.
pub fn project_fields(rows: &[Value], fields: &[&str]) -> Vec<Map<String, Value>> {
    rows.iter()
        .map(|row| {
            fields
                .iter()
                .map(|field| {
                    let value = row
                        .get(*field)
                        .cloned()
                        .unwrap_or_else(|| Value::String(String::new()));
                    (field.to_string(), value)
                })
                .collect()
        })
        .collect()
}

/// Render rows projected onto `fields` in the requested format.
pub fn render_rows(rows: &[Value], fields: &[&str], format: OutputFormat) -> Result<String> {
    let projected = project_fields(rows, fields);

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&projected)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(&projected)?),
        OutputFormat::Csv => Ok(render_csv(&projected, fields)),
        OutputFormat::Plain => Ok(render_table(&projected, fields)),
    }
}

/// Render an arbitrary value as JSON or YAML; table formats fall back to JSON.
pub fn render_value(value: &Value, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => Ok(serde_yaml::to_string(value)?),
        _ => Ok(serde_json::to_string_pretty(value)?),
    }
}

/// Text shown in a table or CSV cell
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_csv(rows: &[Map<String, Value>], fields: &[&str]) -> String {
    let mut out = String::new();
    push_csv_record(&mut out, fields.iter().map(|f| f.to_string()));
    for row in rows {
        push_csv_record(
            &mut out,
            fields
                .iter()
                .map(|f| row.get(*f).map(cell_text).unwrap_or_default()),
        );
    }
    out
}

fn push_csv_record(out: &mut String, cells: impl Iterator<Item = String>) {
    let record: Vec<String> = cells
        .map(|cell| {
            if cell.contains(&[',', '"', '\n', '\r'][..]) {
                format!("\"{}\"", cell.replace('"', "\"\""))
            } else {
                cell
            }
        })
        .collect();
    out.push_str(&record.join(","));
    out.push_str("\r\n");
}

fn render_table(rows: &[Map<String, Value>], fields: &[&str]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            fields
                .iter()
                .map(|f| {
                    row.get(*f)
                        .map(cell_text)
                        .unwrap_or_default()
                        .replace('\n', " ")
                })
                .collect()
        })
        .collect();

    let widths: Vec<usize> = fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(field.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let format_row = |values: Vec<&str>| -> String {
        let padded: Vec<String> = values
            .iter()
            .zip(&widths)
            .map(|(value, width)| format!(" {:<width$} ", value, width = *width))
            .collect();
        format!("|{}|", padded.join("|"))
    };

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format_row(fields.to_vec()));
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
    lines.push(format!("|{}|", separator.join("|")));
    for row in &cells {
        lines.push(format_row(row.iter().map(String::as_str).collect()));
    }
    lines.join("\n")
}

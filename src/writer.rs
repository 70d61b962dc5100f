use crate::error::{PanelError, PanelResult};
use crate::types::{Column, ColumnData, ResultTable};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

/// Serialize a result table as an ordered YAML mapping `column -> [values]`
pub fn to_yaml(table: &ResultTable) -> PanelResult<String> {
    let mut map = Mapping::new();
    for column in table.columns() {
        map.insert(Value::String(column.name.clone()), yaml_values(&column.data));
    }
    Ok(serde_yaml::to_string(&Value::Mapping(map))?)
}

fn yaml_values(data: &ColumnData) -> Value {
    match data {
        ColumnData::Number(values) => Value::Sequence(
            values
                .iter()
                .map(|v| v.map_or(Value::Null, Value::from))
                .collect(),
        ),
        ColumnData::Text(values) => Value::Sequence(
            values
                .iter()
                .map(|v| v.as_ref().map_or(Value::Null, |s| Value::String(s.clone())))
                .collect(),
        ),
    }
}

/// Serialize a result table as a JSON list of `{name, values}`
pub fn to_json(table: &ResultTable) -> PanelResult<String> {
    let columns: Vec<serde_json::Value> = table
        .columns()
        .map(|column| {
            serde_json::json!({
                "name": column.name,
                "values": json_values(&column.data),
            })
        })
        .collect();
    Ok(serde_json::to_string_pretty(&columns)?)
}

fn json_values(data: &ColumnData) -> serde_json::Value {
    match data {
        ColumnData::Number(values) => values.iter().map(|v| serde_json::json!(v)).collect(),
        ColumnData::Text(values) => values.iter().map(|v| serde_json::json!(v)).collect(),
    }
}

/// Write a result table, format chosen by extension (`.yaml`, `.yml`, `.json`)
pub fn write_result(table: &ResultTable, path: &Path) -> PanelResult<()> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let content = match extension.as_deref() {
        Some("yaml") | Some("yml") => to_yaml(table)?,
        Some("json") => to_json(table)?,
        _ => {
            return Err(PanelError::Config(format!(
                "Unsupported output format '{}': use .yaml, .yml or .json",
                path.display()
            )))
        }
    };
    fs::write(path, content)?;
    Ok(())
}

/// Format a number for display, removing unnecessary decimal places
pub fn format_number(n: f64) -> String {
    let rounded = (n * 1e6).round() / 1e6;
    format!("{:.6}", rounded)
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn cell(column: &Column, row: usize) -> String {
    match &column.data {
        ColumnData::Number(values) => values[row].map_or_else(|| "NA".to_string(), format_number),
        ColumnData::Text(values) => values[row].clone().unwrap_or_else(|| "NA".to_string()),
    }
}

/// Plain-text table of the first `max_rows` rows, columns padded to equal width
pub fn preview(table: &ResultTable, max_rows: usize) -> String {
    let columns: Vec<&Column> = table.columns().collect();
    let shown = table.row_count().min(max_rows);

    let cells: Vec<Vec<String>> = columns
        .iter()
        .map(|c| {
            std::iter::once(c.name.clone())
                .chain((0..shown).map(|row| cell(c, row)))
                .collect()
        })
        .collect();
    let widths: Vec<usize> = cells
        .iter()
        .map(|col| col.iter().map(|s| s.chars().count()).max().unwrap_or(0))
        .collect();

    let mut out = String::new();
    for line in 0..=shown {
        let row: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(col, &w)| format!("{:>w$}", col[line], w = w))
            .collect();
        out.push_str(row.join("  ").trim_end());
        out.push('\n');
    }
    if table.row_count() > shown {
        out.push_str(&format!("... {} more rows\n", table.row_count() - shown));
    }
    out
}

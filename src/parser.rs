use crate::core::EngineConfig;
use crate::error::{PanelError, PanelResult};
use crate::types::{Column, ColumnData, Dataset, Formula};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::path::Path;

/// A loaded job: dataset, key columns, formulas and engine settings
#[derive(Debug, Clone)]
pub struct Job {
    pub dataset: Dataset,
    pub entity_column: String,
    pub time_column: String,
    pub formulas: Vec<Formula>,
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobFile {
    entity_column: String,
    time_column: String,
    #[serde(default)]
    engine: EngineConfig,
    columns: Mapping,
    #[serde(default)]
    formulas: Vec<FormulaSpec>,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum FormulaKind {
    #[default]
    Expression,
    Mean,
    Stdev,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FormulaSpec {
    name: String,
    #[serde(default)]
    kind: FormulaKind,
    expression: Option<String>,
    target: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
}

/// Parse a job file
pub fn parse_job(path: &Path) -> PanelResult<Job> {
    let content = std::fs::read_to_string(path)?;
    parse_job_str(&content)
}

/// Parse job YAML text
pub fn parse_job_str(content: &str) -> PanelResult<Job> {
    let file: JobFile = serde_yaml::from_str(content)?;

    let mut columns = Vec::with_capacity(file.columns.len());
    for (key, value) in &file.columns {
        let name = key
            .as_str()
            .ok_or_else(|| PanelError::Parse("Column name must be a string".to_string()))?;
        let Value::Sequence(seq) = value else {
            return Err(PanelError::Parse(format!(
                "Column '{}' must be a list of values, found {}",
                name,
                type_name(value)
            )));
        };
        columns.push(Column::new(name, parse_column_values(name, seq)?));
    }

    let dataset = Dataset::from_columns(columns)?;
    dataset.validate_keys(&file.entity_column, &file.time_column)?;

    let formulas = file
        .formulas
        .into_iter()
        .enumerate()
        .map(|(i, spec)| build_formula(i, spec))
        .collect::<PanelResult<Vec<_>>>()?;

    Ok(Job {
        dataset,
        entity_column: file.entity_column,
        time_column: file.time_column,
        formulas,
        engine: file.engine,
    })
}

/// All numbers (or null) make a numeric column; anything with text is a text column
fn parse_column_values(name: &str, seq: &[Value]) -> PanelResult<ColumnData> {
    for (i, val) in seq.iter().enumerate() {
        if !matches!(val, Value::Null | Value::Number(_) | Value::String(_)) {
            return Err(PanelError::Parse(format!(
                "Column '{}' row {}: Expected number, text or null, found {}",
                name,
                i,
                type_name(val)
            )));
        }
    }

    if seq.iter().all(|v| matches!(v, Value::Null | Value::Number(_))) {
        let numbers = seq
            .iter()
            .enumerate()
            .map(|(i, val)| match val {
                Value::Number(n) => n
                    .as_f64()
                    .map(|f| Some(f).filter(|f| !f.is_nan()))
                    .ok_or_else(|| {
                        PanelError::Parse(format!(
                            "Column '{}' row {}: Invalid number format",
                            name, i
                        ))
                    }),
                _ => Ok(None),
            })
            .collect::<PanelResult<Vec<_>>>()?;
        return Ok(ColumnData::Number(numbers));
    }

    let texts = seq
        .iter()
        .map(|val| match val {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect();
    Ok(ColumnData::Text(texts))
}

fn build_formula(index: usize, spec: FormulaSpec) -> PanelResult<Formula> {
    let name = spec.name.trim().to_string();
    if name.is_empty() {
        return Err(PanelError::Parse(format!(
            "Formula #{} has an empty name",
            index + 1
        )));
    }

    match spec.kind {
        FormulaKind::Expression => {
            if spec.target.is_some() || !spec.groups.is_empty() {
                return Err(PanelError::Parse(format!(
                    "Formula '{}': 'target' and 'groups' apply to mean/stdev only",
                    name
                )));
            }
            let expression = spec.expression.unwrap_or_default();
            if expression.trim().is_empty() {
                return Err(PanelError::Parse(format!(
                    "Formula '{}' has an empty expression",
                    name
                )));
            }
            Ok(Formula::expression(name, expression.trim()))
        }
        FormulaKind::Mean | FormulaKind::Stdev => {
            if spec.expression.is_some() {
                return Err(PanelError::Parse(format!(
                    "Formula '{}': 'expression' does not apply to {} formulas",
                    name,
                    if spec.kind == FormulaKind::Mean { "mean" } else { "stdev" }
                )));
            }
            let target = spec.target.unwrap_or_default();
            if target.trim().is_empty() {
                return Err(PanelError::Parse(format!(
                    "Formula '{}' needs a 'target' column",
                    name
                )));
            }
            let groups: Vec<&str> = spec.groups.iter().map(String::as_str).collect();
            Ok(match spec.kind {
                FormulaKind::Mean => Formula::mean(name, target.trim(), &groups),
                _ => Formula::stdev(name, target.trim(), &groups),
            })
        }
    }
}

fn type_name(val: &Value) -> &'static str {
    match val {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "text",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

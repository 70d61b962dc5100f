//! General expression evaluator
//!
//! Evaluates an arithmetic/boolean expression over whole columns (current row
//! only, no offsets), split into contiguous row chunks. Arithmetic follows IEEE
//! semantics; infinities and NaN are left for the sanitizer.
//!
//! Legacy lag notation is accepted as sugar: `Name_lagK` and `Name{K}` refer to
//! `Name` shifted back K rows within each entity. Each distinct `(Name, K)` is
//! materialized once per formula before evaluation.

use super::context::{EntityGroup, EvalContext};
use super::expression::{evaluate, parse_expression_with, Bindings, EvalError, EvalMode, Value};
use super::scheduler::{reassemble, Partial, Scheduler};
use crate::error::FormulaFailure;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, info};

fn lag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\w+?)(?:_lag(\d+)\b|\{(\d+)\})").expect("lag pattern is valid")
    })
}

/// A shifted copy requested by lag notation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagSpec {
    pub base: String,
    pub lag: usize,
}

impl LagSpec {
    /// Column name the expression refers to after rewriting
    pub fn column_name(&self) -> String {
        format!("{}_lag{}", self.base, self.lag)
    }
}

/// Rewrite `Name{K}` to `Name_lagK` and list the distinct lags used.
/// Lags naming an existing column (`exists`) are left to that column.
pub fn expand_lag_notation(
    expression: &str,
    exists: impl Fn(&str) -> bool,
) -> Result<(String, Vec<LagSpec>), String> {
    let mut specs: Vec<LagSpec> = Vec::new();
    let mut error = None;

    let rewritten = lag_pattern().replace_all(expression, |caps: &Captures<'_>| {
        let base = caps[1].to_string();
        let digits = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        let lag = match digits.parse::<usize>() {
            Ok(lag) => lag,
            Err(_) => {
                error.get_or_insert_with(|| format!("Invalid lag '{}'", &caps[0]));
                return caps[0].to_string();
            }
        };
        let spec = LagSpec { base, lag };
        let name = spec.column_name();
        if !exists(&name) && !specs.contains(&spec) {
            specs.push(spec);
        }
        name
    });

    match error {
        Some(msg) => Err(msg),
        None => Ok((rewritten.into_owned(), specs)),
    }
}

/// `values` shifted back `lag` positions inside each entity
pub fn shift_within_entities(
    values: &[Option<f64>],
    entities: &[EntityGroup],
    lag: usize,
) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    for entity in entities {
        for (pos, &row) in entity.rows.iter().enumerate().skip(lag) {
            out[row] = values[entity.rows[pos - lag]];
        }
    }
    out
}

/// Current-row lookups into resolved columns
struct ColumnBindings<'c> {
    columns: &'c [(String, &'c [Option<f64>])],
    row: usize,
}

impl Bindings for ColumnBindings<'_> {
    fn column(&self, name: &str) -> Result<Value, EvalError> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| Value::from_option(values[self.row]))
            .ok_or_else(|| EvalError::Structural(format!("Unknown column: {}", name)))
    }

    fn offset(&self, column: &str, _offset: i64) -> Result<Value, EvalError> {
        Err(EvalError::Structural(format!(
            "Offset reference {}(x...) is not allowed in a general expression",
            column
        )))
    }
}

/// Compute a general expression over the whole context
pub fn compute(
    ctx: &EvalContext<'_>,
    scheduler: &Scheduler,
    formula: &str,
    expression: &str,
) -> Result<Vec<Option<f64>>, FormulaFailure> {
    let fail = |msg: String| FormulaFailure::new(formula, msg);

    let (rewritten, lags) = expand_lag_notation(expression, |name| ctx.contains(name)).map_err(fail)?;

    let mut lag_columns: HashMap<String, Vec<Option<f64>>> = HashMap::new();
    for spec in &lags {
        let base = ctx.require_numeric(&spec.base).map_err(fail)?;
        debug!("[{}] Materializing {}", formula, spec.column_name());
        lag_columns.insert(
            spec.column_name(),
            shift_within_entities(base, ctx.entities, spec.lag),
        );
    }

    let visible = |name: &str| ctx.contains(name) || lag_columns.contains_key(name);
    let expr = parse_expression_with(&rewritten, &visible)
        .map_err(|e| fail(format!("Malformed expression: {}", e)))?;
    if let Some((column, _)) = expr.offsets().first() {
        return Err(fail(format!(
            "Offset reference {}(x...) is not allowed in a general expression",
            column
        )));
    }

    let mut columns: Vec<(String, &[Option<f64>])> = Vec::new();
    for name in expr.references() {
        let values = match lag_columns.get(&name) {
            Some(values) => values.as_slice(),
            None => ctx.require_numeric(&name).map_err(fail)?,
        };
        columns.push((name, values));
    }

    let rows = ctx.row_count();
    let chunks = scheduler.row_chunks(rows);
    info!(
        "[{}] Evaluating expression over {} rows in {} chunk(s)",
        formula,
        rows,
        chunks.len()
    );

    let (expr, columns) = (&expr, columns.as_slice());
    let results = scheduler.run(chunks, |range| -> Result<Partial, FormulaFailure> {
        let mut values = Vec::with_capacity(range.len());
        for row in range.clone() {
            let bindings = ColumnBindings { columns, row };
            let result = evaluate(expr, &bindings, EvalMode::Ieee).map(|value| value.as_number());
            values.push(ctx.contain(formula, row, result)?);
        }
        Ok(Partial::new(range.collect(), values))
    });

    let partials = results.into_iter().collect::<Result<Vec<_>, _>>()?;
    Ok(reassemble(rows, partials))
}

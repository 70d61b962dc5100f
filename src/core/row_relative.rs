//! Row-relative evaluator for `Column(x)`, `Column(x+N)`, `Column(x-N)` formulas
//!
//! `x` is the row's position inside its entity's row sequence, in existing
//! dataset order. For each row, every distinct `(column, offset)` is resolved
//! first: an out-of-range position or a missing cell makes the row missing
//! without evaluating anything. The resolved values are bound to numbered
//! slots and the expression is evaluated in checked mode, so a math-domain
//! violation only affects its own row.

use super::context::EvalContext;
use super::expression::{evaluate, parse_expression_with, Bindings, EvalError, EvalMode, Expr, Value};
use super::scheduler::{reassemble, Partial, Scheduler};
use crate::error::FormulaFailure;
use std::ops::Range;
use tracing::info;

/// A parsed row-relative formula with its offset columns resolved
struct RowProgram<'a> {
    expr: Expr,
    /// Distinct (column, offset) pairs; index = slot number
    offsets: Vec<(String, i64)>,
    /// Column values for each slot
    columns: Vec<&'a [Option<f64>]>,
}

/// Slot values of one row
struct SlotBindings<'p> {
    offsets: &'p [(String, i64)],
    slots: &'p [f64],
}

impl Bindings for SlotBindings<'_> {
    fn column(&self, name: &str) -> Result<Value, EvalError> {
        Err(EvalError::Structural(format!(
            "Column '{}' is referenced without an offset; write {}(x)",
            name, name
        )))
    }

    fn offset(&self, column: &str, offset: i64) -> Result<Value, EvalError> {
        self.offsets
            .iter()
            .position(|(c, o)| c == column && *o == offset)
            .map(|slot| Value::Number(self.slots[slot]))
            .ok_or_else(|| {
                EvalError::Structural(format!("Unbound reference {}(x{:+})", column, offset))
            })
    }
}

/// One unit of work: positions `range` of the entity whose rows are `rows`
struct Task<'a> {
    rows: &'a [usize],
    range: Range<usize>,
}

fn compile<'a>(
    ctx: &EvalContext<'a>,
    formula: &str,
    expression: &str,
) -> Result<RowProgram<'a>, FormulaFailure> {
    let expr = parse_expression_with(expression, &|name| ctx.contains(name))
        .map_err(|e| FormulaFailure::new(formula, format!("Malformed expression: {}", e)))?;

    if let Some(bare) = expr.references().first() {
        return Err(FormulaFailure::new(
            formula,
            format!(
                "Column '{}' is referenced without an offset; write {}(x) for the current row",
                bare, bare
            ),
        ));
    }

    let offsets = expr.offsets();
    let columns = offsets
        .iter()
        .map(|(column, _)| ctx.require_numeric(column))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|msg| FormulaFailure::new(formula, msg))?;

    Ok(RowProgram {
        expr,
        offsets,
        columns,
    })
}

/// Evaluate one row at local position `pos` of an entity.
/// `Ok(None)` covers every row-local condition; `Err` is structural.
fn evaluate_row(
    program: &RowProgram<'_>,
    rows: &[usize],
    pos: usize,
    slots: &mut Vec<f64>,
) -> Result<Option<f64>, EvalError> {
    slots.clear();
    for ((_, offset), values) in program.offsets.iter().zip(&program.columns) {
        let target = pos as i64 + offset;
        if target < 0 || target >= rows.len() as i64 {
            return Ok(None);
        }
        match values[rows[target as usize]] {
            Some(v) => slots.push(v),
            None => return Ok(None),
        }
    }

    let bindings = SlotBindings {
        offsets: &program.offsets,
        slots: slots.as_slice(),
    };
    // Non-finite results from plain arithmetic are missing too
    evaluate(&program.expr, &bindings, EvalMode::Checked)
        .map(|value| value.as_number().filter(|n| n.is_finite()))
}

/// Compute a row-relative formula over the whole context
pub fn compute(
    ctx: &EvalContext<'_>,
    scheduler: &Scheduler,
    formula: &str,
    expression: &str,
) -> Result<Vec<Option<f64>>, FormulaFailure> {
    let program = compile(ctx, formula, expression)?;

    // Several entities: one task each. A single entity: contiguous chunks of it.
    let tasks: Vec<Task<'_>> = if ctx.entities.len() > 1 {
        info!(
            "[{}] Row-relative formula over {} entities",
            formula,
            ctx.entities.len()
        );
        ctx.entities
            .iter()
            .map(|e| Task {
                rows: &e.rows,
                range: 0..e.rows.len(),
            })
            .collect()
    } else {
        info!("[{}] Row-relative formula over a single entity", formula);
        ctx.entities
            .iter()
            .flat_map(|e| {
                scheduler
                    .row_chunks(e.rows.len())
                    .into_iter()
                    .map(move |range| Task {
                        rows: &e.rows,
                        range,
                    })
            })
            .collect()
    };

    let program = &program;
    let results = scheduler.run(tasks, |task: Task<'_>| -> Result<Partial, FormulaFailure> {
        let mut slots = Vec::with_capacity(program.offsets.len());
        let mut positions = Vec::with_capacity(task.range.len());
        let mut values = Vec::with_capacity(task.range.len());
        for pos in task.range {
            let row = task.rows[pos];
            let result = evaluate_row(program, task.rows, pos, &mut slots);
            positions.push(row);
            values.push(ctx.contain(formula, row, result)?);
        }
        Ok(Partial::new(positions, values))
    });

    let partials = results.into_iter().collect::<Result<Vec<_>, _>>()?;
    Ok(reassemble(ctx.row_count(), partials))
}

//! Variable computation pipeline
//!
//! Formulas run strictly in declaration order. Each one sees the base dataset plus
//! every sanitized column computed before it; a structural failure in any formula
//! fails the whole run and no partial table is returned.

use super::aggregate::{grouped, Statistic};
use super::context::{entity_groups, EvalContext};
use super::expression::parse_expression_with;
use super::sanitize::sanitize;
use super::scheduler::{EngineConfig, Scheduler};
use super::{row_relative, vectorized};
use crate::error::{formula_error, FormulaFailure, PanelError, PanelResult};
use crate::types::{Column, Dataset, Formula, ResultTable};
use std::collections::HashMap;
use tracing::info;

/// One formula as seen by the plan pass
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub name: String,
    pub kind: &'static str,
    /// Columns read, in order of first use (lag sugar resolved to its base column)
    pub references: Vec<String>,
}

/// How a referenced column is used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Usage {
    Arithmetic,
    GroupKey,
}

/// Columns a formula reads, without touching any data
fn formula_references(
    formula: &Formula,
    exists: impl Fn(&str) -> bool,
) -> Result<Vec<(String, Usage)>, String> {
    let mut refs: Vec<(String, Usage)> = Vec::new();
    let mut push = |name: String, usage: Usage| {
        if !refs.iter().any(|(n, _)| *n == name) {
            refs.push((name, usage));
        }
    };

    match formula {
        Formula::Eval { expression, .. } => {
            let (rewritten, lags) = vectorized::expand_lag_notation(expression, &exists)?;
            let visible = |n: &str| exists(n) || lags.iter().any(|lag| lag.column_name() == n);
            let expr = parse_expression_with(&rewritten, &visible)
                .map_err(|e| format!("Malformed expression: {}", e))?;
            if let Some((column, _)) = expr.offsets().first() {
                return Err(format!(
                    "Offset reference {}(x...) is not allowed in a general expression",
                    column
                ));
            }
            for name in expr.references() {
                match lags.iter().find(|lag| lag.column_name() == name) {
                    Some(lag) => push(lag.base.clone(), Usage::Arithmetic),
                    None => push(name, Usage::Arithmetic),
                }
            }
        }
        Formula::Row { expression, .. } => {
            let expr = parse_expression_with(expression, &exists)
                .map_err(|e| format!("Malformed expression: {}", e))?;
            if let Some(bare) = expr.references().first() {
                return Err(format!(
                    "Column '{}' is referenced without an offset; write {}(x) for the current row",
                    bare, bare
                ));
            }
            for (column, _) in expr.offsets() {
                push(column, Usage::Arithmetic);
            }
        }
        Formula::Mean { target, groups, .. } | Formula::Stdev { target, groups, .. } => {
            push(target.clone(), Usage::Arithmetic);
            for group in groups {
                push(group.clone(), Usage::GroupKey);
            }
        }
    }

    Ok(refs)
}

/// Computes an ordered formula list over a dataset
pub struct VariableCalculator<'a> {
    dataset: &'a Dataset,
    entity_column: String,
    time_column: String,
    scheduler: Scheduler,
}

impl<'a> VariableCalculator<'a> {
    pub fn new(
        dataset: &'a Dataset,
        entity_column: impl Into<String>,
        time_column: impl Into<String>,
        config: &EngineConfig,
    ) -> PanelResult<Self> {
        let entity_column = entity_column.into();
        let time_column = time_column.into();
        dataset.validate_keys(&entity_column, &time_column)?;
        Ok(Self {
            dataset,
            entity_column,
            time_column,
            scheduler: Scheduler::new(config),
        })
    }

    /// Classify every formula and check that each reference resolves to a base
    /// column or an earlier formula
    pub fn plan(&self, formulas: &[Formula]) -> PanelResult<Vec<PlanStep>> {
        // name -> usable in arithmetic
        let mut known: HashMap<&str, bool> = self
            .dataset
            .columns()
            .iter()
            .map(|c| (c.name.as_str(), c.data.as_numbers().is_some()))
            .collect();

        let mut steps = Vec::with_capacity(formulas.len());
        for formula in formulas {
            let name = formula.name();
            if name == self.entity_column || name == self.time_column {
                return Err(formula_error(
                    name,
                    format!(
                        "'{}' is the {} column and cannot be redefined",
                        name,
                        if name == self.entity_column { "entity" } else { "time" }
                    ),
                ));
            }

            let formula = formula.resolve_columns(&|n| known.contains_key(n));
            let refs = formula_references(&formula, |n| known.contains_key(n))
                .map_err(|msg| formula_error(name, msg))?;
            for (column, usage) in &refs {
                match known.get(column.as_str()).copied() {
                    None if column == name => {
                        return Err(formula_error(
                            name,
                            format!("'{}' refers to its own output", column),
                        ));
                    }
                    None => {
                        return Err(formula_error(
                            name,
                            format!(
                                "Column '{}' not found in dataset or earlier formulas",
                                column
                            ),
                        ));
                    }
                    Some(false) if *usage == Usage::Arithmetic => {
                        return Err(formula_error(
                            name,
                            format!("Column '{}' holds text and cannot be used in arithmetic", column),
                        ));
                    }
                    Some(_) => {}
                }
            }

            known.insert(name, true);
            steps.push(PlanStep {
                name: name.to_string(),
                kind: formula.kind(),
                references: refs.into_iter().map(|(n, _)| n).collect(),
            });
        }
        Ok(steps)
    }

    /// Compute every formula, reporting `(completed, total, name)` after each one
    pub fn calculate(
        &self,
        formulas: &[Formula],
        progress: &mut dyn FnMut(usize, usize, &str),
    ) -> PanelResult<ResultTable> {
        self.plan(formulas)?;

        let entities = entity_groups(self.dataset, &self.entity_column);
        info!(
            "Computing {} formulas over {} rows, {} entities, {} workers",
            formulas.len(),
            self.dataset.row_count(),
            entities.len(),
            self.scheduler.worker_count()
        );

        let mut table = ResultTable::new(
            self.key_column(&self.entity_column)?,
            self.key_column(&self.time_column)?,
        );
        let mut computed: HashMap<String, Vec<Option<f64>>> = HashMap::new();
        let total = formulas.len();

        for (i, formula) in formulas.iter().enumerate() {
            let ctx = EvalContext {
                dataset: self.dataset,
                computed: &computed,
                entities: &entities,
                entity_column: &self.entity_column,
                time_column: &self.time_column,
            };
            let resolved = formula.resolve_columns(&|n| ctx.contains(n));
            let values = sanitize(self.compute_formula(&ctx, &resolved)?);

            let name = formula.name();
            table.set_variable(name, values.clone());
            computed.insert(name.to_string(), values);
            progress(i + 1, total, name);
        }

        Ok(table)
    }

    /// `calculate` without progress reporting
    pub fn calculate_all(&self, formulas: &[Formula]) -> PanelResult<ResultTable> {
        self.calculate(formulas, &mut |_, _, _| {})
    }

    fn compute_formula(
        &self,
        ctx: &EvalContext<'_>,
        formula: &Formula,
    ) -> Result<Vec<Option<f64>>, FormulaFailure> {
        match formula {
            Formula::Eval { name, expression } => {
                vectorized::compute(ctx, &self.scheduler, name, expression)
            }
            Formula::Row { name, expression } => {
                row_relative::compute(ctx, &self.scheduler, name, expression)
            }
            Formula::Mean {
                name,
                target,
                groups,
            } => grouped(ctx, name, Statistic::Mean, target, groups),
            Formula::Stdev {
                name,
                target,
                groups,
            } => grouped(ctx, name, Statistic::Stdev, target, groups),
        }
    }

    fn key_column(&self, name: &str) -> PanelResult<Column> {
        self.dataset
            .column(name)
            .cloned()
            .ok_or_else(|| PanelError::Dataset(format!("Column '{}' not found", name)))
    }
}

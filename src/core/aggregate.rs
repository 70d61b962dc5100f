//! Grouped aggregation: mean and sample standard deviation broadcast per group

use super::context::EvalContext;
use crate::error::FormulaFailure;
use crate::types::CellKey;
use std::collections::HashMap;
use tracing::{info, warn};

/// Which statistic to broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Mean,
    /// Sample standard deviation (denominator n - 1)
    Stdev,
}

impl Statistic {
    fn name(self) -> &'static str {
        match self {
            Statistic::Mean => "mean",
            Statistic::Stdev => "stdev",
        }
    }

    /// Compute over the non-missing values; `None` when undefined
    pub fn compute(self, values: &[f64]) -> Option<f64> {
        match self {
            Statistic::Mean => mean(values),
            Statistic::Stdev => sample_stdev(values),
        }
    }
}

/// Arithmetic mean; `None` for no values
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation; `None` for fewer than two values
pub fn sample_stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Partition rows by the tuple of group-key values, groups in order of first appearance.
/// Missing keys are ordinary key values, so no row is dropped. No group columns: one group.
fn partition(
    ctx: &EvalContext<'_>,
    groups: &[String],
    formula: &str,
) -> Result<Vec<Vec<usize>>, FormulaFailure> {
    let rows = ctx.row_count();
    if groups.is_empty() {
        return Ok(if rows == 0 { Vec::new() } else { vec![(0..rows).collect()] });
    }

    let key_columns = groups
        .iter()
        .map(|g| ctx.key_column(g))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|msg| FormulaFailure::new(formula, msg))?;

    let mut index: HashMap<Vec<CellKey>, usize> = HashMap::new();
    let mut partitions: Vec<Vec<usize>> = Vec::new();
    for row in 0..rows {
        let key: Vec<CellKey> = key_columns.iter().map(|c| c.key(row)).collect();
        match index.get(&key) {
            Some(&p) => partitions[p].push(row),
            None => {
                index.insert(key, partitions.len());
                partitions.push(vec![row]);
            }
        }
    }
    Ok(partitions)
}

/// Compute `statistic(target)` within each group and broadcast it to the group's rows
pub fn grouped(
    ctx: &EvalContext<'_>,
    formula: &str,
    statistic: Statistic,
    target: &str,
    groups: &[String],
) -> Result<Vec<Option<f64>>, FormulaFailure> {
    if groups.is_empty() {
        info!("[{}] Computing ungrouped {}({})", formula, statistic.name(), target);
    } else {
        info!(
            "[{}] Computing {}({}) grouped by {:?}",
            formula,
            statistic.name(),
            target,
            groups
        );
    }

    let values = ctx
        .require_numeric(target)
        .map_err(|msg| FormulaFailure::new(formula, msg))?;
    let partitions = partition(ctx, groups, formula)?;

    let mut out = vec![None; ctx.row_count()];
    let mut undefined = 0usize;
    for rows in &partitions {
        let present: Vec<f64> = rows.iter().filter_map(|&r| values[r]).collect();
        let result = statistic.compute(&present);
        if result.is_none() {
            undefined += 1;
        }
        for &r in rows {
            out[r] = result;
        }
    }

    if undefined > 0 {
        warn!(
            "[{}] {} of {} groups have too few values for {}; their rows are missing",
            formula,
            undefined,
            partitions.len(),
            statistic.name()
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[100.0, 110.0]), Some(105.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_sample_stdev() {
        let sd = sample_stdev(&[100.0, 110.0, 50.0, 55.0]).unwrap();
        assert!((sd - 30.652_623_596_249_2).abs() < 1e-9);
        assert_eq!(sample_stdev(&[1.0]), None);
        assert_eq!(sample_stdev(&[]), None);
        assert_eq!(sample_stdev(&[3.0, 3.0]), Some(0.0));
    }
}

//! Evaluation context: base columns plus everything computed earlier in the run

use super::expression::EvalError;
use crate::error::{FormulaFailure, RowContext};
use crate::types::{CellKey, ColumnData, Dataset};
use std::collections::HashMap;
use tracing::debug;

/// Rows of one entity, in existing dataset order
#[derive(Debug, Clone, PartialEq)]
pub struct EntityGroup {
    pub key: CellKey,
    pub rows: Vec<usize>,
}

/// Partition row indices by the entity column, entities in order of first appearance.
/// Rows with a missing id form one entity of their own.
pub fn entity_groups(dataset: &Dataset, entity_column: &str) -> Vec<EntityGroup> {
    let Some(column) = dataset.column(entity_column) else {
        return Vec::new();
    };

    let mut index: HashMap<CellKey, usize> = HashMap::new();
    let mut groups: Vec<EntityGroup> = Vec::new();
    for row in 0..column.len() {
        let key = column.data.key(row);
        match index.get(&key) {
            Some(&g) => groups[g].rows.push(row),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(EntityGroup {
                    key,
                    rows: vec![row],
                });
            }
        }
    }
    groups
}

/// A column usable as a grouping key
#[derive(Debug, Clone, Copy)]
pub enum KeyColumn<'a> {
    Data(&'a ColumnData),
    Computed(&'a [Option<f64>]),
}

impl KeyColumn<'_> {
    pub fn key(&self, row: usize) -> CellKey {
        match self {
            KeyColumn::Data(data) => data.key(row),
            KeyColumn::Computed(values) => match values.get(row).copied().flatten() {
                Some(n) => CellKey::number(n),
                None => CellKey::Missing,
            },
        }
    }
}

/// Read-only view handed to every evaluator for one formula
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub dataset: &'a Dataset,
    pub computed: &'a HashMap<String, Vec<Option<f64>>>,
    pub entities: &'a [EntityGroup],
    pub entity_column: &'a str,
    pub time_column: &'a str,
}

impl<'a> EvalContext<'a> {
    pub fn row_count(&self) -> usize {
        self.dataset.row_count()
    }

    /// True if `name` is a base column or an earlier formula's output
    pub fn contains(&self, name: &str) -> bool {
        self.computed.contains_key(name) || self.dataset.contains(name)
    }

    /// Numeric column by name; computed outputs shadow base columns.
    /// `Ok(None)` when absent, `Err` when the column holds text.
    pub fn numeric(&self, name: &str) -> Result<Option<&'a [Option<f64>]>, String> {
        if let Some(values) = self.computed.get(name) {
            return Ok(Some(values.as_slice()));
        }
        match self.dataset.column(name) {
            None => Ok(None),
            Some(column) => column.data.as_numbers().map(Some).ok_or_else(|| {
                format!(
                    "Column '{}' holds {} values and cannot be used in arithmetic",
                    name,
                    column.data.type_name()
                )
            }),
        }
    }

    /// Numeric column that must exist
    pub fn require_numeric(&self, name: &str) -> Result<&'a [Option<f64>], String> {
        self.numeric(name)?
            .ok_or_else(|| self.unknown_column_message(name))
    }

    /// Column usable as a group key (any type)
    pub fn key_column(&self, name: &str) -> Result<KeyColumn<'a>, String> {
        if let Some(values) = self.computed.get(name) {
            return Ok(KeyColumn::Computed(values.as_slice()));
        }
        self.dataset
            .column(name)
            .map(|c| KeyColumn::Data(&c.data))
            .ok_or_else(|| self.unknown_column_message(name))
    }

    pub fn unknown_column_message(&self, name: &str) -> String {
        let mut available: Vec<&str> = self.dataset.column_names();
        available.extend(self.computed.keys().map(String::as_str));
        format!(
            "Column '{}' not found in dataset or earlier formulas. Available: {}",
            name,
            available.join(", ")
        )
    }

    /// Entity id and time of a row, for diagnostics
    pub fn row_context(&self, row: usize) -> RowContext {
        let display = |name: &str| {
            self.dataset
                .column(name)
                .map(|c| c.data.display(row))
                .unwrap_or_default()
        };
        RowContext {
            row,
            entity: display(self.entity_column),
            time: display(self.time_column),
        }
    }

    /// Settle one row's evaluation result. A math error makes the row missing;
    /// a structural error (a binding the compile step did not resolve) fails the
    /// formula at this row.
    pub fn contain(
        &self,
        formula: &str,
        row: usize,
        result: Result<Option<f64>, EvalError>,
    ) -> Result<Option<f64>, FormulaFailure> {
        match result {
            Ok(value) => Ok(value),
            Err(EvalError::Undefined(op)) => {
                debug!(
                    "[{}] Math error at {}: {} -> missing",
                    formula,
                    self.row_context(row),
                    op
                );
                Ok(None)
            }
            Err(EvalError::Structural(msg)) => {
                Err(FormulaFailure::new(formula, msg).at_row(self.row_context(row)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expression::UndefinedOperation;
    use crate::types::Column;

    fn dataset() -> Dataset {
        Dataset::from_columns(vec![
            Column::text(
                "Firm",
                vec![
                    Some("B".to_string()),
                    Some("A".to_string()),
                    Some("B".to_string()),
                    None,
                ],
            ),
            Column::numbers("Year", vec![Some(2020.0), Some(2020.0), Some(2021.0), None]),
            Column::numbers("Revenue", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]),
        ])
        .unwrap()
    }

    #[test]
    fn test_entity_groups_first_appearance_order() {
        let groups = entity_groups(&dataset(), "Firm");
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].key, CellKey::Text("B".to_string()));
        assert_eq!(groups[0].rows, vec![0, 2]);
        assert_eq!(groups[1].rows, vec![1]);
        assert_eq!(groups[2].key, CellKey::Missing);
    }

    #[test]
    fn test_computed_shadows_base_column() {
        let ds = dataset();
        let mut computed = HashMap::new();
        computed.insert("Revenue".to_string(), vec![None, None, None, Some(9.0)]);
        let entities = entity_groups(&ds, "Firm");
        let ctx = EvalContext {
            dataset: &ds,
            computed: &computed,
            entities: &entities,
            entity_column: "Firm",
            time_column: "Year",
        };
        assert_eq!(ctx.require_numeric("Revenue").unwrap()[3], Some(9.0));
        assert!(ctx.numeric("Firm").is_err());
        assert!(ctx.require_numeric("Cost").is_err());
        assert_eq!(ctx.row_context(1).entity, "A");
    }

    #[test]
    fn test_contain_row_results() {
        let ds = dataset();
        let computed = HashMap::new();
        let entities = entity_groups(&ds, "Firm");
        let ctx = EvalContext {
            dataset: &ds,
            computed: &computed,
            entities: &entities,
            entity_column: "Firm",
            time_column: "Year",
        };

        assert_eq!(ctx.contain("f", 0, Ok(Some(1.5))).unwrap(), Some(1.5));
        let undefined = EvalError::Undefined(UndefinedOperation::new("log(0)"));
        assert_eq!(ctx.contain("f", 0, Err(undefined)).unwrap(), None);

        let unbound = EvalError::Structural("Unbound reference v(x-1)".to_string());
        let failure = ctx.contain("f", 2, Err(unbound)).unwrap_err();
        assert_eq!(failure.formula, "f");
        assert_eq!(
            failure.row,
            Some(RowContext {
                row: 2,
                entity: "B".to_string(),
                time: "2021".to_string(),
            })
        );
    }
}

use crate::core::expression::{is_row_relative, is_row_relative_with};
use crate::error::{PanelError, PanelResult};
use std::borrow::Cow;
use std::collections::HashMap;

//==============================================================================
// Tabular Dataset
//==============================================================================

/// Column value types (homogeneous arrays, `None` = missing)
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Array of numbers
    Number(Vec<Option<f64>>),
    /// Array of text values (ids, codes, dates kept as text)
    Text(Vec<Option<String>>),
}

impl ColumnData {
    /// Get the length of the array
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Number(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    /// Check if array is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnData::Number(_) => "Number",
            ColumnData::Text(_) => "Text",
        }
    }

    /// Numeric view of the column, `None` for text columns
    pub fn as_numbers(&self) -> Option<&[Option<f64>]> {
        match self {
            ColumnData::Number(v) => Some(v),
            ColumnData::Text(_) => None,
        }
    }

    /// Grouping key of one cell
    pub fn key(&self, row: usize) -> CellKey {
        match self {
            ColumnData::Number(v) => match v.get(row).copied().flatten() {
                Some(n) => CellKey::number(n),
                None => CellKey::Missing,
            },
            ColumnData::Text(v) => match v.get(row).cloned().flatten() {
                Some(s) => CellKey::Text(s),
                None => CellKey::Missing,
            },
        }
    }

    /// Human-readable rendering of one cell, used in diagnostics
    pub fn display(&self, row: usize) -> String {
        self.key(row).to_string()
    }
}

/// Hashable identity of a cell, used for entity and group partitioning.
/// Missing is a key of its own so rows are never dropped from a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellKey {
    Number(u64),
    Text(String),
    Missing,
}

impl CellKey {
    pub fn number(n: f64) -> Self {
        if n.is_nan() {
            return CellKey::Missing;
        }
        // -0.0 and 0.0 belong to the same group
        let n = if n == 0.0 { 0.0 } else { n };
        CellKey::Number(n.to_bits())
    }
}

impl std::fmt::Display for CellKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellKey::Number(bits) => write!(f, "{}", f64::from_bits(*bits)),
            CellKey::Text(s) => write!(f, "{}", s),
            CellKey::Missing => write!(f, "<missing>"),
        }
    }
}

/// A named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn numbers(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self::new(name, ColumnData::Number(values))
    }

    pub fn text(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self::new(name, ColumnData::Text(values))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// In-memory columnar table. Column order is kept for display.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dataset, rejecting duplicate names and ragged columns
    pub fn from_columns(columns: Vec<Column>) -> PanelResult<Self> {
        let mut dataset = Self::new();
        for column in columns {
            dataset.add_column(column)?;
        }
        Ok(dataset)
    }

    /// Append a column. A NaN cell is stored as missing.
    pub fn add_column(&mut self, mut column: Column) -> PanelResult<()> {
        if let ColumnData::Number(values) = &mut column.data {
            for value in values.iter_mut().filter(|v| v.is_some_and(f64::is_nan)) {
                *value = None;
            }
        }
        if self.index.contains_key(&column.name) {
            return Err(PanelError::Dataset(format!(
                "Duplicate column '{}'",
                column.name
            )));
        }
        if let Some(first) = self.columns.first() {
            if column.len() != first.len() {
                return Err(PanelError::Dataset(format!(
                    "Column '{}' has {} rows, expected {} rows",
                    column.name,
                    column.len(),
                    first.len()
                )));
            }
        }
        self.index.insert(column.name.clone(), self.columns.len());
        self.columns.push(column);
        Ok(())
    }

    /// Get the number of rows (all columns share it)
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |col| col.len())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Check the designated entity and time columns
    pub fn validate_keys(&self, entity_column: &str, time_column: &str) -> PanelResult<()> {
        if entity_column == time_column {
            return Err(PanelError::Dataset(format!(
                "Entity and time column must differ (both '{}')",
                entity_column
            )));
        }
        for name in [entity_column, time_column] {
            if !self.contains(name) {
                return Err(PanelError::Dataset(format!(
                    "Column '{}' not found. Available: {}",
                    name,
                    self.column_names().join(", ")
                )));
            }
        }
        Ok(())
    }
}

//==============================================================================
// Formulas
//==============================================================================

/// A user-defined derived variable. The kind is fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    /// Arithmetic/boolean expression, vectorized over all rows
    Eval { name: String, expression: String },
    /// Expression with `Column(x+N)` references, evaluated per row within each entity
    Row { name: String, expression: String },
    /// Grouped mean broadcast to every row of its group
    Mean {
        name: String,
        target: String,
        groups: Vec<String>,
    },
    /// Grouped (or whole-column when `groups` is empty) sample standard deviation
    Stdev {
        name: String,
        target: String,
        groups: Vec<String>,
    },
}

impl Formula {
    /// Classify an expression: row-relative if it holds an offset token, general otherwise
    pub fn expression(name: impl Into<String>, expression: impl Into<String>) -> Self {
        let name = name.into();
        let expression = expression.into();
        if is_row_relative(&expression) {
            Formula::Row { name, expression }
        } else {
            Formula::Eval { name, expression }
        }
    }

    pub fn mean(name: impl Into<String>, target: impl Into<String>, groups: &[&str]) -> Self {
        Formula::Mean {
            name: name.into(),
            target: target.into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    pub fn stdev(name: impl Into<String>, target: impl Into<String>, groups: &[&str]) -> Self {
        Formula::Stdev {
            name: name.into(),
            target: target.into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    /// Re-classify a general expression against the columns it can see: a column
    /// named like a function (`Exp(x-1)`) makes it row-relative
    pub fn resolve_columns(&self, is_column: &dyn Fn(&str) -> bool) -> Cow<'_, Formula> {
        match self {
            Formula::Eval { name, expression } if is_row_relative_with(expression, is_column) => {
                Cow::Owned(Formula::Row {
                    name: name.clone(),
                    expression: expression.clone(),
                })
            }
            _ => Cow::Borrowed(self),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Formula::Eval { name, .. }
            | Formula::Row { name, .. }
            | Formula::Mean { name, .. }
            | Formula::Stdev { name, .. } => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Formula::Eval { .. } => "expression",
            Formula::Row { .. } => "row-relative",
            Formula::Mean { .. } => "mean",
            Formula::Stdev { .. } => "stdev",
        }
    }

    /// Display form, e.g. "mean(Revenue) by Firm"
    pub fn describe(&self) -> String {
        match self {
            Formula::Eval { expression, .. } | Formula::Row { expression, .. } => {
                expression.clone()
            }
            Formula::Mean { target, groups, .. } => {
                format!("mean({}) by {}", target, groups.join(", "))
            }
            Formula::Stdev { target, groups, .. } if groups.is_empty() => {
                format!("stdev({})", target)
            }
            Formula::Stdev { target, groups, .. } => {
                format!("stdev({}) by {}", target, groups.join(", "))
            }
        }
    }
}

//==============================================================================
// Result Table
//==============================================================================

/// Output of a run: entity id, time, then one column per formula
#[derive(Debug, Clone)]
pub struct ResultTable {
    pub entity: Column,
    pub time: Column,
    pub variables: Vec<Column>,
}

impl ResultTable {
    pub fn new(entity: Column, time: Column) -> Self {
        Self {
            entity,
            time,
            variables: Vec::new(),
        }
    }

    /// Append a computed column; a repeated name replaces the values in place
    pub fn set_variable(&mut self, name: &str, values: Vec<Option<f64>>) {
        if let Some(existing) = self.variables.iter_mut().find(|c| c.name == name) {
            existing.data = ColumnData::Number(values);
        } else {
            self.variables.push(Column::numbers(name, values));
        }
    }

    /// Values of a computed column
    pub fn get(&self, name: &str) -> Option<&[Option<f64>]> {
        self.variables
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.data.as_numbers())
    }

    pub fn row_count(&self) -> usize {
        self.entity.len()
    }

    /// All columns in output order
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        std::iter::once(&self.entity)
            .chain(std::iter::once(&self.time))
            .chain(self.variables.iter())
    }
}

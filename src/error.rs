use thiserror::Error;

pub type PanelResult<T> = Result<T, PanelError>;

#[derive(Error, Debug)]
pub enum PanelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("{0}")]
    Formula(#[from] FormulaFailure),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Location of the row that triggered a formula-level failure
#[derive(Debug, Clone, PartialEq)]
pub struct RowContext {
    pub row: usize,
    pub entity: String,
    pub time: String,
}

impl std::fmt::Display for RowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "row {}, entity={}, time={}",
            self.row, self.entity, self.time
        )
    }
}

/// A structural error that aborts a whole formula (and with it the run)
#[derive(Error, Debug, Clone, PartialEq)]
pub struct FormulaFailure {
    pub formula: String,
    pub message: String,
    pub row: Option<RowContext>,
}

impl FormulaFailure {
    pub fn new(formula: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
            message: message.into(),
            row: None,
        }
    }

    pub fn at_row(mut self, row: RowContext) -> Self {
        self.row = Some(row);
        self
    }
}

impl std::fmt::Display for FormulaFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Formula '{}' failed: {}", self.formula, self.message)?;
        if let Some(row) = &self.row {
            write!(f, " ({})", row)?;
        }
        Ok(())
    }
}

/// Build a formula failure without row context
pub fn formula_error(formula: &str, message: impl Into<String>) -> PanelError {
    PanelError::Formula(FormulaFailure::new(formula, message))
}

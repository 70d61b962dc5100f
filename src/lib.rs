//! panelvar - derived variables for panel (entity x time) datasets
//!
//! This library computes an ordered list of named formulas over an in-memory
//! columnar dataset. Each formula sees the base columns plus everything computed
//! before it.
//!
//! # Formula kinds
//!
//! - Grouped mean and sample standard deviation, broadcast to every group row
//! - Row-relative expressions: `Revenue(x) / Revenue(x-1)` reads neighbouring
//!   rows of the same entity, evaluated per row with safe math
//! - General expressions over whole columns (`Revenue * 2`, `Cost{1}`)
//!
//! Undefined results (out-of-range offsets, missing inputs, math-domain errors,
//! infinities) become missing values. Structural errors fail the whole run.
//!
//! # Example
//!
//! ```no_run
//! use panelvar::core::VariableCalculator;
//! use panelvar::parser::parse_job;
//! use std::path::Path;
//!
//! let job = parse_job(Path::new("job.yaml"))?;
//! let calculator = VariableCalculator::new(
//!     &job.dataset,
//!     job.entity_column.as_str(),
//!     job.time_column.as_str(),
//!     &job.engine,
//! )?;
//! let result = calculator.calculate(&job.formulas, &mut |done, total, name| {
//!     println!("[{}/{}] {}", done, total, name);
//! })?;
//!
//! println!("Variables: {}", result.variables.len());
//! # Ok::<(), panelvar::error::PanelError>(())
//! ```

pub mod cli;
pub mod core;
pub mod error;
pub mod parser;
pub mod types;
pub mod writer;

// Re-export commonly used types
pub use error::{PanelError, PanelResult};
pub use types::{Column, ColumnData, Dataset, Formula, ResultTable};

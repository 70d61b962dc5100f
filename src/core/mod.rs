//! Variable computation engine

pub mod aggregate;
pub mod context;
pub mod expression;
pub mod pipeline;
pub mod row_relative;
pub mod sanitize;
pub mod scheduler;
pub mod vectorized;

pub use pipeline::{PlanStep, VariableCalculator};
pub use scheduler::EngineConfig;

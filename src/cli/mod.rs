//! CLI command handlers

pub mod commands;

pub use commands::{compute, functions, validate};

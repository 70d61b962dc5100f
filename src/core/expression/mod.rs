//! Fixed-grammar expression language: tokenizer, parser, evaluator and safe math

pub mod evaluator;
pub mod math;
pub mod parser;
pub mod tokenizer;

pub use evaluator::{evaluate, Bindings, EvalError, Value};
pub use math::{EvalMode, Function, UndefinedOperation};
pub use parser::{parse_expression, parse_expression_with, Expr, ParseError};

use regex::Regex;
use std::sync::OnceLock;

fn offset_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\w+)\s*\(\s*x\s*(?:[-+]\s*\d+\s*)?\)").expect("offset token pattern is valid")
    })
}

/// True if the expression text holds at least one `Column(x)`, `Column(x+N)` or
/// `Column(x-N)` token. Calls to the fixed functions (`log(x)`) are not offsets.
pub fn is_row_relative(expression: &str) -> bool {
    is_row_relative_with(expression, &|_| false)
}

/// [`is_row_relative`] where a function-named token (`Exp(x-1)`) counts when
/// `is_column` knows the name
pub fn is_row_relative_with(expression: &str, is_column: &dyn Fn(&str) -> bool) -> bool {
    offset_token_pattern().captures_iter(expression).any(|caps| {
        let name = &caps[1];
        if name.eq_ignore_ascii_case("IF") {
            return false;
        }
        Function::from_name(name).is_none() || is_column(name)
    })
}

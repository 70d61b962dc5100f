//! Expression evaluator
//!
//! Walks an AST for one row at a time. Column values come from a [`Bindings`]
//! implementation, so the same evaluator serves both row-relative formulas
//! (offset slots) and general expressions (current-row column lookups).

use super::math::{self, EvalMode, UndefinedOperation};
use super::parser::{BinaryOp, Expr, UnaryOp};

/// Value type that can be returned from evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// A numeric value
    Number(f64),
    /// A boolean value (comparisons, `and`/`or`)
    Boolean(bool),
    /// No value: absent data or an out-of-range neighbor
    Missing,
}

impl Value {
    /// Numeric view; booleans count as 1/0, missing stays `None`
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Missing => None,
        }
    }

    /// Truth value; non-zero numbers are true, missing stays `None`
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Number(n) => Some(*n != 0.0),
            Value::Missing => None,
        }
    }

    pub fn from_option(value: Option<f64>) -> Self {
        value.map_or(Value::Missing, Value::Number)
    }
}

/// Error during evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Row-local: the operation has no defined result for these inputs
    Undefined(UndefinedOperation),
    /// Formula-level: the expression cannot be evaluated on any row
    Structural(String),
}

impl From<UndefinedOperation> for EvalError {
    fn from(err: UndefinedOperation) -> Self {
        EvalError::Undefined(err)
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Undefined(op) => write!(f, "{}", op),
            EvalError::Structural(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for EvalError {}

/// Source of column values for the row being evaluated
pub trait Bindings {
    /// Value of `column` on the current row
    fn column(&self, name: &str) -> Result<Value, EvalError>;

    /// Value of `column` at `offset` rows from the current one within the entity
    fn offset(&self, column: &str, offset: i64) -> Result<Value, EvalError>;
}

/// Evaluate an expression against one row's bindings
pub fn evaluate<B: Bindings + ?Sized>(
    expr: &Expr,
    bindings: &B,
    mode: EvalMode,
) -> Result<Value, EvalError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),

        Expr::Boolean(b) => Ok(Value::Boolean(*b)),

        Expr::Reference(name) => bindings.column(name),

        Expr::Offset { column, offset } => bindings.offset(column, *offset),

        Expr::If {
            condition,
            then_branch,
            else_branch,
        } => match evaluate(condition, bindings, mode)?.as_bool() {
            Some(true) => evaluate(then_branch, bindings, mode),
            Some(false) => evaluate(else_branch, bindings, mode),
            None => Ok(Value::Missing),
        },

        Expr::FunctionCall { func, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                match evaluate(arg, bindings, mode)?.as_number() {
                    Some(n) => values.push(n),
                    None => return Ok(Value::Missing),
                }
            }
            Ok(Value::Number(func.apply(&values, mode)?))
        }

        Expr::BinaryOp { op, left, right } => {
            let left_val = evaluate(left, bindings, mode)?;
            let right_val = evaluate(right, bindings, mode)?;
            evaluate_binary_op(*op, left_val, right_val, mode)
        }

        Expr::UnaryOp { op, operand } => {
            let val = evaluate(operand, bindings, mode)?;
            Ok(evaluate_unary_op(*op, val))
        }
    }
}

/// Evaluate a binary operation; any missing operand makes the result missing
fn evaluate_binary_op(
    op: BinaryOp,
    left: Value,
    right: Value,
    mode: EvalMode,
) -> Result<Value, EvalError> {
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let (Some(l), Some(r)) = (left.as_bool(), right.as_bool()) else {
            return Ok(Value::Missing);
        };
        let result = if op == BinaryOp::And { l && r } else { l || r };
        return Ok(Value::Boolean(result));
    }

    let (Some(l), Some(r)) = (left.as_number(), right.as_number()) else {
        return Ok(Value::Missing);
    };

    let value = match op {
        BinaryOp::Add => Value::Number(l + r),
        BinaryOp::Sub => Value::Number(l - r),
        BinaryOp::Mul => Value::Number(l * r),
        BinaryOp::Div => Value::Number(math::divide(l, r, mode)?),
        BinaryOp::Pow => Value::Number(math::power(l, r, mode)?),
        BinaryOp::Eq => Value::Boolean(l == r),
        BinaryOp::NotEq => Value::Boolean(l != r),
        BinaryOp::Lt => Value::Boolean(l < r),
        BinaryOp::LtEq => Value::Boolean(l <= r),
        BinaryOp::Gt => Value::Boolean(l > r),
        BinaryOp::GtEq => Value::Boolean(l >= r),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    };
    Ok(value)
}

fn evaluate_unary_op(op: UnaryOp, operand: Value) -> Value {
    match op {
        UnaryOp::Neg => operand
            .as_number()
            .map_or(Value::Missing, |n| Value::Number(-n)),
        UnaryOp::Not => operand
            .as_bool()
            .map_or(Value::Missing, |b| Value::Boolean(!b)),
    }
}

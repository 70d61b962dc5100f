//! Safe math library
//! log/ln, log10, log2, sqrt, exp, sin, cos, tan, pow, abs, round
//!
//! In checked mode every domain-restricted function reports an
//! [`UndefinedOperation`] instead of producing NaN or infinity.

use thiserror::Error;

/// A mathematically undefined operation (log(0), sqrt(-1), exp overflow, x/0, ...)
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{operation} is undefined")]
pub struct UndefinedOperation {
    pub operation: String,
}

impl UndefinedOperation {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

/// How arithmetic treats domain violations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Domain violations raise `UndefinedOperation` (row-relative formulas)
    Checked,
    /// IEEE-754 semantics: NaN/inf flow through to the sanitizer (general expressions)
    Ieee,
}

/// The fixed function set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Log,
    Log10,
    Log2,
    Sqrt,
    Exp,
    Sin,
    Cos,
    Tan,
    Pow,
    Abs,
    Round,
}

/// (name, signature) pairs, for help output
pub const FUNCTIONS: &[(&str, &str)] = &[
    ("log / ln", "natural logarithm, x > 0"),
    ("log10", "base-10 logarithm, x > 0"),
    ("log2", "base-2 logarithm, x > 0"),
    ("sqrt", "square root, x >= 0"),
    ("exp", "e^x, must not overflow"),
    ("sin / cos / tan", "trigonometry (radians)"),
    ("pow(x, y)", "x raised to y"),
    ("abs", "absolute value"),
    ("round(x[, n])", "round to n decimals, ties to even"),
    ("IF(c, a, b)", "a when c is true, else b (lazy)"),
];

impl Function {
    /// Look up a function by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        let func = match name.to_ascii_lowercase().as_str() {
            "log" | "ln" => Function::Log,
            "log10" => Function::Log10,
            "log2" => Function::Log2,
            "sqrt" => Function::Sqrt,
            "exp" => Function::Exp,
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "pow" => Function::Pow,
            "abs" => Function::Abs,
            "round" => Function::Round,
            _ => return None,
        };
        Some(func)
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::Log => "log",
            Function::Log10 => "log10",
            Function::Log2 => "log2",
            Function::Sqrt => "sqrt",
            Function::Exp => "exp",
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Pow => "pow",
            Function::Abs => "abs",
            Function::Round => "round",
        }
    }

    /// Accepted argument count (min, max)
    pub fn arity(self) -> (usize, usize) {
        match self {
            Function::Pow => (2, 2),
            Function::Round => (1, 2),
            _ => (1, 1),
        }
    }

    /// Apply the function to already-evaluated arguments.
    /// Argument count is checked by the parser.
    pub fn apply(self, args: &[f64], mode: EvalMode) -> Result<f64, UndefinedOperation> {
        let x = args[0];
        match (self, mode) {
            (Function::Log, EvalMode::Checked) => checked_log(x, "log", f64::ln),
            (Function::Log10, EvalMode::Checked) => checked_log(x, "log10", f64::log10),
            (Function::Log2, EvalMode::Checked) => checked_log(x, "log2", f64::log2),
            (Function::Log, EvalMode::Ieee) => Ok(x.ln()),
            (Function::Log10, EvalMode::Ieee) => Ok(x.log10()),
            (Function::Log2, EvalMode::Ieee) => Ok(x.log2()),

            (Function::Sqrt, EvalMode::Checked) => {
                if !x.is_finite() || x < 0.0 {
                    Err(UndefinedOperation::new(format!("sqrt({})", x)))
                } else {
                    Ok(x.sqrt())
                }
            }
            (Function::Sqrt, EvalMode::Ieee) => Ok(x.sqrt()),

            (Function::Exp, EvalMode::Checked) => {
                let result = x.exp();
                if result.is_infinite() && x.is_finite() {
                    Err(UndefinedOperation::new(format!("exp({}) overflow", x)))
                } else {
                    Ok(result)
                }
            }
            (Function::Exp, EvalMode::Ieee) => Ok(x.exp()),

            (Function::Sin, _) => Ok(x.sin()),
            (Function::Cos, _) => Ok(x.cos()),
            (Function::Tan, _) => Ok(x.tan()),
            (Function::Abs, _) => Ok(x.abs()),

            (Function::Pow, _) => power(x, args[1], mode),

            (Function::Round, _) => {
                let digits = args.get(1).copied().unwrap_or(0.0);
                round(x, digits, mode)
            }
        }
    }
}

fn checked_log(x: f64, name: &str, f: fn(f64) -> f64) -> Result<f64, UndefinedOperation> {
    if !x.is_finite() || x <= 0.0 {
        return Err(UndefinedOperation::new(format!("{}({})", name, x)));
    }
    Ok(f(x))
}

/// x ** y; checked mode rejects results that are not finite
pub fn power(base: f64, exponent: f64, mode: EvalMode) -> Result<f64, UndefinedOperation> {
    let result = base.powf(exponent);
    if mode == EvalMode::Checked && !result.is_finite() && base.is_finite() && exponent.is_finite()
    {
        return Err(UndefinedOperation::new(format!("{} ** {}", base, exponent)));
    }
    Ok(result)
}

/// x / y; checked mode rejects a zero divisor
pub fn divide(left: f64, right: f64, mode: EvalMode) -> Result<f64, UndefinedOperation> {
    if mode == EvalMode::Checked && right == 0.0 {
        return Err(UndefinedOperation::new(format!("{} / 0", left)));
    }
    Ok(left / right)
}

/// Round half to even at `digits` decimals (negative digits round to tens, hundreds, ...)
pub fn round(value: f64, digits: f64, mode: EvalMode) -> Result<f64, UndefinedOperation> {
    if mode == EvalMode::Checked && digits.fract() != 0.0 {
        return Err(UndefinedOperation::new(format!(
            "round({}, {})",
            value, digits
        )));
    }
    let digits = digits.trunc() as i32;
    match digits {
        0 => Ok(value.round_ties_even()),
        d if d > 0 => {
            let multiplier = 10_f64.powi(d);
            Ok((value * multiplier).round_ties_even() / multiplier)
        }
        d => {
            let divisor = 10_f64.powi(-d);
            Ok((value / divisor).round_ties_even() * divisor)
        }
    }
}

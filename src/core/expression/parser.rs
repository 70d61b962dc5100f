//! Expression parser
//!
//! Converts a sequence of tokens into an Abstract Syntax Tree (AST).
//! Uses recursive descent parsing with operator precedence.

use super::math::Function;
use super::tokenizer::{tokenize, Token};

/// Binary operators, in the order of the grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn from_comparison(op: &str) -> Option<Self> {
        let op = match op {
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::NotEq,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::LtEq,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::GtEq,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Abstract Syntax Tree node for formula expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A numeric literal
    Number(f64),
    /// `True` / `False`
    Boolean(bool),
    /// A column reference on the current row (e.g., "Revenue")
    Reference(String),
    /// A neighbor reference within the entity: `Revenue(x-1)` has offset -1
    Offset { column: String, offset: i64 },
    /// Function call from the fixed set: log(a), pow(a, b), ...
    FunctionCall { func: Function, args: Vec<Expr> },
    /// IF(condition, then, else)
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    /// Binary operation: left op right
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation: -expr, not expr
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
}

impl Expr {
    /// Distinct `(column, offset)` pairs in order of first appearance
    pub fn offsets(&self) -> Vec<(String, i64)> {
        let mut out = Vec::new();
        self.walk(&mut |expr| {
            if let Expr::Offset { column, offset } = expr {
                let key = (column.clone(), *offset);
                if !out.contains(&key) {
                    out.push(key);
                }
            }
        });
        out
    }

    /// Distinct bare column references in order of first appearance
    pub fn references(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        self.walk(&mut |expr| {
            if let Expr::Reference(name) = expr {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
        });
        out
    }

    /// Pre-order traversal
    fn walk(&self, visit: &mut dyn FnMut(&Expr)) {
        visit(self);
        match self {
            Expr::Number(_) | Expr::Boolean(_) | Expr::Reference(_) | Expr::Offset { .. } => {}
            Expr::FunctionCall { args, .. } => args.iter().for_each(|a| a.walk(visit)),
            Expr::If {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.walk(visit);
                then_branch.walk(visit);
                else_branch.walk(visit);
            }
            Expr::BinaryOp { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::UnaryOp { operand, .. } => operand.walk(visit),
        }
    }
}

/// Error during parsing
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Parser for formula tokens
pub struct Parser<'c> {
    tokens: Vec<Token>,
    position: usize,
    is_column: Option<&'c dyn Fn(&str) -> bool>,
}

impl<'c> Parser<'c> {
    /// Create a new parser for the given tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
            is_column: None,
        }
    }

    /// Resolve `Name(x±N)` against the available columns: a column named like a
    /// function (`Exp`, `Log`) is offset-referenced instead of called
    pub fn with_columns(tokens: Vec<Token>, is_column: &'c dyn Fn(&str) -> bool) -> Self {
        Self {
            tokens,
            position: 0,
            is_column: Some(is_column),
        }
    }

    /// Parse the tokens into an AST
    pub fn parse(mut self) -> Result<Expr, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::new("Empty expression", 0));
        }
        let expr = self.expression()?;

        if !self.is_at_end() {
            return Err(ParseError::new(
                format!("Unexpected token after expression: {:?}", self.peek()),
                self.position,
            ));
        }

        Ok(expr)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<&Token> {
        if !self.is_at_end() {
            self.position += 1;
        }
        self.tokens.get(self.position - 1)
    }

    /// Check if current token matches and consume it
    fn match_token(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume an operator token with the given text
    fn match_operator(&mut self, op: &str) -> bool {
        if let Some(Token::Operator(s)) = self.peek() {
            if s == op {
                self.advance();
                return true;
            }
        }
        false
    }

    /// Consume a keyword identifier (`and`, `or`, `not`), case-insensitive
    fn match_keyword(&mut self, keyword: &str) -> bool {
        if let Some(Token::Identifier(s)) = self.peek() {
            if s.eq_ignore_ascii_case(keyword) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Expression: disjunction
    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.disjunction()
    }

    /// Disjunction: conjunction (( "or" | "|" ) conjunction)*
    fn disjunction(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.conjunction()?;
        while self.match_operator("|") || self.match_keyword("or") {
            let right = self.conjunction()?;
            left = Self::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    /// Conjunction: negation (( "and" | "&" ) negation)*
    fn conjunction(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.negation()?;
        while self.match_operator("&") || self.match_keyword("and") {
            let right = self.negation()?;
            left = Self::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    /// Negation: "not" negation | comparison
    fn negation(&mut self) -> Result<Expr, ParseError> {
        if self.match_keyword("not") {
            let operand = self.negation()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    /// Comparison: term (( "==" | "!=" | "<" | ">" | "<=" | ">=" ) term)*
    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;

        while let Some(op) = self.match_comparison() {
            let right = self.term()?;
            left = Self::binary(op, left, right);
        }

        Ok(left)
    }

    fn match_comparison(&mut self) -> Option<BinaryOp> {
        if let Some(Token::Operator(s)) = self.peek() {
            if let Some(op) = BinaryOp::from_comparison(s) {
                self.advance();
                return Some(op);
            }
        }
        None
    }

    /// Term: factor (( "+" | "-" ) factor)*
    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;

        loop {
            let op = if self.match_operator("+") {
                BinaryOp::Add
            } else if self.match_operator("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.factor()?;
            left = Self::binary(op, left, right);
        }

        Ok(left)
    }

    /// Factor: unary (( "*" | "/" ) unary)*
    fn factor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;

        loop {
            let op = if self.match_operator("*") {
                BinaryOp::Mul
            } else if self.match_operator("/") {
                BinaryOp::Div
            } else {
                break;
            };
            let right = self.unary()?;
            left = Self::binary(op, left, right);
        }

        Ok(left)
    }

    /// Unary: ( "-" | "+" ) unary | power
    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.match_operator("-") {
            let operand = self.unary()?;
            Ok(Expr::UnaryOp {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            })
        } else if self.match_operator("+") {
            self.unary()
        } else {
            self.power()
        }
    }

    /// Power: call ( "**" unary )?   (right-associative, binds tighter than unary minus on the left)
    fn power(&mut self) -> Result<Expr, ParseError> {
        let left = self.call()?;

        if self.match_operator("**") {
            let right = self.unary()?;
            Ok(Self::binary(BinaryOp::Pow, left, right))
        } else {
            Ok(left)
        }
    }

    /// Call: IDENTIFIER "(" arguments ")" | primary
    fn call(&mut self) -> Result<Expr, ParseError> {
        if let (Some(Token::Identifier(name)), Some(Token::OpenParen)) =
            (self.peek(), self.tokens.get(self.position + 1))
        {
            let name = name.clone();
            let start = self.position;
            self.advance();
            self.advance();

            if name.eq_ignore_ascii_case("IF") {
                return self.if_call(start);
            }
            if let Some(func) = Function::from_name(&name) {
                if self.offset_shape_ahead() {
                    let (callee_is_column, x_is_column) = match self.is_column {
                        Some(is_column) => (is_column(&name), is_column("x")),
                        None => (false, true),
                    };
                    if callee_is_column {
                        return self.offset_reference(name, start);
                    }
                    if !x_is_column {
                        return Err(ParseError::new(
                            format!(
                                "'{n}' is a reserved function name and no column is named '{n}'; \
                                 '{n}(x...)' would apply {f} to a column 'x'",
                                n = name,
                                f = func.name()
                            ),
                            start,
                        ));
                    }
                }
                return self.function_call(func, start);
            }
            return self.offset_reference(name, start);
        }

        self.primary()
    }

    /// The tokens after an opening paren read `x)`, `x+N)` or `x-N)`
    fn offset_shape_ahead(&self) -> bool {
        let at = |i: usize| self.tokens.get(self.position + i);
        if !matches!(at(0), Some(Token::Identifier(var)) if var == "x") {
            return false;
        }
        match at(1) {
            Some(Token::CloseParen) => true,
            Some(Token::Operator(op)) if op == "+" || op == "-" => {
                matches!(at(2), Some(Token::Number(_))) && matches!(at(3), Some(Token::CloseParen))
            }
            _ => false,
        }
    }

    fn close_call(&mut self, what: &str) -> Result<(), ParseError> {
        if self.match_token(&Token::CloseParen) {
            Ok(())
        } else {
            Err(ParseError::new(
                format!("Expected ')' after {} arguments", what),
                self.position,
            ))
        }
    }

    fn if_call(&mut self, start: usize) -> Result<Expr, ParseError> {
        let mut args = self.arguments()?;
        self.close_call("IF")?;
        if args.len() != 3 {
            return Err(ParseError::new(
                format!("IF expects 3 arguments, got {}", args.len()),
                start,
            ));
        }
        let else_branch = args.pop().map(Box::new);
        let then_branch = args.pop().map(Box::new);
        let condition = args.pop().map(Box::new);
        match (condition, then_branch, else_branch) {
            (Some(condition), Some(then_branch), Some(else_branch)) => Ok(Expr::If {
                condition,
                then_branch,
                else_branch,
            }),
            _ => Err(ParseError::new("IF expects 3 arguments", start)),
        }
    }

    fn function_call(&mut self, func: Function, start: usize) -> Result<Expr, ParseError> {
        let args = self.arguments()?;
        self.close_call(func.name())?;

        let (min, max) = func.arity();
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            };
            return Err(ParseError::new(
                format!(
                    "{} expects {} argument(s), got {}",
                    func.name(),
                    expected,
                    args.len()
                ),
                start,
            ));
        }
        Ok(Expr::FunctionCall { func, args })
    }

    /// Offset: COLUMN "(" "x" ( ("+" | "-") INTEGER )? ")"
    fn offset_reference(&mut self, column: String, start: usize) -> Result<Expr, ParseError> {
        let malformed = |column: &str| {
            ParseError::new(
                format!(
                    "Malformed reference '{c}(...)': expected {c}(x), {c}(x+N) or {c}(x-N), \
                     or an unknown function",
                    c = column
                ),
                start,
            )
        };

        match self.advance() {
            Some(Token::Identifier(var)) if var == "x" => {}
            _ => return Err(malformed(&column)),
        }

        let sign = if self.match_operator("+") {
            1
        } else if self.match_operator("-") {
            -1
        } else {
            0
        };

        let offset = if sign == 0 {
            0
        } else {
            match self.advance() {
                Some(Token::Number(n)) if n.fract() == 0.0 && *n >= 0.0 && *n <= 1e9 => {
                    sign * (*n as i64)
                }
                _ => return Err(malformed(&column)),
            }
        };

        if !self.match_token(&Token::CloseParen) {
            return Err(malformed(&column));
        }

        Ok(Expr::Offset { column, offset })
    }

    /// Arguments: ( expr ( "," expr )* )?
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();

        if let Some(Token::CloseParen) = self.peek() {
            return Ok(args);
        }

        args.push(self.expression()?);
        while self.match_token(&Token::Comma) {
            args.push(self.expression()?);
        }

        Ok(args)
    }

    /// Primary: NUMBER | BOOLEAN | IDENTIFIER | "(" expr ")"
    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().cloned();

        match token {
            Some(Token::Number(n)) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Some(Token::Identifier(name)) => {
                self.advance();
                if name.eq_ignore_ascii_case("true") {
                    Ok(Expr::Boolean(true))
                } else if name.eq_ignore_ascii_case("false") {
                    Ok(Expr::Boolean(false))
                } else {
                    Ok(Expr::Reference(name))
                }
            }
            Some(Token::OpenParen) => {
                self.advance();
                let expr = self.expression()?;
                if !self.match_token(&Token::CloseParen) {
                    return Err(ParseError::new(
                        "Expected ')' after expression",
                        self.position,
                    ));
                }
                Ok(expr)
            }
            Some(token) => Err(ParseError::new(
                format!("Unexpected token: {:?}", token),
                self.position,
            )),
            None => Err(ParseError::new(
                "Unexpected end of expression",
                self.position,
            )),
        }
    }
}

/// Convenience function to parse tokens into an AST
pub fn parse(tokens: Vec<Token>) -> Result<Expr, ParseError> {
    Parser::new(tokens).parse()
}

/// Tokenize and parse an expression string
pub fn parse_expression(formula: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(formula).map_err(|e| ParseError::new(e.message, e.position))?;
    parse(tokens)
}

/// Like [`parse_expression`], with `Name(x±N)` resolved against `is_column`
pub fn parse_expression_with(
    formula: &str,
    is_column: &dyn Fn(&str) -> bool,
) -> Result<Expr, ParseError> {
    let tokens = tokenize(formula).map_err(|e| ParseError::new(e.message, e.position))?;
    Parser::with_columns(tokens, is_column).parse()
}

//! Expression tokenizer
//!
//! Converts formula strings like "IF(Revenue(x+1) > Revenue(x), 1, 0)" into a
//! sequence of tokens that can be parsed into an AST.

use std::iter::Peekable;
use std::str::Chars;

/// A token in a formula expression
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A numeric literal (e.g., 123, 45.67, 1.5e10)
    Number(f64),
    /// An identifier - column name, function name, keyword or the offset variable `x`
    Identifier(String),
    /// Operators: + - * / ** == != < > <= >= & |
    Operator(String),
    /// Opening parenthesis
    OpenParen,
    /// Closing parenthesis
    CloseParen,
    /// Comma separator for function arguments
    Comma,
}

/// Error during tokenization
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizeError {
    pub message: String,
    pub position: usize,
}

impl TokenizeError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tokenize error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for TokenizeError {}

/// Tokenizer for formula expressions
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Tokenizer<'a> {
    /// Create a new tokenizer for the given formula string
    pub fn new(formula: &'a str) -> Self {
        Self {
            chars: formula.chars().peekable(),
            position: 0,
        }
    }

    /// Tokenize the entire formula into a vector of tokens
    pub fn tokenize(mut self) -> Result<Vec<Token>, TokenizeError> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }

        Ok(tokens)
    }

    /// Get the next token, or None if at end of input
    fn next_token(&mut self) -> Result<Option<Token>, TokenizeError> {
        self.skip_whitespace();

        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let token = match c {
            '(' => {
                self.advance();
                Token::OpenParen
            }
            ')' => {
                self.advance();
                Token::CloseParen
            }
            ',' => {
                self.advance();
                Token::Comma
            }

            '+' | '-' | '/' | '&' | '|' => {
                self.advance();
                Token::Operator(c.to_string())
            }

            // * or **
            '*' => {
                self.advance();
                if self.peek() == Some('*') {
                    self.advance();
                    Token::Operator("**".to_string())
                } else {
                    Token::Operator("*".to_string())
                }
            }

            '<' | '>' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    Token::Operator(format!("{}=", c))
                } else {
                    Token::Operator(c.to_string())
                }
            }

            '=' | '!' => self.read_equality_operator(c)?,

            c if c.is_ascii_digit() || c == '.' => self.read_number()?,

            c if c.is_alphabetic() || c == '_' => self.read_identifier(),

            c => {
                return Err(TokenizeError::new(
                    format!("Unexpected character: '{}'", c),
                    self.position,
                ));
            }
        };
        Ok(Some(token))
    }

    /// Peek at the next character without consuming it
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Advance to the next character
    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Push consecutive ASCII digits onto `buf`
    fn read_digits(&mut self, buf: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                buf.push(c);
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Read a number (integer, decimal, or scientific notation)
    fn read_number(&mut self) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        let mut num_str = String::new();

        self.read_digits(&mut num_str);

        if self.peek() == Some('.') {
            num_str.push('.');
            self.advance();
            self.read_digits(&mut num_str);
        }

        // Exponent part (e.g., 1.5e10, 2E-5)
        if matches!(self.peek(), Some('e') | Some('E')) {
            num_str.push('e');
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                num_str.push(sign);
                self.advance();
            }
            self.read_digits(&mut num_str);
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| TokenizeError::new(format!("Invalid number: {}", num_str), start_pos))
    }

    /// Read an identifier (column, function, keyword)
    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }

        Token::Identifier(ident)
    }

    /// Read `==` or `!=`; a lone `=` or `!` is rejected
    fn read_equality_operator(&mut self, first: char) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        self.advance();

        if self.peek() == Some('=') {
            self.advance();
            Ok(Token::Operator(format!("{}=", first)))
        } else if first == '=' {
            Err(TokenizeError::new(
                "Unexpected '=': use '==' for comparison",
                start_pos,
            ))
        } else {
            Err(TokenizeError::new(
                "Unexpected '!': use 'not' for negation or '!=' for comparison",
                start_pos,
            ))
        }
    }
}

/// Convenience function to tokenize a formula string
pub fn tokenize(formula: &str) -> Result<Vec<Token>, TokenizeError> {
    Tokenizer::new(formula).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(s: &str) -> Token {
        Token::Operator(s.to_string())
    }

    fn ident(s: &str) -> Token {
        Token::Identifier(s.to_string())
    }

    #[test]
    fn test_tokenize_simple_number() {
        let tokens = tokenize("42").unwrap();
        assert_eq!(tokens, vec![Token::Number(42.0)]);
    }

    #[test]
    fn test_tokenize_decimal_number() {
        assert_eq!(tokenize("3.567").unwrap(), vec![Token::Number(3.567)]);
        assert_eq!(tokenize(".5").unwrap(), vec![Token::Number(0.5)]);
    }

    #[test]
    fn test_tokenize_scientific_notation() {
        assert_eq!(tokenize("1.5e10").unwrap(), vec![Token::Number(1.5e10)]);
        assert_eq!(tokenize("2E-5").unwrap(), vec![Token::Number(2e-5)]);
    }

    #[test]
    fn test_tokenize_identifier_with_underscore() {
        assert_eq!(tokenize("Net_Sales").unwrap(), vec![ident("Net_Sales")]);
    }

    #[test]
    fn test_tokenize_offset_reference() {
        let tokens = tokenize("Revenue(x-1)").unwrap();
        assert_eq!(
            tokens,
            vec![
                ident("Revenue"),
                Token::OpenParen,
                ident("x"),
                op("-"),
                Token::Number(1.0),
                Token::CloseParen,
            ]
        );
    }

    #[test]
    fn test_tokenize_all_operators() {
        let tokens = tokenize("+ - * / ** & |").unwrap();
        assert_eq!(
            tokens,
            vec![op("+"), op("-"), op("*"), op("/"), op("**"), op("&"), op("|")]
        );
    }

    #[test]
    fn test_tokenize_comparison_operators() {
        let tokens = tokenize("a == b != c < d <= e > f >= g").unwrap();
        assert_eq!(
            tokens,
            vec![
                ident("a"),
                op("=="),
                ident("b"),
                op("!="),
                ident("c"),
                op("<"),
                ident("d"),
                op("<="),
                ident("e"),
                op(">"),
                ident("f"),
                op(">="),
                ident("g"),
            ]
        );
    }

    #[test]
    fn test_tokenize_if_condition() {
        let tokens = tokenize("IF(a > 10, 1, 0)").unwrap();
        assert_eq!(
            tokens,
            vec![
                ident("IF"),
                Token::OpenParen,
                ident("a"),
                op(">"),
                Token::Number(10.0),
                Token::Comma,
                Token::Number(1.0),
                Token::Comma,
                Token::Number(0.0),
                Token::CloseParen,
            ]
        );
    }

    #[test]
    fn test_tokenize_whitespace_only() {
        assert_eq!(tokenize("   ").unwrap(), vec![]);
    }

    #[test]
    fn test_tokenize_error_single_equals() {
        let err = tokenize("a = b").unwrap_err();
        assert!(err.message.contains("=="));
        assert_eq!(err.position, 2);
    }

    #[test]
    fn test_tokenize_error_unexpected_char() {
        let result = tokenize("Revenue{1}");
        assert!(result.unwrap_err().message.contains("Unexpected"));
    }
}

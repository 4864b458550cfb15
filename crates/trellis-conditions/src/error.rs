//! Error types for trellis-conditions

use thiserror::Error;

/// Result type alias using the expression error type
pub type Result<T> = std::result::Result<T, ExpressionError>;

/// Errors raised while tokenizing, parsing or evaluating a condition expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    /// A character that does not start any token
    #[error("Unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    /// A string literal without its closing quote
    #[error("Unterminated string literal starting at position {pos}")]
    UnterminatedString { pos: usize },

    /// A numeric literal that does not fit its type
    #[error("Invalid number '{text}' at position {pos}")]
    InvalidNumber { text: String, pos: usize },

    /// The parser found a token it did not expect
    #[error("Expected {expected} but found {found} at position {pos}")]
    UnexpectedToken {
        expected: String,
        found: String,
        pos: usize,
    },

    /// Operand types that the operator cannot combine
    #[error("Operator '{op}' cannot be applied to {left} and {right}")]
    TypeMismatch {
        op: String,
        left: String,
        right: String,
    },

    /// A unary operator applied to the wrong type
    #[error("Operator '{op}' cannot be applied to {operand}")]
    InvalidOperand { op: String, operand: String },

    /// Integer division or remainder by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// Integer arithmetic overflow
    #[error("Integer overflow in '{op}'")]
    Overflow { op: String },

    /// A bare name with no matching context property
    #[error("Undefined property: {name}")]
    UndefinedProperty { name: String },

    /// A call to a condition type that is not registered
    #[error("Unknown condition type: {name}")]
    UnknownCondition { name: String },

    /// A call whose arguments cannot be marshalled into an attribute bag
    #[error("Malformed arguments for condition '{name}': {message}")]
    MalformedArguments { name: String, message: String },

    /// The expression did not produce a boolean where one was required
    #[error("Expression evaluated to {found}, expected a boolean")]
    NotBoolean { found: String },
}

impl ExpressionError {
    /// Create an unexpected token error
    pub fn unexpected(expected: impl Into<String>, found: impl ToString, pos: usize) -> Self {
        Self::UnexpectedToken {
            expected: expected.into(),
            found: found.to_string(),
            pos,
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(op: impl Into<String>, left: &str, right: &str) -> Self {
        Self::TypeMismatch {
            op: op.into(),
            left: left.to_string(),
            right: right.to_string(),
        }
    }

    /// Create a malformed arguments error
    pub fn malformed_arguments(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedArguments {
            name: name.into(),
            message: message.into(),
        }
    }
}

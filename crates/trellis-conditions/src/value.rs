//! Runtime values produced by condition expressions
//!
//! Integers stay integers when both operands are integers; any float operand
//! promotes the pair to float. Strings compare ordinally and `+` concatenates
//! them. Every other combination is a type mismatch.

use crate::error::{ExpressionError, Result};
use std::cmp::Ordering;
use std::fmt;

/// A value in the expression language
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithmeticOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
            ArithmeticOp::Rem => "%",
        }
    }
}

/// Relational operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationalOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl RelationalOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            RelationalOp::Eq => "==",
            RelationalOp::Ne => "!=",
            RelationalOp::Lt => "<",
            RelationalOp::Gt => ">",
            RelationalOp::Le => "<=",
            RelationalOp::Ge => ">=",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            RelationalOp::Eq => ordering == Ordering::Equal,
            RelationalOp::Ne => ordering != Ordering::Equal,
            RelationalOp::Lt => ordering == Ordering::Less,
            RelationalOp::Gt => ordering == Ordering::Greater,
            RelationalOp::Le => ordering != Ordering::Greater,
            RelationalOp::Ge => ordering != Ordering::Less,
        }
    }
}

impl Value {
    /// Name of the value's type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Apply an arithmetic operator
    pub fn arithmetic(&self, op: ArithmeticOp, rhs: &Value) -> Result<Value> {
        match (self, rhs) {
            (Value::Integer(a), Value::Integer(b)) => integer_arithmetic(op, *a, *b),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                // Both operands are numeric here, so the promotions cannot fail
                let a = self.as_float().unwrap_or_default();
                let b = rhs.as_float().unwrap_or_default();
                Ok(Value::Float(match op {
                    ArithmeticOp::Add => a + b,
                    ArithmeticOp::Sub => a - b,
                    ArithmeticOp::Mul => a * b,
                    ArithmeticOp::Div => a / b,
                    ArithmeticOp::Rem => a % b,
                }))
            }
            (Value::Str(a), Value::Str(b)) if op == ArithmeticOp::Add => {
                Ok(Value::Str(format!("{}{}", a, b)))
            }
            _ => Err(ExpressionError::type_mismatch(
                op.symbol(),
                self.type_name(),
                rhs.type_name(),
            )),
        }
    }

    /// Apply a relational operator
    pub fn compare(&self, op: RelationalOp, rhs: &Value) -> Result<bool> {
        let ordering = match (self, rhs) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                let a = self.as_float().unwrap_or_default();
                let b = rhs.as_float().unwrap_or_default();
                match a.partial_cmp(&b) {
                    Some(ordering) => ordering,
                    // NaN is only equal to nothing
                    None => return Ok(op == RelationalOp::Ne),
                }
            }
            (Value::Str(a), Value::Str(b)) => a.as_str().cmp(b.as_str()),
            (Value::Bool(a), Value::Bool(b))
                if matches!(op, RelationalOp::Eq | RelationalOp::Ne) =>
            {
                a.cmp(b)
            }
            _ => {
                return Err(ExpressionError::type_mismatch(
                    op.symbol(),
                    self.type_name(),
                    rhs.type_name(),
                ))
            }
        };
        Ok(op.accepts(ordering))
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

fn integer_arithmetic(op: ArithmeticOp, a: i64, b: i64) -> Result<Value> {
    let result = match op {
        ArithmeticOp::Add => a.checked_add(b),
        ArithmeticOp::Sub => a.checked_sub(b),
        ArithmeticOp::Mul => a.checked_mul(b),
        ArithmeticOp::Div | ArithmeticOp::Rem if b == 0 => {
            return Err(ExpressionError::DivisionByZero)
        }
        ArithmeticOp::Div => a.checked_div(b),
        ArithmeticOp::Rem => a.checked_rem(b),
    };
    result.map(Value::Integer).ok_or(ExpressionError::Overflow {
        op: op.symbol().to_string(),
    })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

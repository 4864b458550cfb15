//! Expression tree and evaluation

use crate::condition::{ConditionArgs, EvalContext};
use crate::error::{ExpressionError, Result};
use crate::value::{ArithmeticOp, RelationalOp, Value};
use std::collections::BTreeSet;

/// Attribute name that receives a positional call argument
pub const POSITIONAL_ARGUMENT: &str = "value";

/// A parsed condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Bare name, resolved as a context property
    Property(String),
    /// `name(args...)`, resolved as a registered condition type
    Call { name: String, args: Vec<Argument> },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Relational {
        op: RelationalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// A call argument; `name` is set for `name: expr` keyword arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: Option<String>,
    pub value: Expr,
}

impl Expr {
    /// Evaluate the expression against a context
    pub fn evaluate(&self, ctx: &dyn EvalContext) -> Result<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Property(name) => {
                ctx.property(name)
                    .ok_or_else(|| ExpressionError::UndefinedProperty {
                        name: name.clone(),
                    })
            }
            Expr::Call { name, args } => Ok(Value::Bool(evaluate_call(ctx, name, args))),
            Expr::Not(inner) => match inner.evaluate(ctx)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(ExpressionError::InvalidOperand {
                    op: "!".into(),
                    operand: other.type_name().into(),
                }),
            },
            Expr::Negate(inner) => match inner.evaluate(ctx)? {
                Value::Integer(i) => i
                    .checked_neg()
                    .map(Value::Integer)
                    .ok_or(ExpressionError::Overflow { op: "-".into() }),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(ExpressionError::InvalidOperand {
                    op: "-".into(),
                    operand: other.type_name().into(),
                }),
            },
            Expr::And(left, right) => {
                if !expect_bool("and", left.evaluate(ctx)?)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(expect_bool("and", right.evaluate(ctx)?)?))
            }
            Expr::Or(left, right) => {
                if expect_bool("or", left.evaluate(ctx)?)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(expect_bool("or", right.evaluate(ctx)?)?))
            }
            Expr::Relational { op, left, right } => {
                let l = left.evaluate(ctx)?;
                let r = right.evaluate(ctx)?;
                l.compare(*op, &r).map(Value::Bool)
            }
            Expr::Arithmetic { op, left, right } => {
                let l = left.evaluate(ctx)?;
                let r = right.evaluate(ctx)?;
                l.arithmetic(*op, &r)
            }
        }
    }

    /// Names of every condition type called by this expression
    pub fn condition_types(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect(&mut |e| {
            if let Expr::Call { name, .. } = e {
                out.insert(name.clone());
            }
        });
        out
    }

    /// Names of every context property read by this expression
    pub fn properties(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect(&mut |e| {
            if let Expr::Property(name) = e {
                out.insert(name.clone());
            }
        });
        out
    }

    fn collect(&self, visit: &mut dyn FnMut(&Expr)) {
        visit(self);
        match self {
            Expr::Literal(_) | Expr::Property(_) => {}
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.value.collect(visit);
                }
            }
            Expr::Not(inner) | Expr::Negate(inner) => inner.collect(visit),
            Expr::And(l, r)
            | Expr::Or(l, r)
            | Expr::Relational { left: l, right: r, .. }
            | Expr::Arithmetic { left: l, right: r, .. } => {
                l.collect(visit);
                r.collect(visit);
            }
        }
    }
}

fn expect_bool(op: &str, value: Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ExpressionError::InvalidOperand {
            op: op.to_string(),
            operand: other.type_name().to_string(),
        }),
    }
}

/// Invoke a custom condition. Any failure is reported and yields `false`.
fn evaluate_call(ctx: &dyn EvalContext, name: &str, args: &[Argument]) -> bool {
    let Some(condition) = ctx.condition_type(name) else {
        ctx.report_error(
            &format!("Condition '{}' is not registered", name),
            &ExpressionError::UnknownCondition {
                name: name.to_string(),
            },
        );
        return false;
    };

    let attributes = match marshal_arguments(ctx, name, args) {
        Ok(attributes) => attributes,
        Err(e) => {
            ctx.report_error(&format!("Invalid arguments for condition '{}'", name), &e);
            return false;
        }
    };

    match condition.evaluate(&attributes) {
        Ok(result) => result,
        Err(e) => {
            ctx.report_error(&format!("Error while evaluating condition '{}'", name), &e);
            false
        }
    }
}

fn marshal_arguments(ctx: &dyn EvalContext, name: &str, args: &[Argument]) -> Result<ConditionArgs> {
    let mut attributes = ConditionArgs::new();
    let mut has_positional = false;

    for arg in args {
        let key = match &arg.name {
            Some(key) => key.as_str(),
            None if has_positional => {
                return Err(ExpressionError::malformed_arguments(
                    name,
                    "only one positional argument is allowed",
                ))
            }
            None => {
                has_positional = true;
                POSITIONAL_ARGUMENT
            }
        };
        if attributes.contains(key) {
            return Err(ExpressionError::malformed_arguments(
                name,
                format!("argument '{}' given more than once", key),
            ));
        }
        let value = arg.value.evaluate(ctx)?;
        attributes.insert(key, value.to_string());
    }

    Ok(attributes)
}

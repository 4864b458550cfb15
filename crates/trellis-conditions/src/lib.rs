//! # trellis-conditions
//!
//! The condition expression language used to make extension nodes
//! conditionally visible:
//! - Tokenizer with one-token lookahead and putback
//! - Recursive-descent parser producing an expression tree
//! - Integer/float/string/boolean evaluation with type checking
//! - Custom condition types invoked as `Name(value, key: expr)`
//!
//! # Example
//!
//! ```rust
//! use trellis_conditions::{evaluate, SimpleContext, Value};
//!
//! let ctx = SimpleContext::new().with_property("count", 3i64);
//! assert_eq!(evaluate("count * 2 + 1", &ctx).unwrap(), Value::Integer(7));
//! ```

pub mod condition;
pub mod error;
pub mod expr;
pub mod parser;
pub mod token;
pub mod value;

pub use condition::{
    evaluate, ChangeSignal, Condition, ConditionArgs, ConditionType, EvalContext, SimpleContext,
    SubscriptionId,
};
pub use error::{ExpressionError, Result};
pub use expr::{Argument, Expr, POSITIONAL_ARGUMENT};
pub use value::{ArithmeticOp, RelationalOp, Value};

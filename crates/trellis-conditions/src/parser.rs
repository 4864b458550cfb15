//! Recursive-descent parser for condition expressions
//!
//! Precedence, lowest first:
//!
//! ```text
//! or
//! and
//! == != < > <= >=
//! + -
//! * / %
//! ! - (unary)
//! primary: number | 'string' | true | false | ( expr ) | name | name(args)
//! ```
//!
//! Call arguments are positional expressions or `name: expr` keyword pairs.

use crate::error::{ExpressionError, Result};
use crate::expr::{Argument, Expr};
use crate::token::{Token, TokenKind, Tokenizer};
use crate::value::{ArithmeticOp, RelationalOp, Value};

/// Parse a complete expression
pub fn parse(input: &str) -> Result<Expr> {
    let mut parser = Parser::new(input);
    let expr = parser.parse_or()?;
    let token = parser.tokens.next_token()?;
    if token.kind != TokenKind::Eof {
        return Err(ExpressionError::unexpected(
            "end of input",
            &token.kind,
            token.pos,
        ));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: Tokenizer<'a>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            tokens: Tokenizer::new(input),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.tokens.peek()?.kind == TokenKind::Or {
            self.tokens.next_token()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_relational()?;
        while self.tokens.peek()?.kind == TokenKind::And {
            self.tokens.next_token()?;
            let right = self.parse_relational()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.tokens.peek()?.kind {
                TokenKind::Eq => RelationalOp::Eq,
                TokenKind::Ne => RelationalOp::Ne,
                TokenKind::Lt => RelationalOp::Lt,
                TokenKind::Gt => RelationalOp::Gt,
                TokenKind::Le => RelationalOp::Le,
                TokenKind::Ge => RelationalOp::Ge,
                _ => return Ok(left),
            };
            self.tokens.next_token()?;
            let right = self.parse_additive()?;
            left = Expr::Relational {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.tokens.peek()?.kind {
                TokenKind::Plus => ArithmeticOp::Add,
                TokenKind::Minus => ArithmeticOp::Sub,
                _ => return Ok(left),
            };
            self.tokens.next_token()?;
            let right = self.parse_multiplicative()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.tokens.peek()?.kind {
                TokenKind::Star => ArithmeticOp::Mul,
                TokenKind::Slash => ArithmeticOp::Div,
                TokenKind::Percent => ArithmeticOp::Rem,
                _ => return Ok(left),
            };
            self.tokens.next_token()?;
            let right = self.parse_unary()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.tokens.peek()?.kind {
            TokenKind::Not => {
                self.tokens.next_token()?;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            TokenKind::Minus => {
                self.tokens.next_token()?;
                Ok(Expr::Negate(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.tokens.next_token()?;
        match token.kind {
            TokenKind::Integer(i) => Ok(Expr::Literal(Value::Integer(i))),
            TokenKind::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            TokenKind::Bool(b) => Ok(Expr::Literal(Value::Bool(b))),
            TokenKind::LParen => {
                let expr = self.parse_or()?;
                self.expect(TokenKind::RParen, ")")?;
                Ok(expr)
            }
            TokenKind::Ident(name) => {
                if self.tokens.peek()?.kind == TokenKind::LParen {
                    self.tokens.next_token()?;
                    let args = self.parse_arguments()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Property(name))
                }
            }
            other => Err(ExpressionError::unexpected("an operand", &other, token.pos)),
        }
    }

    /// Parse call arguments after the opening parenthesis
    fn parse_arguments(&mut self) -> Result<Vec<Argument>> {
        let mut args = Vec::new();
        if self.tokens.peek()?.kind == TokenKind::RParen {
            self.tokens.next_token()?;
            return Ok(args);
        }

        loop {
            args.push(self.parse_argument()?);
            let token = self.tokens.next_token()?;
            match token.kind {
                TokenKind::Comma => continue,
                TokenKind::RParen => return Ok(args),
                other => return Err(ExpressionError::unexpected("',' or ')'", &other, token.pos)),
            }
        }
    }

    fn parse_argument(&mut self) -> Result<Argument> {
        let first = self.tokens.next_token()?;
        if let TokenKind::Ident(name) = &first.kind {
            if self.tokens.peek()?.kind == TokenKind::Colon {
                self.tokens.next_token()?;
                let value = self.parse_or()?;
                return Ok(Argument {
                    name: Some(name.clone()),
                    value,
                });
            }
        }
        self.tokens.putback(first);
        Ok(Argument {
            name: None,
            value: self.parse_or()?,
        })
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token> {
        let token = self.tokens.next_token()?;
        if token.kind == kind {
            Ok(token)
        } else {
            Err(ExpressionError::unexpected(expected, &token.kind, token.pos))
        }
    }
}

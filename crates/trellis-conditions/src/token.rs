//! Condition expression tokenizer
//!
//! Scans numbers, single-quoted strings, identifiers and operators. The
//! tokenizer keeps one token of lookahead and a putback slot so the parser can
//! push a token back after peeking past it (needed for `name: expr` keyword
//! arguments).

use crate::error::{ExpressionError, Result};
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

/// Token kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Integer(i64),
    Float(f64),
    /// Single-quoted string literal
    Str(String),
    /// Identifier (property or condition name)
    Ident(String),
    /// `true` / `false`, case-insensitive
    Bool(bool),
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Not,
    LParen,
    RParen,
    Comma,
    Colon,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Integer(i) => write!(f, "{}", i),
            TokenKind::Float(v) => write!(f, "{}", v),
            TokenKind::Str(s) => write!(f, "'{}'", s),
            TokenKind::Ident(s) => write!(f, "{}", s),
            TokenKind::Bool(b) => write!(f, "{}", b),
            TokenKind::And => write!(f, "and"),
            TokenKind::Or => write!(f, "or"),
            TokenKind::Eq => write!(f, "=="),
            TokenKind::Ne => write!(f, "!="),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::Le => write!(f, "<="),
            TokenKind::Ge => write!(f, ">="),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::Not => write!(f, "!"),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

/// Token with its starting byte offset
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

impl Token {
    pub fn new(kind: TokenKind, pos: usize) -> Self {
        Self { kind, pos }
    }
}

/// Tokenizer over a condition expression
pub struct Tokenizer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    lookahead: Option<Token>,
    putback: Option<Token>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            lookahead: None,
            putback: None,
        }
    }

    /// Tokenize the whole input, ending with `Eof`
    pub fn tokenize(input: &str) -> Result<Vec<Token>> {
        let mut tokenizer = Tokenizer::new(input);
        let mut tokens = Vec::new();
        loop {
            let token = tokenizer.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    /// Consume and return the next token
    pub fn next_token(&mut self) -> Result<Token> {
        if let Some(token) = self.putback.take() {
            return Ok(token);
        }
        if let Some(token) = self.lookahead.take() {
            return Ok(token);
        }
        self.scan()
    }

    /// Return the next token without consuming it
    pub fn peek(&mut self) -> Result<Token> {
        if let Some(token) = &self.putback {
            return Ok(token.clone());
        }
        if let Some(token) = &self.lookahead {
            return Ok(token.clone());
        }
        let token = self.scan()?;
        self.lookahead = Some(token.clone());
        Ok(token)
    }

    /// Push a consumed token back; it is returned by the next call to
    /// [`next_token`](Self::next_token) or [`peek`](Self::peek)
    pub fn putback(&mut self, token: Token) {
        debug_assert!(self.putback.is_none(), "putback slot already occupied");
        self.putback = Some(token);
    }

    fn scan(&mut self) -> Result<Token> {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }

        let (start, c) = match self.chars.next() {
            Some(next) => next,
            None => return Ok(Token::new(TokenKind::Eof, self.input.len())),
        };

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => {
                if self.eat('=') {
                    TokenKind::Eq
                } else {
                    return Err(ExpressionError::UnexpectedChar { ch: c, pos: start });
                }
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::Ne
                } else {
                    TokenKind::Not
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '\'' => self.read_string(start)?,
            c if c.is_ascii_digit() => self.read_number(start)?,
            c if is_ident_start(c) => self.read_word(start),
            other => return Err(ExpressionError::UnexpectedChar { ch: other, pos: start }),
        };

        Ok(Token::new(kind, start))
    }

    fn eat(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some(&(_, c)) if c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn current_pos(&mut self) -> usize {
        self.chars
            .peek()
            .map(|&(i, _)| i)
            .unwrap_or(self.input.len())
    }

    fn read_string(&mut self, start: usize) -> Result<TokenKind> {
        let mut value = String::new();
        loop {
            match self.chars.next() {
                // A doubled quote inside a literal stands for one quote
                Some((_, '\'')) if self.eat('\'') => value.push('\''),
                Some((_, '\'')) => return Ok(TokenKind::Str(value)),
                Some((_, c)) => value.push(c),
                None => return Err(ExpressionError::UnterminatedString { pos: start }),
            }
        }
    }

    fn read_number(&mut self, start: usize) -> Result<TokenKind> {
        let mut is_float = false;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                self.chars.next();
            } else if c == '.' && !is_float {
                // Only a decimal point when a digit follows it
                let next_is_digit = self.input[i + 1..]
                    .chars()
                    .next()
                    .is_some_and(|n| n.is_ascii_digit());
                if !next_is_digit {
                    break;
                }
                is_float = true;
                self.chars.next();
            } else {
                break;
            }
        }

        let end = self.current_pos();
        let text = &self.input[start..end];
        let invalid = || ExpressionError::InvalidNumber {
            text: text.to_string(),
            pos: start,
        };
        if is_float {
            text.parse::<f64>().map(TokenKind::Float).map_err(|_| invalid())
        } else {
            text.parse::<i64>()
                .map(TokenKind::Integer)
                .map_err(|_| invalid())
        }
    }

    fn read_word(&mut self, start: usize) -> TokenKind {
        while let Some(&(_, c)) = self.chars.peek() {
            if is_ident_char(c) {
                self.chars.next();
            } else {
                break;
            }
        }
        let end = self.current_pos();
        let word = &self.input[start..end];

        if word.eq_ignore_ascii_case("and") {
            TokenKind::And
        } else if word.eq_ignore_ascii_case("or") {
            TokenKind::Or
        } else if word.eq_ignore_ascii_case("true") {
            TokenKind::Bool(true)
        } else if word.eq_ignore_ascii_case("false") {
            TokenKind::Bool(false)
        } else {
            TokenKind::Ident(word.to_string())
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

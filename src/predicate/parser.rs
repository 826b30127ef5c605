//! Expression front end: tokens to AST.
//!
//! Precedence climbing over the binary operators, with primaries being
//! literals, (dotted) identifiers, calls and parenthesized expressions.

use crate::predicate::error::PredicateError;
use crate::predicate::lexer::{tokenize, BinaryOp, Spanned, Token};

/// Deepest expression tree accepted, counting parentheses, call arguments
/// and chained binary operators.
pub const MAX_NESTING: usize = 128;

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    /// Plain or dotted identifier, e.g. `Attempts` or `http.Method`.
    Ident(String),
    Call { function: String, args: Vec<Expr> },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Paren(Box<Expr>),
}

impl Expr {
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Int(_) => "integer literal",
            Expr::Float(_) => "float literal",
            Expr::Str(_) => "string literal",
            Expr::Ident(_) => "identifier",
            Expr::Call { .. } => "call",
            Expr::Binary { .. } => "binary expression",
            Expr::Paren(_) => "parenthesized expression",
        }
    }
}

pub fn parse_expr(src: &str) -> Result<Expr, PredicateError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expression(1)?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.error(format!("unexpected {} after expression", other.describe()))),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].token.clone();
        if !matches!(token, Token::Eof) {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: String) -> PredicateError {
        PredicateError::Syntax {
            offset: self.tokens[self.pos].offset,
            message,
        }
    }

    fn enter(&mut self) -> Result<(), PredicateError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error(format!(
                "expression nested too deeply (limit {})",
                MAX_NESTING
            )));
        }
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> Result<(), PredicateError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {}, found {}",
                expected.describe(),
                self.peek().describe()
            )))
        }
    }

    fn expression(&mut self, min_precedence: u8) -> Result<Expr, PredicateError> {
        let mut lhs = self.primary()?;
        let mut chained = 0;
        loop {
            let op = match self.peek() {
                Token::Op(op) if op.precedence() >= min_precedence => *op,
                _ => break,
            };
            self.advance();
            // Each operator adds a level to the left-leaning tree.
            self.enter()?;
            chained += 1;
            let rhs = self.expression(op.precedence() + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth -= chained;
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Expr, PredicateError> {
        match self.advance() {
            Token::Int(v) => Ok(Expr::Int(v)),
            Token::Float(v) => Ok(Expr::Float(v)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::LParen => {
                self.enter()?;
                let inner = self.expression(1)?;
                self.depth -= 1;
                self.expect(Token::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            Token::Ident(first) => {
                let mut name = first;
                while *self.peek() == Token::Dot {
                    self.advance();
                    match self.advance() {
                        Token::Ident(part) => {
                            name.push('.');
                            name.push_str(&part);
                        }
                        other => {
                            return Err(self.error(format!(
                                "expected identifier after '.', found {}",
                                other.describe()
                            )))
                        }
                    }
                }
                if *self.peek() == Token::LParen {
                    self.advance();
                    self.enter()?;
                    let args = self.arguments()?;
                    self.depth -= 1;
                    Ok(Expr::Call { function: name, args })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            other => {
                if self.pos > 0 && !matches!(other, Token::Eof) {
                    self.pos -= 1;
                }
                Err(self.error(format!("unexpected {}", other.describe())))
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, PredicateError> {
        let mut args = Vec::new();
        if *self.peek() == Token::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.expression(1)?);
            match self.advance() {
                Token::Comma => continue,
                Token::RParen => return Ok(args),
                other => {
                    return Err(self.error(format!(
                        "expected ',' or ')' in argument list, found {}",
                        other.describe()
                    )))
                }
            }
        }
    }
}

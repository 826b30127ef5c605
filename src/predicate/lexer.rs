//! Tokenizer for condition expressions.

use crate::predicate::error::PredicateError;

/// Binary operators understood by the grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOp {
    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            _ => 3,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
        }
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Op(BinaryOp),
    Dot,
    Comma,
    LParen,
    RParen,
    Eof,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Int(v) => format!("integer {}", v),
            Token::Float(v) => format!("float {}", v),
            Token::Str(s) => format!("string {:?}", s),
            Token::Ident(name) => format!("identifier {}", name),
            Token::Op(op) => format!("operator {}", op),
            Token::Dot => "'.'".to_string(),
            Token::Comma => "','".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Eof => "end of input".to_string(),
        }
    }
}

/// A token together with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub fn tokenize(src: &str) -> Result<Vec<Spanned>, PredicateError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        let token = match c {
            b'(' => {
                pos += 1;
                Token::LParen
            }
            b')' => {
                pos += 1;
                Token::RParen
            }
            b',' => {
                pos += 1;
                Token::Comma
            }
            b'.' if !bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) => {
                pos += 1;
                Token::Dot
            }
            b'&' | b'|' | b'=' | b'!' | b'<' | b'>' => {
                let (op, len) = operator(bytes, pos)?;
                pos += len;
                Token::Op(op)
            }
            b'"' => {
                let (value, end) = quoted(src, pos)?;
                pos = end;
                Token::Str(value)
            }
            b'`' => {
                let rest = &src[pos + 1..];
                let end = rest.find('`').ok_or_else(|| syntax(pos, "unterminated raw string"))?;
                pos += end + 2;
                Token::Str(rest[..end].to_string())
            }
            b'0'..=b'9' | b'.' => {
                let (token, end) = number(src, pos)?;
                pos = end;
                token
            }
            c if c == b'_' || c.is_ascii_alphabetic() => {
                while pos < bytes.len() && (bytes[pos] == b'_' || bytes[pos].is_ascii_alphanumeric()) {
                    pos += 1;
                }
                Token::Ident(src[start..pos].to_string())
            }
            _ => {
                let ch = src[pos..].chars().next().unwrap_or('?');
                return Err(syntax(pos, format!("unexpected character {:?}", ch)));
            }
        };
        tokens.push(Spanned { token, offset: start });
    }

    tokens.push(Spanned {
        token: Token::Eof,
        offset: bytes.len(),
    });
    Ok(tokens)
}

fn operator(bytes: &[u8], pos: usize) -> Result<(BinaryOp, usize), PredicateError> {
    let next = bytes.get(pos + 1).copied();
    match (bytes[pos], next) {
        (b'&', Some(b'&')) => Ok((BinaryOp::And, 2)),
        (b'|', Some(b'|')) => Ok((BinaryOp::Or, 2)),
        (b'=', Some(b'=')) => Ok((BinaryOp::Eq, 2)),
        (b'!', Some(b'=')) => Ok((BinaryOp::Neq, 2)),
        (b'<', Some(b'=')) => Ok((BinaryOp::Le, 2)),
        (b'>', Some(b'=')) => Ok((BinaryOp::Ge, 2)),
        (b'<', _) => Ok((BinaryOp::Lt, 1)),
        (b'>', _) => Ok((BinaryOp::Gt, 1)),
        (c, _) => Err(syntax(pos, format!("unsupported operator token {:?}", c as char))),
    }
}

fn quoted(src: &str, start: usize) -> Result<(String, usize), PredicateError> {
    let mut out = String::new();
    let mut chars = src[start + 1..].char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((out, start + 1 + i + 1)),
            '\\' => {
                let (_, esc) = chars
                    .next()
                    .ok_or_else(|| syntax(start, "unterminated string literal"))?;
                out.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '\\' => '\\',
                    '"' => '"',
                    other => {
                        return Err(syntax(start + 1 + i, format!("unknown escape \\{}", other)));
                    }
                });
            }
            '\n' => return Err(syntax(start + 1 + i, "newline in string literal")),
            c => out.push(c),
        }
    }
    Err(syntax(start, "unterminated string literal"))
}

fn number(src: &str, start: usize) -> Result<(Token, usize), PredicateError> {
    let bytes = src.as_bytes();
    let mut pos = start;
    let mut is_float = false;
    while pos < bytes.len() {
        match bytes[pos] {
            b'0'..=b'9' | b'_' => pos += 1,
            b'.' if !is_float => {
                is_float = true;
                pos += 1;
            }
            b'e' | b'E' => {
                is_float = true;
                pos += 1;
                if matches!(bytes.get(pos), Some(b'+') | Some(b'-')) {
                    pos += 1;
                }
            }
            _ => break,
        }
    }
    if bytes.get(pos).is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') {
        return Err(syntax(pos, "malformed number"));
    }

    let text: String = src[start..pos].chars().filter(|c| *c != '_').collect();
    let token = if is_float {
        Token::Float(text.parse().map_err(|_| syntax(start, format!("malformed float {:?}", text)))?)
    } else {
        Token::Int(text.parse().map_err(|_| syntax(start, format!("malformed integer {:?}", text)))?)
    };
    Ok((token, pos))
}

fn syntax(offset: usize, message: impl Into<String>) -> PredicateError {
    PredicateError::Syntax {
        offset,
        message: message.into(),
    }
}

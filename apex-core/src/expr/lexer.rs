//! Tokenizer for the APEX expression language

use crate::error::{ApexError, ExpressionErrorKind, Result};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Integer literal
    Int(i64),
    /// Decimal literal
    Decimal(Decimal),
    /// Quoted string literal
    String(String),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// Bare identifier (property and method names)
    Ident(String),
    /// `#name` variable sigil + name
    Variable(String),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `?.`
    SafeNav,
    /// `.![` or `![` — projection opener
    ProjectOpen,
    /// `.?[` or `?[` — filter opener
    SelectOpen,
    /// `.^[` or `^[` — first-match opener
    FirstMatchOpen,
    /// `?`
    Question,
    /// `:`
    Colon,
    /// `!`
    Bang,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
}

fn syntax_error(message: impl Into<String>) -> ApexError {
    ApexError::expression(ExpressionErrorKind::Syntax, message)
}

/// Tokenize an expression source string.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '.' => {
                // Dotted collection operators: .![  .?[  .^[
                match (bytes.get(i + 1).map(|b| *b as char), bytes.get(i + 2).map(|b| *b as char)) {
                    (Some('!'), Some('[')) => {
                        tokens.push(Token::ProjectOpen);
                        i += 3;
                    }
                    (Some('?'), Some('[')) => {
                        tokens.push(Token::SelectOpen);
                        i += 3;
                    }
                    (Some('^'), Some('[')) => {
                        tokens.push(Token::FirstMatchOpen);
                        i += 3;
                    }
                    _ => {
                        tokens.push(Token::Dot);
                        i += 1;
                    }
                }
            }
            '?' => match bytes.get(i + 1).map(|b| *b as char) {
                Some('.') => {
                    tokens.push(Token::SafeNav);
                    i += 2;
                }
                Some('[') => {
                    tokens.push(Token::SelectOpen);
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Question);
                    i += 1;
                }
            },
            '!' => match bytes.get(i + 1).map(|b| *b as char) {
                Some('=') => {
                    tokens.push(Token::NotEq);
                    i += 2;
                }
                Some('[') => {
                    tokens.push(Token::ProjectOpen);
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            },
            '^' => {
                if bytes.get(i + 1).map(|b| *b as char) == Some('[') {
                    tokens.push(Token::FirstMatchOpen);
                    i += 2;
                } else {
                    return Err(syntax_error(format!("unexpected character '^' at offset {i}")));
                }
            }
            '&' => {
                if bytes.get(i + 1).map(|b| *b as char) == Some('&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(syntax_error(format!("unexpected character '&' at offset {i}")));
                }
            }
            '|' => {
                if bytes.get(i + 1).map(|b| *b as char) == Some('|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(syntax_error(format!("unexpected character '|' at offset {i}")));
                }
            }
            '=' => {
                if bytes.get(i + 1).map(|b| *b as char) == Some('=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(syntax_error("single '=' is not an operator; use '=='"));
                }
            }
            '<' => {
                if bytes.get(i + 1).map(|b| *b as char) == Some('=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1).map(|b| *b as char) == Some('=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                let mut literal = String::new();
                loop {
                    match bytes.get(j).map(|b| *b as char) {
                        None => return Err(syntax_error("unterminated string literal")),
                        Some('\\') => {
                            match bytes.get(j + 1).map(|b| *b as char) {
                                Some('n') => literal.push('\n'),
                                Some('t') => literal.push('\t'),
                                Some(other) => literal.push(other),
                                None => return Err(syntax_error("unterminated escape sequence")),
                            }
                            j += 2;
                        }
                        Some(ch) if ch == quote => break,
                        Some(ch) => {
                            literal.push(ch);
                            j += ch.len_utf8();
                        }
                    }
                }
                tokens.push(Token::String(literal));
                i = j + 1;
            }
            '#' => {
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && is_ident_char(bytes[j] as char) {
                    j += 1;
                }
                if j == start {
                    return Err(syntax_error("'#' must be followed by a variable name"));
                }
                tokens.push(Token::Variable(source[start..j].to_string()));
                i = j;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut j = i;
                let mut seen_dot = false;
                while j < bytes.len() {
                    let ch = bytes[j] as char;
                    if ch.is_ascii_digit() {
                        j += 1;
                    } else if ch == '.'
                        && !seen_dot
                        && bytes.get(j + 1).map(|b| (*b as char).is_ascii_digit()).unwrap_or(false)
                    {
                        seen_dot = true;
                        j += 1;
                    } else {
                        break;
                    }
                }
                let text = &source[start..j];
                if seen_dot {
                    let value = Decimal::from_str(text)
                        .map_err(|e| syntax_error(format!("invalid decimal literal '{text}': {e}")))?;
                    tokens.push(Token::Decimal(value));
                } else {
                    let value = text
                        .parse::<i64>()
                        .map_err(|e| syntax_error(format!("invalid integer literal '{text}': {e}")))?;
                    tokens.push(Token::Int(value));
                }
                i = j;
            }
            c if is_ident_start(c) => {
                let start = i;
                let mut j = i;
                while j < bytes.len() && is_ident_char(bytes[j] as char) {
                    j += 1;
                }
                let word = &source[start..j];
                tokens.push(match word {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word.to_string()),
                });
                i = j;
            }
            other => {
                return Err(syntax_error(format!("unexpected character '{other}' at offset {i}")));
            }
        }
    }

    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

//! Recursive-descent parser for the APEX expression language

use crate::error::{ApexError, ExpressionErrorKind, Result};
use crate::expr::ast::{BinaryOp, Expr, UnaryOp};
use crate::expr::lexer::{tokenize, Token};
use crate::types::Value;
use std::sync::Arc;

/// Parse an expression source string into an AST.
pub fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.ternary()?;
    if parser.pos != parser.tokens.len() {
        return Err(syntax_error(format!(
            "trailing input after expression: {:?}",
            parser.tokens[parser.pos]
        ))
        .with_expression(source));
    }
    Ok(expr)
}

fn syntax_error(message: impl Into<String>) -> ApexError {
    ApexError::expression(ExpressionErrorKind::Syntax, message)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(syntax_error(format!(
                "expected {:?}, found {:?}",
                expected,
                self.peek()
            )))
        }
    }

    fn ternary(&mut self) -> Result<Expr> {
        let condition = self.or()?;
        if self.eat(&Token::Question) {
            let if_true = self.ternary()?;
            self.expect(Token::Colon)?;
            let if_false = self.ternary()?;
            Ok(Expr::Ternary {
                condition: Box::new(condition),
                if_true: Box::new(if_true),
                if_false: Box::new(if_false),
            })
        } else {
            Ok(condition)
        }
    }

    fn or(&mut self) -> Result<Expr> {
        let mut left = self.and()?;
        while self.eat(&Token::OrOr) {
            let right = self.and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let right = self.equality()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let right = self.comparison()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let right = self.additive()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Bang) => {
                self.pos += 1;
                let operand = self.unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                })
            }
            Some(Token::Minus) => {
                self.pos += 1;
                let operand = self.unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                })
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) | Some(Token::SafeNav) => {
                    let safe = self.peek() == Some(&Token::SafeNav);
                    self.pos += 1;
                    let name = match self.advance() {
                        Some(Token::Ident(name)) => name,
                        other => {
                            return Err(syntax_error(format!(
                                "expected property or method name after '{}', found {other:?}",
                                if safe { "?." } else { "." }
                            )))
                        }
                    };
                    if self.eat(&Token::LParen) {
                        let args = self.call_args()?;
                        expr = Expr::Method {
                            target: Box::new(expr),
                            name: Arc::from(name.into_boxed_str()),
                            args,
                            safe,
                        };
                    } else {
                        expr = Expr::Property {
                            target: Box::new(expr),
                            name: Arc::from(name.into_boxed_str()),
                            safe,
                        };
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.ternary()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Some(Token::ProjectOpen) => {
                    self.pos += 1;
                    let body = self.ternary()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Project {
                        target: Box::new(expr),
                        body: Box::new(body),
                    };
                }
                Some(Token::SelectOpen) => {
                    self.pos += 1;
                    let body = self.ternary()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Select {
                        target: Box::new(expr),
                        body: Box::new(body),
                    };
                }
                Some(Token::FirstMatchOpen) => {
                    self.pos += 1;
                    let body = self.ternary()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::FirstMatch {
                        target: Box::new(expr),
                        body: Box::new(body),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn call_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.ternary()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RParen)?;
            break;
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
            Some(Token::Decimal(d)) => Ok(Expr::Literal(Value::Decimal(d))),
            Some(Token::String(s)) => Ok(Expr::Literal(Value::string(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Variable(name)) => Ok(Expr::Variable(Arc::from(name.into_boxed_str()))),
            Some(Token::LParen) => {
                let inner = self.ternary()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBrace) => {
                let mut items = Vec::new();
                if self.eat(&Token::RBrace) {
                    return Ok(Expr::SetLiteral(items));
                }
                loop {
                    items.push(self.ternary()?);
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    self.expect(Token::RBrace)?;
                    break;
                }
                Ok(Expr::SetLiteral(items))
            }
            other => Err(syntax_error(format!("unexpected token {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_ternary_right_associative() {
        let expr = parse("#a > 1 ? 'x' : #a > 0 ? 'y' : 'z'").unwrap();
        match expr {
            Expr::Ternary { if_false, .. } => {
                assert!(matches!(*if_false, Expr::Ternary { .. }));
            }
            other => panic!("expected ternary, got {other:?}"),
        }
    }

    #[test]
    fn parses_safe_navigation_chain() {
        let expr = parse("#trade?.counterparty?.name").unwrap();
        match expr {
            Expr::Property { safe, .. } => assert!(safe),
            other => panic!("expected property, got {other:?}"),
        }
    }

    #[test]
    fn parses_method_with_args() {
        let expr = parse("#name.contains('LLC')").unwrap();
        match expr {
            Expr::Method { name, args, safe, .. } => {
                assert_eq!(name.as_ref(), "contains");
                assert_eq!(args.len(), 1);
                assert!(!safe);
            }
            other => panic!("expected method, got {other:?}"),
        }
    }

    #[test]
    fn parses_set_literal_contains() {
        let expr = parse("{'A','B','C'}.contains(#code)").unwrap();
        assert!(matches!(expr, Expr::Method { .. }));
    }

    #[test]
    fn parses_collection_operators() {
        assert!(matches!(parse("#xs.![#this * 2]").unwrap(), Expr::Project { .. }));
        assert!(matches!(parse("#xs.?[#this > 5]").unwrap(), Expr::Select { .. }));
        assert!(matches!(parse("#xs.^[#this > 5]").unwrap(), Expr::FirstMatch { .. }));
    }

    #[test]
    fn precedence_and_over_or() {
        let expr = parse("#a || #b && #c").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Or, right, .. } => {
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::And, .. }));
            }
            other => panic!("expected or at the top, got {other:?}"),
        }
    }

    #[test]
    fn rejects_trailing_tokens() {
        assert!(parse("#a #b").is_err());
    }

    #[test]
    fn rejects_missing_colon() {
        let err = parse("#a ? 1").unwrap_err();
        assert_eq!(err.expression_kind(), Some(crate::error::ExpressionErrorKind::Syntax));
    }
}

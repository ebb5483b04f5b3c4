//! AST for the APEX expression language

use crate::types::Value;
use std::sync::Arc;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `||`
    Or,
    /// `&&`
    And,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
}

impl BinaryOp {
    /// Operator spelling for error messages
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `-`
    Neg,
}

/// Expression tree
///
/// Compiled once per verbatim source string and shared via the expression
/// cache; evaluation never mutates the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value
    Literal(Value),
    /// `#name` variable reference
    Variable(Arc<str>),
    /// `{'A', 'B'}` set literal
    SetLiteral(Vec<Expr>),
    /// Unary operation
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// Binary operation
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `cond ? a : b`
    Ternary {
        condition: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    /// Property access, `target.name` or `target?.name`
    Property {
        target: Box<Expr>,
        name: Arc<str>,
        safe: bool,
    },
    /// Method call, `target.name(args)` or `target?.name(args)`
    Method {
        target: Box<Expr>,
        name: Arc<str>,
        args: Vec<Expr>,
        safe: bool,
    },
    /// Index access, `target[i]` or `target['k']`
    Index { target: Box<Expr>, index: Box<Expr> },
    /// Collection projection, `target.![expr]`
    Project { target: Box<Expr>, body: Box<Expr> },
    /// Collection filter, `target.?[expr]`
    Select { target: Box<Expr>, body: Box<Expr> },
    /// First match, `target.^[expr]`
    FirstMatch { target: Box<Expr>, body: Box<Expr> },
}

impl Expr {
    /// Variable names referenced anywhere in the tree.
    pub fn referenced_variables(&self) -> Vec<Arc<str>> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names.sort();
        names.dedup();
        names
    }

    fn collect_variables(&self, out: &mut Vec<Arc<str>>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Variable(name) => out.push(name.clone()),
            Expr::SetLiteral(items) => {
                for item in items {
                    item.collect_variables(out);
                }
            }
            Expr::Unary { operand, .. } => operand.collect_variables(out),
            Expr::Binary { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expr::Ternary {
                condition,
                if_true,
                if_false,
            } => {
                condition.collect_variables(out);
                if_true.collect_variables(out);
                if_false.collect_variables(out);
            }
            Expr::Property { target, .. } => target.collect_variables(out),
            Expr::Method { target, args, .. } => {
                target.collect_variables(out);
                for arg in args {
                    arg.collect_variables(out);
                }
            }
            Expr::Index { target, index } => {
                target.collect_variables(out);
                index.collect_variables(out);
            }
            Expr::Project { target, body }
            | Expr::Select { target, body }
            | Expr::FirstMatch { target, body } => {
                target.collect_variables(out);
                body.collect_variables(out);
            }
        }
    }
}

//! Tree-walking interpreter for compiled expressions

use crate::clock::Clock;
use crate::error::{ApexError, ExpressionErrorKind, Result};
use crate::expr::ast::{BinaryOp, Expr, UnaryOp};
use crate::expr::functions::AccessorRegistry;
use crate::types::{FactContext, Value};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::time::Instant;

/// Requested return type for an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeHint {
    /// No coercion
    #[default]
    Any,
    /// Coerce to boolean (null is false, other values use truthiness)
    Bool,
    /// Integral number
    Int,
    /// Decimal number (integers promote)
    Decimal,
    /// Scalar rendered as a string
    String,
    /// Sequence
    List,
    /// Mapping
    Map,
    /// Point in time
    DateTime,
}

/// Evaluation deadline carried through sub-expression boundaries.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    /// Instant after which evaluation must stop
    pub at: Instant,
    /// Original budget, reported in the timeout error
    pub budget_ms: u64,
}

impl Deadline {
    /// Deadline expiring `budget_ms` from now.
    pub fn from_millis(budget_ms: u64) -> Self {
        Deadline {
            at: Instant::now() + std::time::Duration::from_millis(budget_ms),
            budget_ms,
        }
    }

    /// Error if the deadline has passed.
    pub fn check(&self) -> Result<()> {
        if Instant::now() >= self.at {
            Err(ApexError::Timeout(self.budget_ms))
        } else {
            Ok(())
        }
    }
}

/// Interpreter over a compiled expression tree.
///
/// Pure with respect to the variable context and clock; the only stateful
/// input is the deadline, which is checked between sub-expressions.
pub struct Evaluator<'a> {
    clock: &'a dyn Clock,
    accessors: &'a AccessorRegistry,
    deadline: Option<Deadline>,
}

impl<'a> Evaluator<'a> {
    /// Build an evaluator over a clock and accessor registry.
    pub fn new(clock: &'a dyn Clock, accessors: &'a AccessorRegistry) -> Self {
        Evaluator {
            clock,
            accessors,
            deadline: None,
        }
    }

    /// Attach an evaluation deadline.
    pub fn with_deadline(mut self, deadline: Option<Deadline>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Evaluate an expression against a variable context.
    pub fn evaluate(&self, expr: &Expr, vars: &FactContext) -> Result<Value> {
        if let Some(deadline) = &self.deadline {
            deadline.check()?;
        }
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable(name) => Ok(vars.get(name.as_ref()).cloned().unwrap_or(Value::Null)),
            Expr::SetLiteral(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.evaluate(item, vars)?);
                }
                Ok(Value::list(values))
            }
            Expr::Unary { op, operand } => {
                let value = self.evaluate(operand, vars)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        Value::Int(i) => Ok(Value::Int(-i)),
                        Value::Decimal(d) => Ok(Value::Decimal(-d)),
                        other => Err(ApexError::expression(
                            ExpressionErrorKind::TypeCoercion,
                            format!("cannot negate {}", other.type_name()),
                        )),
                    },
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, vars),
            Expr::Ternary {
                condition,
                if_true,
                if_false,
            } => {
                if self.evaluate(condition, vars)?.is_truthy() {
                    self.evaluate(if_true, vars)
                } else {
                    self.evaluate(if_false, vars)
                }
            }
            Expr::Property { target, name, safe } => {
                let value = self.evaluate(target, vars)?;
                if value.is_null() {
                    return if *safe {
                        Ok(Value::Null)
                    } else {
                        Err(ApexError::expression(
                            ExpressionErrorKind::NullDereference,
                            format!("property '{name}' accessed on null"),
                        ))
                    };
                }
                self.property(&value, name)
            }
            Expr::Method {
                target,
                name,
                args,
                safe,
            } => {
                // A call on a bare variable that names an accessor namespace
                // dispatches to the registry (#dateTime.now(), #uuid.random()).
                if let Expr::Variable(var_name) = target.as_ref() {
                    if !vars.contains_key(var_name.as_ref()) {
                        if let Some(accessor) = self.accessors.get(var_name) {
                            let arg_values = self.eval_args(args, vars)?;
                            return accessor.call(name, &arg_values, self.clock);
                        }
                    }
                }
                let value = self.evaluate(target, vars)?;
                if value.is_null() {
                    return if *safe {
                        Ok(Value::Null)
                    } else {
                        Err(ApexError::expression(
                            ExpressionErrorKind::NullDereference,
                            format!("method '{name}' called on null"),
                        ))
                    };
                }
                let arg_values = self.eval_args(args, vars)?;
                self.call_method(&value, name, &arg_values)
            }
            Expr::Index { target, index } => {
                let value = self.evaluate(target, vars)?;
                let index = self.evaluate(index, vars)?;
                self.index(&value, &index)
            }
            Expr::Project { target, body } => {
                let items = self.collection_operand(target, vars, "projection")?;
                let mut projected = Vec::with_capacity(items.len());
                for item in items.iter() {
                    let scope = element_scope(vars, item);
                    projected.push(self.evaluate(body, &scope)?);
                }
                Ok(Value::list(projected))
            }
            Expr::Select { target, body } => {
                let items = self.collection_operand(target, vars, "filter")?;
                let mut selected = Vec::new();
                for item in items.iter() {
                    let scope = element_scope(vars, item);
                    if self.evaluate(body, &scope)?.is_truthy() {
                        selected.push(item.clone());
                    }
                }
                Ok(Value::list(selected))
            }
            Expr::FirstMatch { target, body } => {
                let items = self.collection_operand(target, vars, "first-match")?;
                for item in items.iter() {
                    let scope = element_scope(vars, item);
                    if self.evaluate(body, &scope)?.is_truthy() {
                        return Ok(item.clone());
                    }
                }
                Ok(Value::Null)
            }
        }
    }

    /// Evaluate and coerce to the requested type.
    pub fn evaluate_with_hint(&self, expr: &Expr, vars: &FactContext, hint: TypeHint) -> Result<Value> {
        let value = self.evaluate(expr, vars)?;
        coerce(value, hint)
    }

    fn eval_args(&self, args: &[Expr], vars: &FactContext) -> Result<Vec<Value>> {
        args.iter().map(|arg| self.evaluate(arg, vars)).collect()
    }

    fn collection_operand(
        &self,
        target: &Expr,
        vars: &FactContext,
        operation: &str,
    ) -> Result<std::sync::Arc<[Value]>> {
        match self.evaluate(target, vars)? {
            Value::List(items) => Ok(items),
            Value::Null => Err(ApexError::expression(
                ExpressionErrorKind::NullDereference,
                format!("{operation} applied to null"),
            )),
            other => Err(ApexError::expression(
                ExpressionErrorKind::TypeCoercion,
                format!("{operation} requires a list, found {}", other.type_name()),
            )),
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr, vars: &FactContext) -> Result<Value> {
        // Short-circuit logical operators before touching the right side.
        match op {
            BinaryOp::And => {
                let lhs = self.evaluate(left, vars)?;
                if !lhs.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                let rhs = self.evaluate(right, vars)?;
                return Ok(Value::Bool(rhs.is_truthy()));
            }
            BinaryOp::Or => {
                let lhs = self.evaluate(left, vars)?;
                if lhs.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                let rhs = self.evaluate(right, vars)?;
                return Ok(Value::Bool(rhs.is_truthy()));
            }
            _ => {}
        }

        let lhs = self.evaluate(left, vars)?;
        let rhs = self.evaluate(right, vars)?;

        match op {
            BinaryOp::Eq => Ok(Value::Bool(lhs.loose_eq(&rhs))),
            BinaryOp::Ne => Ok(Value::Bool(!lhs.loose_eq(&rhs))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                // Comparisons against null are false rather than errors so
                // partially populated fact maps evaluate rules totally.
                if lhs.is_null() || rhs.is_null() {
                    return Ok(Value::Bool(false));
                }
                let ordering = lhs.loose_cmp(&rhs).ok_or_else(|| {
                    ApexError::expression(
                        ExpressionErrorKind::TypeCoercion,
                        format!(
                            "cannot compare {} with {} using '{}'",
                            lhs.type_name(),
                            rhs.type_name(),
                            op.symbol()
                        ),
                    )
                })?;
                let result = match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::Le => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    BinaryOp::Ge => ordering != Ordering::Less,
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
            BinaryOp::Add => self.arithmetic_add(&lhs, &rhs),
            BinaryOp::Sub => self.arithmetic_sub(&lhs, &rhs),
            BinaryOp::Mul => numeric_op(&lhs, &rhs, "*", |a, b| a.checked_mul(b)),
            BinaryOp::Div => divide(&lhs, &rhs),
            BinaryOp::Rem => numeric_op(&lhs, &rhs, "%", |a, b| {
                if b.is_zero() {
                    None
                } else {
                    a.checked_rem(b)
                }
            }),
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        }
    }

    fn arithmetic_add(&self, lhs: &Value, rhs: &Value) -> Result<Value> {
        match (lhs, rhs) {
            (Value::String(a), b) => Ok(Value::string(format!("{}{}", a, b.render()))),
            (a, Value::String(b)) => Ok(Value::string(format!("{}{}", a.render(), b))),
            (Value::DateTime(dt), Value::Duration(d)) | (Value::Duration(d), Value::DateTime(dt)) => {
                Ok(Value::DateTime(*dt + *d))
            }
            (Value::Duration(a), Value::Duration(b)) => Ok(Value::Duration(*a + *b)),
            _ => numeric_op(lhs, rhs, "+", |a, b| a.checked_add(b)),
        }
    }

    fn arithmetic_sub(&self, lhs: &Value, rhs: &Value) -> Result<Value> {
        match (lhs, rhs) {
            (Value::DateTime(a), Value::DateTime(b)) => Ok(Value::Duration(*a - *b)),
            (Value::DateTime(dt), Value::Duration(d)) => Ok(Value::DateTime(*dt - *d)),
            (Value::Duration(a), Value::Duration(b)) => Ok(Value::Duration(*a - *b)),
            _ => numeric_op(lhs, rhs, "-", |a, b| a.checked_sub(b)),
        }
    }

    fn property(&self, value: &Value, name: &str) -> Result<Value> {
        match value {
            Value::Map(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
            other => Err(ApexError::expression(
                ExpressionErrorKind::PropertyAccess,
                format!("no property '{name}' on {}", other.type_name()),
            )),
        }
    }

    fn index(&self, value: &Value, index: &Value) -> Result<Value> {
        match (value, index) {
            (Value::Null, _) => Err(ApexError::expression(
                ExpressionErrorKind::NullDereference,
                "indexed access on null",
            )),
            (Value::List(items), Value::Int(i)) => {
                let idx = usize::try_from(*i).ok().filter(|idx| *idx < items.len());
                match idx {
                    Some(idx) => Ok(items[idx].clone()),
                    None => Err(ApexError::expression(
                        ExpressionErrorKind::PropertyAccess,
                        format!("index {i} out of bounds for list of {}", items.len()),
                    )),
                }
            }
            (Value::Map(map), Value::String(key)) => {
                Ok(map.get(key.as_ref()).cloned().unwrap_or(Value::Null))
            }
            (target, idx) => Err(ApexError::expression(
                ExpressionErrorKind::PropertyAccess,
                format!("cannot index {} with {}", target.type_name(), idx.type_name()),
            )),
        }
    }

    fn call_method(&self, value: &Value, name: &str, args: &[Value]) -> Result<Value> {
        let bad_method = || {
            ApexError::expression(
                ExpressionErrorKind::MethodInvocation,
                format!("unknown method '{name}' on {}", value.type_name()),
            )
        };
        match value {
            Value::String(s) => match name {
                "contains" => {
                    let needle = string_arg(name, args)?;
                    Ok(Value::Bool(s.contains(needle)))
                }
                "startsWith" => {
                    let prefix = string_arg(name, args)?;
                    Ok(Value::Bool(s.starts_with(prefix)))
                }
                "endsWith" => {
                    let suffix = string_arg(name, args)?;
                    Ok(Value::Bool(s.ends_with(suffix)))
                }
                "toUpperCase" => Ok(Value::string(s.to_uppercase())),
                "toLowerCase" => Ok(Value::string(s.to_lowercase())),
                "length" | "size" => Ok(Value::Int(s.chars().count() as i64)),
                "isEmpty" => Ok(Value::Bool(s.is_empty())),
                "trim" => Ok(Value::string(s.trim())),
                _ => Err(bad_method()),
            },
            Value::List(items) => match name {
                "contains" => {
                    let needle = args.first().ok_or_else(|| missing_arg(name))?;
                    Ok(Value::Bool(items.iter().any(|item| item.loose_eq(needle))))
                }
                "size" => Ok(Value::Int(items.len() as i64)),
                "isEmpty" => Ok(Value::Bool(items.is_empty())),
                _ => Err(bad_method()),
            },
            Value::Map(map) => match name {
                "size" => Ok(Value::Int(map.len() as i64)),
                "isEmpty" => Ok(Value::Bool(map.is_empty())),
                "containsKey" => {
                    let key = string_arg(name, args)?;
                    Ok(Value::Bool(map.contains_key(key)))
                }
                _ => Err(bad_method()),
            },
            Value::DateTime(dt) => match name {
                "plusHours" => Ok(Value::DateTime(*dt + chrono::Duration::hours(int_arg(name, args)?))),
                "plusMinutes" => {
                    Ok(Value::DateTime(*dt + chrono::Duration::minutes(int_arg(name, args)?)))
                }
                "plusDays" => Ok(Value::DateTime(*dt + chrono::Duration::days(int_arg(name, args)?))),
                "minusDays" => Ok(Value::DateTime(*dt - chrono::Duration::days(int_arg(name, args)?))),
                "isBefore" => match args.first() {
                    Some(Value::DateTime(other)) => Ok(Value::Bool(dt < other)),
                    _ => Err(missing_arg(name)),
                },
                "isAfter" => match args.first() {
                    Some(Value::DateTime(other)) => Ok(Value::Bool(dt > other)),
                    _ => Err(missing_arg(name)),
                },
                _ => Err(bad_method()),
            },
            _ => Err(bad_method()),
        }
    }
}

/// Coerce a value to a type hint.
pub fn coerce(value: Value, hint: TypeHint) -> Result<Value> {
    let fail = |value: &Value, wanted: &str| {
        Err(ApexError::expression(
            ExpressionErrorKind::TypeCoercion,
            format!("cannot coerce {} to {wanted}", value.type_name()),
        ))
    };
    match hint {
        TypeHint::Any => Ok(value),
        TypeHint::Bool => Ok(Value::Bool(value.is_truthy())),
        TypeHint::Int => match value.as_int() {
            Some(i) => Ok(Value::Int(i)),
            None => fail(&value, "int"),
        },
        TypeHint::Decimal => match value.as_decimal() {
            Some(d) => Ok(Value::Decimal(d)),
            None => fail(&value, "decimal"),
        },
        TypeHint::String => match &value {
            Value::String(_) => Ok(value),
            Value::Null | Value::List(_) | Value::Map(_) => fail(&value, "string"),
            scalar => Ok(Value::string(scalar.render())),
        },
        TypeHint::List => match value {
            Value::List(_) => Ok(value),
            other => fail(&other, "list"),
        },
        TypeHint::Map => match value {
            Value::Map(_) => Ok(value),
            other => fail(&other, "map"),
        },
        TypeHint::DateTime => match value {
            Value::DateTime(_) => Ok(value),
            other => fail(&other, "datetime"),
        },
    }
}

/// Scope for projection/filter bodies: `#this` plus, for map elements, the
/// element's own keys overlaid on the outer context.
fn element_scope(vars: &FactContext, element: &Value) -> FactContext {
    let mut scope = vars.clone();
    if let Value::Map(fields) = element {
        for (key, value) in fields.iter() {
            scope.insert(key.clone(), value.clone());
        }
    }
    scope.insert("this".to_string(), element.clone());
    scope
}

fn numeric_op(
    lhs: &Value,
    rhs: &Value,
    symbol: &str,
    f: impl Fn(Decimal, Decimal) -> Option<Decimal>,
) -> Result<Value> {
    let (a, b) = match (lhs.as_decimal(), rhs.as_decimal()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(ApexError::expression(
                ExpressionErrorKind::TypeCoercion,
                format!(
                    "'{symbol}' requires numeric operands, found {} and {}",
                    lhs.type_name(),
                    rhs.type_name()
                ),
            ))
        }
    };
    let result = f(a, b).ok_or_else(|| {
        ApexError::expression(
            ExpressionErrorKind::Unknown,
            format!("arithmetic failure evaluating '{symbol}'"),
        )
    })?;
    Ok(narrow(lhs, rhs, result))
}

fn divide(lhs: &Value, rhs: &Value) -> Result<Value> {
    let (a, b) = match (lhs.as_decimal(), rhs.as_decimal()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(ApexError::expression(
                ExpressionErrorKind::TypeCoercion,
                format!(
                    "'/' requires numeric operands, found {} and {}",
                    lhs.type_name(),
                    rhs.type_name()
                ),
            ))
        }
    };
    if b.is_zero() {
        return Err(ApexError::expression(ExpressionErrorKind::Unknown, "division by zero"));
    }
    let result = a.checked_div(b).ok_or_else(|| {
        ApexError::expression(ExpressionErrorKind::Unknown, "arithmetic failure evaluating '/'")
    })?;
    Ok(narrow(lhs, rhs, result))
}

/// Keep Int results integral when both operands were Int and the result has
/// no fractional part; otherwise stay in Decimal.
fn narrow(lhs: &Value, rhs: &Value, result: Decimal) -> Value {
    use rust_decimal::prelude::ToPrimitive;
    if matches!(lhs, Value::Int(_)) && matches!(rhs, Value::Int(_)) && result.fract().is_zero() {
        if let Some(i) = result.to_i64() {
            return Value::Int(i);
        }
    }
    Value::Decimal(result.normalize())
}

fn string_arg<'v>(method: &str, args: &'v [Value]) -> Result<&'v str> {
    args.first()
        .and_then(Value::as_str)
        .ok_or_else(|| missing_arg(method))
}

fn int_arg(method: &str, args: &[Value]) -> Result<i64> {
    args.first()
        .and_then(Value::as_int)
        .ok_or_else(|| missing_arg(method))
}

fn missing_arg(method: &str) -> ApexError {
    ApexError::expression(
        ExpressionErrorKind::MethodInvocation,
        format!("missing or mistyped argument for '{method}'"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::expr::parser::parse;
    use chrono::TimeZone;

    fn eval(source: &str, vars: &FactContext) -> Result<Value> {
        let clock = FixedClock(chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let accessors = AccessorRegistry::with_builtins();
        let evaluator = Evaluator::new(&clock, &accessors);
        let expr = parse(source)?;
        evaluator.evaluate(&expr, vars)
    }

    fn facts(pairs: &[(&str, Value)]) -> FactContext {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn boundary_comparison_is_strict() {
        let ctx = facts(&[("amount", Value::Int(100_000))]);
        assert_eq!(eval("#amount > 100000", &ctx).unwrap(), Value::Bool(false));
        let ctx = facts(&[("amount", Value::Int(100_001))]);
        assert_eq!(eval("#amount > 100000", &ctx).unwrap(), Value::Bool(true));
    }

    #[test]
    fn nested_ternary_classification() {
        let source = "#amount>1000000?'CRITICAL':#amount>100000?'HIGH':#amount>10000?'MEDIUM':#amount>1000?'LOW':'MINIMAL'";
        let cases = [
            (50_000, "MEDIUM"),
            (1_000, "MINIMAL"),
            (1_000_001, "CRITICAL"),
        ];
        for (amount, expected) in cases {
            let ctx = facts(&[("amount", Value::Int(amount))]);
            assert_eq!(eval(source, &ctx).unwrap(), Value::string(expected));
        }
    }

    #[test]
    fn null_dereference_vs_safe_navigation() {
        let ctx = facts(&[("trade", Value::Null)]);
        let err = eval("#trade.amount", &ctx).unwrap_err();
        assert_eq!(err.expression_kind(), Some(ExpressionErrorKind::NullDereference));
        assert_eq!(eval("#trade?.amount", &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn missing_variable_reads_null() {
        let ctx = FactContext::new();
        assert_eq!(eval("#missing == null", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(eval("#missing > 5", &ctx).unwrap(), Value::Bool(false));
    }

    #[test]
    fn decimal_arithmetic_keeps_scale() {
        let ctx = FactContext::new();
        assert_eq!(
            eval("0.9 * 30 + 0.8 * 25", &ctx).unwrap(),
            Value::Decimal(Decimal::from(47))
        );
    }

    #[test]
    fn integer_division_promotes_when_inexact() {
        let ctx = FactContext::new();
        assert_eq!(eval("10 / 2", &ctx).unwrap(), Value::Int(5));
        assert_eq!(
            eval("5 / 2", &ctx).unwrap(),
            Value::Decimal(Decimal::new(25, 1))
        );
        assert!(eval("1 / 0", &ctx).is_err());
    }

    #[test]
    fn string_methods() {
        let ctx = facts(&[("name", Value::string("Acme LLC"))]);
        assert_eq!(eval("#name.contains('LLC')", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(eval("#name.toUpperCase()", &ctx).unwrap(), Value::string("ACME LLC"));
        assert_eq!(eval("#name.length()", &ctx).unwrap(), Value::Int(8));
    }

    #[test]
    fn set_literal_contains() {
        let ctx = facts(&[("code", Value::string("B"))]);
        assert_eq!(eval("{'A','B','C'}.contains(#code)", &ctx).unwrap(), Value::Bool(true));
        let ctx = facts(&[("code", Value::string("Z"))]);
        assert_eq!(eval("{'A','B','C'}.contains(#code)", &ctx).unwrap(), Value::Bool(false));
    }

    #[test]
    fn projection_filter_first_match() {
        let ctx = facts(&[(
            "xs",
            Value::list(vec![Value::Int(1), Value::Int(5), Value::Int(10)]),
        )]);
        assert_eq!(
            eval("#xs.![#this * 2]", &ctx).unwrap(),
            Value::list(vec![Value::Int(2), Value::Int(10), Value::Int(20)])
        );
        assert_eq!(
            eval("#xs.?[#this > 4]", &ctx).unwrap(),
            Value::list(vec![Value::Int(5), Value::Int(10)])
        );
        assert_eq!(eval("#xs.^[#this > 4]", &ctx).unwrap(), Value::Int(5));
        assert_eq!(eval("#xs.^[#this > 99]", &ctx).unwrap(), Value::Null);
        assert_eq!(eval("#xs.size()", &ctx).unwrap(), Value::Int(3));
        assert_eq!(eval("#xs.isEmpty()", &ctx).unwrap(), Value::Bool(false));
    }

    #[test]
    fn filter_over_map_elements_sees_their_fields() {
        let row = |name: &str, price: i64| {
            let mut map = std::collections::BTreeMap::new();
            map.insert("name".to_string(), Value::string(name));
            map.insert("price".to_string(), Value::Int(price));
            Value::map(map)
        };
        let ctx = facts(&[("products", Value::list(vec![row("a", 5), row("b", 50)]))]);
        let selected = eval("#products.?[#price > 10]", &ctx).unwrap();
        match selected {
            Value::List(items) => assert_eq!(items.len(), 1),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn date_time_accessor_and_methods() {
        let ctx = FactContext::new();
        let now = eval("#dateTime.now()", &ctx).unwrap();
        let later = eval("#dateTime.now().plusHours(2)", &ctx).unwrap();
        match (now, later) {
            (Value::DateTime(a), Value::DateTime(b)) => {
                assert_eq!(b - a, chrono::Duration::hours(2));
            }
            other => panic!("expected datetimes, got {other:?}"),
        }
        assert_eq!(
            eval("#dateTime.now().isBefore(#dateTime.now().plusDays(1))", &ctx).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn deadline_expiry_yields_timeout() {
        let clock = FixedClock(chrono::Utc::now());
        let accessors = AccessorRegistry::with_builtins();
        let deadline = Deadline {
            at: Instant::now() - std::time::Duration::from_millis(1),
            budget_ms: 1,
        };
        let evaluator = Evaluator::new(&clock, &accessors).with_deadline(Some(deadline));
        let expr = parse("1 + 1").unwrap();
        let err = evaluator.evaluate(&expr, &FactContext::new()).unwrap_err();
        assert!(matches!(err, ApexError::Timeout(1)));
    }

    #[test]
    fn coercion_to_bool_and_failures() {
        assert_eq!(coerce(Value::Null, TypeHint::Bool).unwrap(), Value::Bool(false));
        assert_eq!(coerce(Value::Int(3), TypeHint::Bool).unwrap(), Value::Bool(true));
        assert!(coerce(Value::string("x"), TypeHint::Int).is_err());
        assert_eq!(
            coerce(Value::Decimal(Decimal::from(4)), TypeHint::Int).unwrap(),
            Value::Int(4)
        );
    }
}

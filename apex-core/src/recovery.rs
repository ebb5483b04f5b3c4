//! Error recovery strategies and structured error context

use crate::error::{ApexError, ExpressionErrorKind, Result};
use crate::expr::ast::{BinaryOp, Expr};
use crate::expr::{Deadline, ExpressionEngine, TypeHint};
use crate::types::{FactContext, Value};
use serde::Serialize;
use tracing::warn;

/// How the engine responds to a rule-level evaluation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryStrategy {
    /// Treat the failure as an untriggered result carrying the error
    #[default]
    ContinueWithDefault,
    /// Retry once with a safety-rewritten expression, then fall back
    RetryWithSafeExpression,
    /// Omit the failing rule from aggregation entirely
    SkipRule,
    /// Surface the failure to the caller
    FailFast,
}

/// Structured record built for every recovered failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorContext {
    /// Error kind spelling (expression kinds, TIMEOUT, ...)
    pub kind: String,
    /// Rule the failure occurred in, when known
    pub rule_id: Option<String>,
    /// The failing expression source
    pub expression: Option<String>,
    /// Names of the variables that were available (names only, no values)
    pub available_variables: Vec<String>,
    /// Fix suggestions from the fixed rewrite table
    pub suggestions: Vec<String>,
    /// Human-readable failure description
    pub message: String,
}

/// Fixed suggestion table keyed by error kind.
pub fn suggestions_for(error: &ApexError) -> Vec<String> {
    let suggestions: &[&str] = match error {
        ApexError::Expression { kind, .. } => match kind {
            ExpressionErrorKind::NullDereference => &[
                "use safe navigation '?.' so null short-circuits to null",
                "guard the value with '!= null' before dereferencing",
            ],
            ExpressionErrorKind::PropertyAccess => &[
                "check the property name against the fact map",
                "use safe navigation '?.' when the object may be absent",
            ],
            ExpressionErrorKind::MethodInvocation => &[
                "check the method name and argument types",
                "string methods require a string receiver",
            ],
            ExpressionErrorKind::TypeCoercion => &[
                "compare values of the same type",
                "guard numeric comparisons with '!= null'",
            ],
            ExpressionErrorKind::Syntax => &[
                "check for unbalanced parentheses or quotes",
                "variable references need the '#' sigil",
            ],
            ExpressionErrorKind::Unknown => &["check the expression against the fact map"],
        },
        ApexError::Timeout(_) => &["raise the evaluation deadline or simplify the expression"],
        ApexError::DataSource { .. } => &["check data-source connectivity and configuration"],
        _ => &[],
    };
    suggestions.iter().map(|s| s.to_string()).collect()
}

/// Build the structured context for a failure.
pub fn build_error_context(
    error: &ApexError,
    rule_id: Option<&str>,
    expression: Option<&str>,
    vars: &FactContext,
) -> ErrorContext {
    let kind = match error {
        ApexError::Expression { kind, .. } => kind.to_string(),
        ApexError::Timeout(_) => "TIMEOUT".to_string(),
        ApexError::DataSource { class, .. } => format!("DATASOURCE_{class:?}").to_uppercase(),
        ApexError::Dependency(_) => "DEPENDENCY_ERROR".to_string(),
        ApexError::Validation(_) => "VALIDATION_ERROR".to_string(),
        ApexError::ChainLimit(_) => "CHAIN_LIMIT_ERROR".to_string(),
        _ => "UNKNOWN".to_string(),
    };
    ErrorContext {
        kind,
        rule_id: rule_id.map(str::to_string),
        expression: expression.map(str::to_string),
        available_variables: vars.keys().cloned().collect(),
        suggestions: suggestions_for(error),
        message: error.to_string(),
    }
}

/// Outcome of applying the active strategy to a failed rule condition.
#[derive(Debug)]
pub enum RuleRecovery {
    /// The safe-expression retry produced a usable boolean
    Value(bool),
    /// The rule counts as untriggered; the context describes why
    Untriggered(ErrorContext),
    /// The rule is omitted from aggregation as if disabled
    Skipped(ErrorContext),
}

/// Applies the configured recovery strategy to evaluation failures.
pub struct ErrorRecovery {
    strategy: RecoveryStrategy,
}

impl ErrorRecovery {
    /// Recovery layer with the given strategy.
    pub fn new(strategy: RecoveryStrategy) -> Self {
        ErrorRecovery { strategy }
    }

    /// The active strategy.
    pub fn strategy(&self) -> RecoveryStrategy {
        self.strategy
    }

    /// Handle a failed rule-condition evaluation.
    pub fn recover_rule(
        &self,
        exprs: &ExpressionEngine,
        rule_id: &str,
        condition: &str,
        vars: &FactContext,
        deadline: Option<Deadline>,
        error: ApexError,
    ) -> Result<RuleRecovery> {
        match self.strategy {
            RecoveryStrategy::FailFast => Err(error),
            RecoveryStrategy::SkipRule => {
                let context = build_error_context(&error, Some(rule_id), Some(condition), vars);
                warn!(rule = rule_id, kind = %context.kind, "skipping rule after evaluation failure");
                Ok(RuleRecovery::Skipped(context))
            }
            RecoveryStrategy::ContinueWithDefault => {
                let context = build_error_context(&error, Some(rule_id), Some(condition), vars);
                warn!(rule = rule_id, kind = %context.kind, "continuing with untriggered default");
                Ok(RuleRecovery::Untriggered(context))
            }
            RecoveryStrategy::RetryWithSafeExpression => {
                if let Ok(compiled) = exprs.compile(condition) {
                    let rewritten = make_safe(&compiled);
                    match exprs.evaluate_expr(&rewritten, vars, TypeHint::Bool, deadline) {
                        Ok(value) => {
                            warn!(rule = rule_id, "safe-expression retry succeeded");
                            return Ok(RuleRecovery::Value(value.is_truthy()));
                        }
                        Err(retry_error) => {
                            let context = build_error_context(
                                &retry_error,
                                Some(rule_id),
                                Some(condition),
                                vars,
                            );
                            warn!(rule = rule_id, "safe-expression retry failed, continuing with default");
                            return Ok(RuleRecovery::Untriggered(context));
                        }
                    }
                }
                let context = build_error_context(&error, Some(rule_id), Some(condition), vars);
                Ok(RuleRecovery::Untriggered(context))
            }
        }
    }
}

/// Documented safety rewrites: every property/method access becomes safe
/// navigation, and ordered comparisons gain null guards on both sides.
pub fn make_safe(expr: &Expr) -> Expr {
    match expr {
        Expr::Literal(_) | Expr::Variable(_) => expr.clone(),
        Expr::SetLiteral(items) => Expr::SetLiteral(items.iter().map(make_safe).collect()),
        Expr::Unary { op, operand } => Expr::Unary {
            op: *op,
            operand: Box::new(make_safe(operand)),
        },
        Expr::Binary { op, left, right } => {
            let left = Box::new(make_safe(left));
            let right = Box::new(make_safe(right));
            match op {
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                    let guard = |side: &Expr| Expr::Binary {
                        op: BinaryOp::Ne,
                        left: Box::new(side.clone()),
                        right: Box::new(Expr::Literal(Value::Null)),
                    };
                    let comparison = Expr::Binary {
                        op: *op,
                        left: left.clone(),
                        right: right.clone(),
                    };
                    Expr::Binary {
                        op: BinaryOp::And,
                        left: Box::new(Expr::Binary {
                            op: BinaryOp::And,
                            left: Box::new(guard(&left)),
                            right: Box::new(guard(&right)),
                        }),
                        right: Box::new(comparison),
                    }
                }
                _ => Expr::Binary { op: *op, left, right },
            }
        }
        Expr::Ternary {
            condition,
            if_true,
            if_false,
        } => Expr::Ternary {
            condition: Box::new(make_safe(condition)),
            if_true: Box::new(make_safe(if_true)),
            if_false: Box::new(make_safe(if_false)),
        },
        Expr::Property { target, name, .. } => Expr::Property {
            target: Box::new(make_safe(target)),
            name: name.clone(),
            safe: true,
        },
        Expr::Method { target, name, args, .. } => Expr::Method {
            target: Box::new(make_safe(target)),
            name: name.clone(),
            args: args.iter().map(make_safe).collect(),
            safe: true,
        },
        Expr::Index { target, index } => Expr::Index {
            target: Box::new(make_safe(target)),
            index: Box::new(make_safe(index)),
        },
        Expr::Project { target, body } => Expr::Project {
            target: Box::new(make_safe(target)),
            body: Box::new(make_safe(body)),
        },
        Expr::Select { target, body } => Expr::Select {
            target: Box::new(make_safe(target)),
            body: Box::new(make_safe(body)),
        },
        Expr::FirstMatch { target, body } => Expr::FirstMatch {
            target: Box::new(make_safe(target)),
            body: Box::new(make_safe(body)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;

    fn facts(pairs: &[(&str, Value)]) -> FactContext {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn continue_with_default_yields_untriggered() {
        let exprs = ExpressionEngine::new(system_clock());
        let recovery = ErrorRecovery::new(RecoveryStrategy::ContinueWithDefault);
        let vars = facts(&[("trade", Value::Null)]);
        let error = exprs.evaluate_bool("#trade.amount > 5", &vars, None).unwrap_err();
        let outcome = recovery
            .recover_rule(&exprs, "r1", "#trade.amount > 5", &vars, None, error)
            .unwrap();
        match outcome {
            RuleRecovery::Untriggered(context) => {
                assert_eq!(context.kind, "NULL_DEREFERENCE");
                assert_eq!(context.available_variables, vec!["trade".to_string()]);
                assert!(!context.suggestions.is_empty());
            }
            other => panic!("expected untriggered, got {other:?}"),
        }
    }

    #[test]
    fn safe_retry_recovers_null_dereference() {
        let exprs = ExpressionEngine::new(system_clock());
        let recovery = ErrorRecovery::new(RecoveryStrategy::RetryWithSafeExpression);
        let vars = facts(&[("trade", Value::Null)]);
        let error = exprs.evaluate_bool("#trade.amount > 5", &vars, None).unwrap_err();
        let outcome = recovery
            .recover_rule(&exprs, "r1", "#trade.amount > 5", &vars, None, error)
            .unwrap();
        // #trade?.amount is null, the null-guarded comparison is false.
        assert!(matches!(outcome, RuleRecovery::Value(false)));
    }

    #[test]
    fn fail_fast_surfaces_the_error() {
        let exprs = ExpressionEngine::new(system_clock());
        let recovery = ErrorRecovery::new(RecoveryStrategy::FailFast);
        let vars = facts(&[("trade", Value::Null)]);
        let error = exprs.evaluate_bool("#trade.amount > 5", &vars, None).unwrap_err();
        assert!(recovery
            .recover_rule(&exprs, "r1", "#trade.amount > 5", &vars, None, error)
            .is_err());
    }

    #[test]
    fn skip_rule_is_reported_as_skipped() {
        let exprs = ExpressionEngine::new(system_clock());
        let recovery = ErrorRecovery::new(RecoveryStrategy::SkipRule);
        let vars = FactContext::new();
        let error = ApexError::expression(ExpressionErrorKind::Unknown, "boom");
        let outcome = recovery
            .recover_rule(&exprs, "r1", "1 / 0", &vars, None, error)
            .unwrap();
        assert!(matches!(outcome, RuleRecovery::Skipped(_)));
    }

    #[test]
    fn make_safe_rewrites_access_and_comparisons() {
        let exprs = ExpressionEngine::new(system_clock());
        let compiled = exprs.compile("#a.b > 5").unwrap();
        let safe = make_safe(&compiled);
        // Null object and null comparison both resolve without error now.
        let value = exprs
            .evaluate_expr(&safe, &facts(&[("a", Value::Null)]), TypeHint::Bool, None)
            .unwrap();
        assert_eq!(value, Value::Bool(false));
    }
}

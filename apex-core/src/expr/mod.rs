//! Expression language: lexer, parser, interpreter, accessor registry, and
//! the compiled-expression cache

pub mod ast;
pub mod cache;
pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use ast::Expr;
pub use cache::ExpressionCache;
pub use eval::{coerce, Deadline, Evaluator, TypeHint};
pub use functions::{Accessor, AccessorRegistry};
pub use parser::parse;

use crate::clock::SharedClock;
use crate::error::Result;
use crate::types::{FactContext, Value};
use std::sync::Arc;

/// Facade owning the cache, accessor registry, and clock.
///
/// Every condition, transformation, and lookup key in the engine flows
/// through one shared instance of this type.
pub struct ExpressionEngine {
    cache: ExpressionCache,
    accessors: AccessorRegistry,
    clock: SharedClock,
}

impl ExpressionEngine {
    /// Build an engine over a clock with the built-in accessor namespaces.
    pub fn new(clock: SharedClock) -> Self {
        ExpressionEngine {
            cache: ExpressionCache::new(),
            accessors: AccessorRegistry::with_builtins(),
            clock,
        }
    }

    /// Replace the accessor registry.
    pub fn with_accessors(mut self, accessors: AccessorRegistry) -> Self {
        self.accessors = accessors;
        self
    }

    /// The engine clock.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Compile (or fetch from cache) an expression.
    pub fn compile(&self, source: &str) -> Result<Arc<Expr>> {
        self.cache.compile(source)
    }

    /// Evaluate a source string against a fact context.
    pub fn evaluate(&self, source: &str, vars: &FactContext) -> Result<Value> {
        self.evaluate_hinted(source, vars, TypeHint::Any, None)
    }

    /// Evaluate with a return-type hint and an optional deadline.
    pub fn evaluate_hinted(
        &self,
        source: &str,
        vars: &FactContext,
        hint: TypeHint,
        deadline: Option<Deadline>,
    ) -> Result<Value> {
        let expr = self.compile(source).map_err(|e| e.with_expression(source))?;
        let evaluator = Evaluator::new(self.clock.as_ref(), &self.accessors).with_deadline(deadline);
        evaluator
            .evaluate_with_hint(&expr, vars, hint)
            .map_err(|e| e.with_expression(source))
    }

    /// Evaluate a rule condition to a boolean (null coerces to false).
    pub fn evaluate_bool(
        &self,
        source: &str,
        vars: &FactContext,
        deadline: Option<Deadline>,
    ) -> Result<bool> {
        let value = self.evaluate_hinted(source, vars, TypeHint::Bool, deadline)?;
        Ok(value.is_truthy())
    }

    /// Evaluate an already-compiled tree (used by recovery retries).
    pub fn evaluate_expr(
        &self,
        expr: &Expr,
        vars: &FactContext,
        hint: TypeHint,
        deadline: Option<Deadline>,
    ) -> Result<Value> {
        let evaluator = Evaluator::new(self.clock.as_ref(), &self.accessors).with_deadline(deadline);
        evaluator.evaluate_with_hint(expr, vars, hint)
    }

    /// Number of compiled expressions held by the cache.
    pub fn cached_expressions(&self) -> usize {
        self.cache.len()
    }

    /// Check that a source string parses, without evaluating it.
    pub fn check(&self, source: &str) -> Result<()> {
        self.compile(source).map(|_| ()).map_err(|e| e.with_expression(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;

    #[test]
    fn engine_evaluates_and_caches() {
        let engine = ExpressionEngine::new(system_clock());
        let mut vars = FactContext::new();
        vars.insert("amount".to_string(), Value::Int(150));
        assert!(engine.evaluate_bool("#amount > 100", &vars, None).unwrap());
        assert!(engine.evaluate_bool("#amount > 100", &vars, None).unwrap());
        assert_eq!(engine.cached_expressions(), 1);
    }

    #[test]
    fn check_reports_syntax_errors_with_source() {
        let engine = ExpressionEngine::new(system_clock());
        let err = engine.check("#a &&").unwrap_err();
        match err {
            crate::error::ApexError::Expression { expression, .. } => {
                assert_eq!(expression.as_deref(), Some("#a &&"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

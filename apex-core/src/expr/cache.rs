//! Compiled-expression cache keyed by verbatim source string

use crate::error::Result;
use crate::expr::ast::Expr;
use crate::expr::parser::parse;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;

/// Shared cache of parsed expression trees.
///
/// Warm-path evaluation must not re-parse; compiled trees are immutable and
/// shared by reference across threads.
pub struct ExpressionCache {
    entries: DashMap<Arc<str>, Arc<Expr>, RandomState>,
}

impl ExpressionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        ExpressionCache {
            entries: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Parse `source`, reusing a previously compiled tree when present.
    pub fn compile(&self, source: &str) -> Result<Arc<Expr>> {
        if let Some(entry) = self.entries.get(source) {
            return Ok(entry.value().clone());
        }
        let compiled = Arc::new(parse(source)?);
        self.entries
            .insert(Arc::from(source.to_string().into_boxed_str()), compiled.clone());
        Ok(compiled)
    }

    /// Number of cached expressions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all cached trees.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for ExpressionCache {
    fn default() -> Self {
        Self::new()
    }
}

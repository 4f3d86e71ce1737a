use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::context::RuleContext;
use crate::datasource::Vector;

/// Contexts of rules whose vectors are pushed in rather than queried.
#[derive(Default)]
pub struct ExternalRules {
    contexts: RwLock<HashMap<String, Arc<RuleContext>>>,
}

impl ExternalRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed vectors to the context of `rule_id` on `cluster`. Returns
    /// `false` when this replica does not hold that context.
    pub fn push(&self, rule_id: i64, cluster: &str, vectors: Vec<Vector>) -> bool {
        let key = format!("{cluster}:{rule_id}");
        let ctx = self
            .contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|c| c.key() == key)
            .cloned();
        match ctx {
            Some(ctx) => {
                ctx.handle_vectors(vectors);
                true
            }
            None => false,
        }
    }

    pub(crate) fn hashes(&self) -> Vec<String> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub(crate) fn insert(&self, ctx: Arc<RuleContext>) {
        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ctx.hash().to_string(), ctx);
    }

    pub(crate) fn remove(&self, hash: &str) -> Option<Arc<RuleContext>> {
        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(hash)
    }

    pub fn len(&self) -> usize {
        self.contexts.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Named update procedures.
//!
//! A declaration layer refers to how a step is built by rule name; the
//! rulebook maps each name to its handler once, up front, and registration
//! resolves names by plain lookup.

use crate::error::GraphError;
use crate::graph::{update_fn, UpdateFn};
use crate::task::Context;
use rustc_hash::FxHashMap;
use std::future::Future;

#[derive(Default)]
pub struct Rulebook {
    rules: FxHashMap<String, UpdateFn>,
}

impl Rulebook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or redefine) rule `name`.
    pub fn add<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Context) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        self.rules.insert(name.to_string(), update_fn(handler));
    }

    pub fn get(&self, name: &str) -> Result<UpdateFn, GraphError> {
        self.rules
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::UnknownRule(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }
}

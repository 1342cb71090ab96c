//! Executor lookup by node executor kind.

use nf_core::graph::ExecutorKind;
use nf_executor::Executor;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<ExecutorKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the executor for a kind.
    pub fn register(&mut self, kind: ExecutorKind, executor: Arc<dyn Executor>) -> &mut Self {
        self.executors.insert(kind, executor);
        self
    }

    pub fn with(mut self, kind: ExecutorKind, executor: Arc<dyn Executor>) -> Self {
        self.register(kind, executor);
        self
    }

    pub fn get(&self, kind: ExecutorKind) -> Option<&Arc<dyn Executor>> {
        self.executors.get(&kind)
    }

    pub fn kinds(&self) -> Vec<ExecutorKind> {
        let mut kinds: Vec<_> = self.executors.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

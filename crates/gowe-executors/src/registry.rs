//! Maps an [`ExecutorType`] to the concrete backend that serves it,
//! mirroring `durable::engine::registry::WorkflowRegistry`'s type-keyed
//! lookup map — simplified, since GoWe's executor set is the closed list
//! in `ExecutorType` rather than an open, dynamically-registered set of
//! workflow types.

use std::collections::HashMap;
use std::sync::Arc;

use gowe_core::{Executor, ExecutorType};

/// Holds one [`Executor`] implementation per [`ExecutorType`].
#[derive(Clone, Default)]
pub struct Registry {
    backends: HashMap<ExecutorType, Arc<dyn Executor>>,
}

/// Returned when the scheduler asks for an executor type no backend was
/// ever registered for — a deployment/config error, not a task-level
/// failure (spec §4.7 callers turn this into a permanent task failure).
#[derive(Debug, thiserror::Error)]
#[error("no executor backend registered for {0}")]
pub struct NoBackendRegistered(pub ExecutorType);

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register(&mut self, executor_type: ExecutorType, backend: Arc<dyn Executor>) -> &mut Self {
        self.backends.insert(executor_type, backend);
        self
    }

    pub fn get(&self, executor_type: ExecutorType) -> Result<Arc<dyn Executor>, NoBackendRegistered> {
        self.backends
            .get(&executor_type)
            .cloned()
            .ok_or(NoBackendRegistered(executor_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalExecutor;

    #[test]
    fn returns_registered_backend() {
        let mut registry = Registry::new();
        registry.register(ExecutorType::Local, Arc::new(LocalExecutor::new()));
        assert!(registry.get(ExecutorType::Local).is_ok());
    }

    #[test]
    fn errors_on_unregistered_type() {
        let registry = Registry::new();
        assert!(registry.get(ExecutorType::Bvbrc).is_err());
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Uniform contract every capability back-end implements. The engine never
/// knows anything about what a given tool actually does.
#[async_trait]
pub trait CapabilityExecutor: Send + Sync {
    async fn execute(&self, query: &str, context: &HashMap<String, Value>) -> anyhow::Result<Value>;
}

/// Immutable, name-keyed registry bound once at construction.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn CapabilityExecutor>>,
}

impl ExecutorRegistry {
    pub fn builder() -> ExecutorRegistryBuilder {
        ExecutorRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CapabilityExecutor>> {
        self.executors.get(name).cloned()
    }
}

#[derive(Default)]
pub struct ExecutorRegistryBuilder {
    executors: HashMap<String, Arc<dyn CapabilityExecutor>>,
}

impl ExecutorRegistryBuilder {
    pub fn register(mut self, name: impl Into<String>, executor: Arc<dyn CapabilityExecutor>) -> Self {
        self.executors.insert(name.into(), executor);
        self
    }

    pub fn build(self) -> ExecutorRegistry {
        ExecutorRegistry {
            executors: self.executors,
        }
    }
}

// SPDX-License-Identifier: MIT

//! Task and transformer registries
//!
//! Registries are filled explicitly during composition, before any graph
//! resolves; the engine treats them purely as lookup collaborators. Task
//! builders hand out a fresh instance per bind so concurrent runs never
//! share execution-scoped state; transformers are pure and shared.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::contract::error::{ConfigurationError, ProcessError, TransformationError};
use crate::contract::task::{Task, TaskBuilder};
use crate::contract::transformer::Transformer;

/// Maps service references to task builders
#[derive(Clone)]
pub struct TaskRegistry {
    builders: Arc<RwLock<HashMap<String, Arc<dyn TaskBuilder>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            builders: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a builder under a service reference, replacing any previous
    /// registration
    pub async fn register(&self, service: impl Into<String>, builder: Arc<dyn TaskBuilder>) {
        let mut builders = self.builders.write().await;
        builders.insert(service.into(), builder);
    }

    /// Convenience registration from a plain closure
    pub async fn register_fn<F>(&self, service: impl Into<String>, build: F)
    where
        F: Fn() -> Box<dyn Task> + Send + Sync + 'static,
    {
        self.register(service, Arc::new(build)).await;
    }

    /// Build a fresh task instance for a service reference
    pub async fn bind(&self, service: &str) -> Result<Box<dyn Task>, ConfigurationError> {
        let builders = self.builders.read().await;
        builders
            .get(service)
            .map(|builder| builder.build())
            .ok_or_else(|| ConfigurationError::MissingService(service.to_string()))
    }

    pub async fn contains(&self, service: &str) -> bool {
        self.builders.read().await.contains_key(service)
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps transformer codes to shared transformer instances
#[derive(Clone)]
pub struct TransformerRegistry {
    transformers: Arc<RwLock<HashMap<String, Arc<dyn Transformer>>>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self {
            transformers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a transformer under its own code
    pub async fn register(&self, transformer: Arc<dyn Transformer>) {
        let mut transformers = self.transformers.write().await;
        transformers.insert(transformer.code().to_string(), transformer);
    }

    pub async fn get(&self, code: &str) -> Result<Arc<dyn Transformer>, ConfigurationError> {
        let transformers = self.transformers.read().await;
        transformers
            .get(code)
            .cloned()
            .ok_or_else(|| ConfigurationError::MissingTransformer(code.to_string()))
    }

    /// Look up a transformer, resolve its options and apply it.
    ///
    /// Every failure below the lookup is wrapped so the transformer code and
    /// the target property (when given) appear in the message with the
    /// original cause chained.
    pub async fn apply(
        &self,
        code: &str,
        value: &Value,
        raw_options: &HashMap<String, Value>,
        target_property: Option<&str>,
    ) -> Result<Value, ProcessError> {
        let transformer = self.get(code).await?;
        let options = transformer
            .options_schema()
            .resolve(raw_options)
            .map_err(|e| {
                TransformationError::new(
                    code,
                    target_property.map(str::to_string),
                    Box::new(e),
                )
            })?;
        transformer.transform(value, &options).map_err(|e| {
            ProcessError::Transformation(TransformationError::new(
                code,
                target_property.map(str::to_string),
                e,
            ))
        })
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

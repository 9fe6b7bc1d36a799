//! # Service Registry
//!
//! Closed table of service adapters, assembled once at startup and immutable
//! afterwards. Steps name their target service by string; anything not registered
//! here fails with an unknown-service error instead of being looked up dynamically.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub type ServiceInputs = BTreeMap<String, Value>;
pub type ServiceOutputs = BTreeMap<String, Value>;

/// Failures an adapter may report for one invocation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("service timed out after {0:?}")]
    Timeout(Duration),
    #[error("service failed: {0}")]
    Failed(String),
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
}

/// Transport-agnostic binding to one external service
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    fn service_name(&self) -> &str;

    /// Invoke `operation`; `timeout` is advisory, callers enforce it independently
    async fn invoke(
        &self,
        operation: &str,
        inputs: ServiceInputs,
        timeout: Duration,
    ) -> Result<ServiceOutputs, ServiceError>;
}

type OperationFn =
    Arc<dyn Fn(ServiceInputs) -> BoxFuture<'static, Result<ServiceOutputs, ServiceError>> + Send + Sync>;

/// Adapter whose operations are in-process async functions
pub struct InProcessService {
    name: String,
    operations: HashMap<String, OperationFn>,
}

impl InProcessService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: HashMap::new(),
        }
    }

    pub fn with_operation<F, Fut>(mut self, operation: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ServiceInputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServiceOutputs, ServiceError>> + Send + 'static,
    {
        let handler: OperationFn = Arc::new(move |inputs| Box::pin(handler(inputs)));
        self.operations.insert(operation.into(), handler);
        self
    }

    pub fn operations(&self) -> Vec<&str> {
        self.operations.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for InProcessService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessService")
            .field("name", &self.name)
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl ServiceAdapter for InProcessService {
    fn service_name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        operation: &str,
        inputs: ServiceInputs,
        _timeout: Duration,
    ) -> Result<ServiceOutputs, ServiceError> {
        let handler = self
            .operations
            .get(operation)
            .ok_or_else(|| ServiceError::UnknownOperation(operation.to_string()))?;
        handler(inputs).await
    }
}

/// Immutable name -> adapter table
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    adapters: Arc<HashMap<String, Arc<dyn ServiceAdapter>>>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    pub fn resolve(&self, service: &str) -> Option<Arc<dyn ServiceAdapter>> {
        self.adapters.get(service).cloned()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.adapters.contains_key(service)
    }

    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.service_names())
            .finish()
    }
}

#[derive(Default)]
pub struct ServiceRegistryBuilder {
    adapters: HashMap<String, Arc<dyn ServiceAdapter>>,
}

impl ServiceRegistryBuilder {
    /// Register an adapter under its own service name; a later registration replaces it
    pub fn register(mut self, adapter: Arc<dyn ServiceAdapter>) -> Self {
        let name = adapter.service_name().to_string();
        self.adapters.insert(name, adapter);
        self
    }

    pub fn build(self) -> ServiceRegistry {
        info!(services = self.adapters.len(), "Service registry built");
        ServiceRegistry {
            adapters: Arc::new(self.adapters),
        }
    }
}

//! # Registries
//!
//! Startup-assembled lookup tables injected into the orchestrator:
//! - [`service_registry`] - adapters for the external services steps dispatch to
//! - [`template_registry`] - published execution templates

pub mod service_registry;
pub mod template_registry;

pub use service_registry::{
    InProcessService, ServiceAdapter, ServiceError, ServiceInputs, ServiceOutputs,
    ServiceRegistry, ServiceRegistryBuilder,
};
pub use template_registry::{InMemoryTemplateRegistry, TemplateRegistry};

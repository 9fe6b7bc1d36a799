//! # Template Registry
//!
//! Read-only lookup of published [`ExecutionTemplate`]s. Templates are validated when
//! registered and never change afterwards; executions hold an `Arc` to the stored copy.

use crate::error::{Result, TaskerBatchError};
use crate::models::ExecutionTemplate;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait TemplateRegistry: Send + Sync {
    /// Fetch a published template, `TemplateNotFound` if absent
    async fn get_template(&self, template_id: &str) -> Result<Arc<ExecutionTemplate>>;
}

#[derive(Debug, Default)]
pub struct InMemoryTemplateRegistry {
    templates: DashMap<String, Arc<ExecutionTemplate>>,
}

impl InMemoryTemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and publish a template; ids cannot be re-registered
    pub fn register(&self, template: ExecutionTemplate) -> Result<Arc<ExecutionTemplate>> {
        template.validate()?;

        let template_id = template.id.clone();
        let template = Arc::new(template);
        match self.templates.entry(template_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(TaskerBatchError::TemplateAlreadyRegistered { template_id })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(template.clone());
                info!(
                    template_id = %template_id,
                    steps = template.steps.len(),
                    "Template registered"
                );
                Ok(template)
            }
        }
    }

    /// Register every template in a JSON array of definitions
    pub fn register_from_json(&self, definitions: &str) -> Result<Vec<Arc<ExecutionTemplate>>> {
        let templates: Vec<ExecutionTemplate> = serde_json::from_str(definitions)?;
        templates
            .into_iter()
            .map(|template| self.register(template))
            .collect()
    }

    pub fn template_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.templates.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[async_trait]
impl TemplateRegistry for InMemoryTemplateRegistry {
    async fn get_template(&self, template_id: &str) -> Result<Arc<ExecutionTemplate>> {
        self.templates
            .get(template_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TaskerBatchError::TemplateNotFound {
                template_id: template_id.to_string(),
            })
    }
}

//! Configuration error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration from {source_name}: {reason}")]
    LoadFailed { source_name: String, reason: String },

    #[error("Invalid value for '{field}' ({value}): {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required field '{field}' in {section}")]
    MissingRequiredField { field: String, section: String },
}

impl ConfigurationError {
    pub fn load_failed(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::LoadFailed {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_required_field(field: impl Into<String>, section: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            section: section.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

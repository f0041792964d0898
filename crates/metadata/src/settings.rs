use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Plugin-local static settings.
///
/// Everything else lives in the external config document; these settings only
/// say which part of that document applies to this process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputSettings {
    /// Selects the `config.<instance_name>` entry of the config document
    pub instance_name: String,
    /// Subject namespace for transports with hierarchical subjects (NATS).
    /// If not set, topics are published as-is.
    #[serde(default)]
    pub subject_prefix: Option<String>,
}

impl OutputSettings {
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            subject_prefix: None,
        }
    }

    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = Some(prefix.into());
        self
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let settings: OutputSettings = serde_yaml::from_str(&content)?;
        if settings.instance_name.trim().is_empty() {
            return Err(ConfigError::MissingField("instance_name".to_string()));
        }
        Ok(settings)
    }
}

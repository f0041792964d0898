use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration document as exchanged with the external config store.
///
/// Field names follow the store's schema, so the interface section keeps its
/// PascalCase keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigDocument {
    /// Per-instance application config, keyed by instance name
    #[serde(default)]
    pub config: HashMap<String, AppConfig>,
    #[serde(default)]
    pub interfaces: Interfaces,
}

/// Application config for one output instance
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Either a bool or the strings "true"/"false"
    #[serde(default)]
    pub profiling: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Interfaces {
    #[serde(rename = "Publishers", default)]
    pub publishers: Vec<PublisherDocument>,
}

/// One publisher interface. Everything is optional here so the translator can
/// name the exact missing field instead of surfacing a serde error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PublisherDocument {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Type", default)]
    pub transport: Option<String>,
    #[serde(rename = "EndPoint", default)]
    pub endpoint: Option<String>,
    #[serde(rename = "Topics", default)]
    pub topics: Vec<String>,
    #[serde(rename = "AllowedClients", default)]
    pub allowed_clients: Vec<String>,
}

impl ConfigDocument {
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::document::{ConfigDocument, PublisherDocument};
use crate::error::ConfigError;
use crate::settings::OutputSettings;

/// Topic sentinel that accepts every incoming record name
pub const WILDCARD_TOPIC: &str = "*";

/// Client identity sentinel that allows any subscriber
const ANY_CLIENT: &str = "*";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Nats,
    Memory,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Nats => "nats",
            TransportType::Memory => "memory",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nats" => Ok(TransportType::Nats),
            "memory" => Ok(TransportType::Memory),
            other => Err(other.to_string()),
        }
    }
}

/// Transport parameters of one declared publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportDescriptor {
    pub name: String,
    pub transport: TransportType,
    pub endpoint: String,
    pub allowed_clients: Vec<String>,
}

impl TransportDescriptor {
    pub fn allows_any_client(&self) -> bool {
        self.allowed_clients.iter().any(|c| c == ANY_CLIENT)
    }
}

/// How the set of publishable topics is decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicMode {
    /// Only the listed topics may publish; publishers are created at connect
    Static(HashMap<String, Arc<TransportDescriptor>>),
    /// Any topic may publish; publishers are created on first write with this
    /// descriptor
    Wildcard(Arc<TransportDescriptor>),
}

impl TopicMode {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, TopicMode::Wildcard(_))
    }

    /// Descriptor a topic publishes with, or None if the topic is not authorized
    pub fn descriptor_for(&self, topic: &str) -> Option<&Arc<TransportDescriptor>> {
        match self {
            TopicMode::Static(topics) => topics.get(topic),
            TopicMode::Wildcard(descriptor) => Some(descriptor),
        }
    }
}

/// Parameters of the single shared bus connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusParams {
    pub transport: TransportType,
    pub endpoint: String,
    pub subject_prefix: Option<String>,
}

/// Validated configuration snapshot, immutable after init
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    pub instance_name: String,
    pub profiling: bool,
    pub mode: TopicMode,
    pub connection: BusParams,
    pub publishers: Vec<Arc<TransportDescriptor>>,
}

impl PluginConfig {
    /// Statically declared topics, sorted. Empty in wildcard mode.
    pub fn declared_topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = match &self.mode {
            TopicMode::Static(topics) => topics.keys().map(String::as_str).collect(),
            TopicMode::Wildcard(_) => Vec::new(),
        };
        topics.sort_unstable();
        topics
    }
}

/// Translate a config document into a validated `PluginConfig`.
///
/// Does not touch the network.
pub fn translate(
    document: &ConfigDocument,
    settings: &OutputSettings,
) -> Result<PluginConfig, ConfigError> {
    let app = document
        .config
        .get(&settings.instance_name)
        .ok_or_else(|| ConfigError::MissingInstance(settings.instance_name.clone()))?;

    let profiling = parse_profiling(&settings.instance_name, app.profiling.as_ref())?;

    if document.interfaces.publishers.is_empty() {
        return Err(ConfigError::NoPublishers);
    }

    let mut publishers: Vec<Arc<TransportDescriptor>> =
        Vec::with_capacity(document.interfaces.publishers.len());
    let mut names = HashSet::new();
    // topic -> index into publishers
    let mut owners: HashMap<String, usize> = HashMap::new();
    let mut wildcard: Option<usize> = None;
    let mut total_topics = 0usize;

    for (index, doc) in document.interfaces.publishers.iter().enumerate() {
        let descriptor = parse_descriptor(index, doc)?;

        if !names.insert(descriptor.name.clone()) {
            return Err(ConfigError::DuplicatePublisher(descriptor.name));
        }

        if let Some(first) = publishers.first() {
            if first.transport != descriptor.transport {
                return Err(ConfigError::MixedTransports {
                    first: first.transport.to_string(),
                    second: descriptor.transport.to_string(),
                });
            }
        }

        for (topic_index, topic) in doc.topics.iter().enumerate() {
            if topic.is_empty() {
                return Err(ConfigError::InvalidField {
                    field: format!("interfaces.Publishers[{}].Topics[{}]", index, topic_index),
                    value: String::new(),
                });
            }
            total_topics += 1;
            if topic == WILDCARD_TOPIC {
                wildcard = Some(index);
            }
            if let Some(&owner) = owners.get(topic) {
                return Err(ConfigError::DuplicateTopic {
                    topic: topic.clone(),
                    first: publishers[owner].name.clone(),
                    second: descriptor.name,
                });
            }
            owners.insert(topic.clone(), index);
        }

        publishers.push(Arc::new(descriptor));
    }

    if wildcard.is_some() && total_topics > 1 {
        return Err(ConfigError::WildcardNotExclusive);
    }

    let mode = match wildcard {
        Some(index) => TopicMode::Wildcard(Arc::clone(&publishers[index])),
        None => TopicMode::Static(
            owners
                .into_iter()
                .map(|(topic, index)| (topic, Arc::clone(&publishers[index])))
                .collect(),
        ),
    };

    let primary = &publishers[0];
    let connection = BusParams {
        transport: primary.transport,
        endpoint: primary.endpoint.clone(),
        subject_prefix: settings.subject_prefix.clone(),
    };

    Ok(PluginConfig {
        instance_name: settings.instance_name.clone(),
        profiling,
        mode,
        connection,
        publishers,
    })
}

fn parse_profiling(
    instance: &str,
    value: Option<&serde_json::Value>,
) -> Result<bool, ConfigError> {
    let invalid = |value: String| ConfigError::InvalidField {
        field: format!("config.{}.profiling", instance),
        value,
    };

    match value {
        None | Some(serde_json::Value::Null) => Ok(false),
        Some(serde_json::Value::Bool(b)) => Ok(*b),
        Some(serde_json::Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(invalid(s.clone())),
        },
        Some(other) => Err(invalid(other.to_string())),
    }
}

fn parse_descriptor(
    index: usize,
    doc: &PublisherDocument,
) -> Result<TransportDescriptor, ConfigError> {
    let field = |name: &str| format!("interfaces.Publishers[{}].{}", index, name);

    let name = non_empty(doc.name.as_deref())
        .ok_or_else(|| ConfigError::MissingField(field("Name")))?;

    let transport = non_empty(doc.transport.as_deref())
        .ok_or_else(|| ConfigError::MissingField(field("Type")))?;
    let transport = transport
        .parse::<TransportType>()
        .map_err(|transport| ConfigError::UnknownTransport {
            publisher: name.to_string(),
            transport,
        })?;

    let endpoint = non_empty(doc.endpoint.as_deref())
        .ok_or_else(|| ConfigError::MissingField(field("EndPoint")))?;

    if doc.topics.is_empty() {
        return Err(ConfigError::EmptyTopics(name.to_string()));
    }

    let allowed_clients = if doc.allowed_clients.is_empty() {
        vec![ANY_CLIENT.to_string()]
    } else {
        doc.allowed_clients.clone()
    };

    Ok(TransportDescriptor {
        name: name.to_string(),
        transport,
        endpoint: endpoint.to_string(),
        allowed_clients,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

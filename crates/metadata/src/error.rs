use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("instance '{0}' not found in config document")]
    MissingInstance(String),
    #[error("missing field: {0}")]
    MissingField(String),
    #[error("invalid value for {field}: {value}")]
    InvalidField { field: String, value: String },
    #[error("no publishers declared in interfaces.Publishers")]
    NoPublishers,
    #[error("publisher '{0}' declares no topics")]
    EmptyTopics(String),
    #[error("publisher '{publisher}' uses unknown transport type '{transport}'")]
    UnknownTransport { publisher: String, transport: String },
    #[error("publisher '{0}' is declared more than once")]
    DuplicatePublisher(String),
    #[error("topic '{topic}' is declared by both '{first}' and '{second}'")]
    DuplicateTopic {
        topic: String,
        first: String,
        second: String,
    },
    #[error("wildcard topic '*' must be the only declared topic")]
    WildcardNotExclusive,
    #[error("publishers must share one transport type, found '{first}' and '{second}'")]
    MixedTransports { first: String, second: String },
}

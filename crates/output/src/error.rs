use thiserror::Error;

use msgbus_metadata::ConfigError;
use msgbus_middleware::TransportError;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("topic '{0}' is not declared for publishing")]
    UnauthorizedTopic(String),
    #[error("publisher for topic '{topic}' could not be created: {source}")]
    Create {
        topic: String,
        #[source]
        source: TransportError,
    },
    #[error("publisher registry is stopped")]
    Closed,
}

impl RegistryError {
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::UnauthorizedTopic(_) => "unauthorized",
            RegistryError::Create { .. } => "create",
            RegistryError::Closed => "closed",
        }
    }
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("bus connection failed: {0}")]
    Connection(#[source] TransportError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("topic '{topic}': {source}")]
    Publish {
        topic: String,
        #[source]
        source: TransportError,
    },
    #[error("serialization of '{name}' failed: {reason}")]
    Serialize { name: String, reason: String },
    #[error("invalid state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("bus shutdown failed: {0}")]
    Shutdown(#[source] TransportError),
}

impl OutputError {
    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            OutputError::Config(_) => "config",
            OutputError::Connection(_) => "connection",
            OutputError::Registry(e) => e.kind(),
            OutputError::Publish { source, .. } => source.kind(),
            OutputError::Serialize { .. } => "serialize",
            OutputError::InvalidState { .. } => "invalid_state",
            OutputError::Shutdown(_) => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_topic_and_cause() {
        let err = OutputError::Publish {
            topic: "temperature".to_string(),
            source: TransportError::Closed,
        };
        assert_eq!(err.to_string(), "topic 'temperature': bus connection is closed");
        assert_eq!(err.kind(), "closed");

        let err = OutputError::from(RegistryError::Create {
            topic: "humidity".to_string(),
            source: TransportError::CreateFailed {
                topic: "humidity".to_string(),
                reason: "endpoint e1 already bound by 'pub2'".to_string(),
            },
        });
        assert!(err.to_string().contains("humidity"));
        assert!(err.to_string().contains("already bound"));
        assert_eq!(err.kind(), "create");
    }

    #[test]
    fn test_unauthorized_kind() {
        let err = OutputError::from(RegistryError::UnauthorizedTopic("humidity".to_string()));
        assert_eq!(err.kind(), "unauthorized");
    }
}

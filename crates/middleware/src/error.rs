use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("failed to create publisher for topic '{topic}': {reason}")]
    CreateFailed { topic: String, reason: String },
    #[error("publish to topic '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("publisher for topic '{0}' is stopped")]
    Stopped(String),
    #[error("bus connection is closed")]
    Closed,
    #[error("client '{client}' is not allowed on topic '{topic}'")]
    NotAllowed { client: String, topic: String },
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
}

impl TransportError {
    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::ConnectionFailed(_) => "connection",
            TransportError::CreateFailed { .. } => "create",
            TransportError::PublishFailed { .. } => "publish",
            TransportError::Stopped(_) => "stopped",
            TransportError::Closed => "closed",
            TransportError::NotAllowed { .. } => "not_allowed",
            TransportError::SubscribeFailed(_) => "subscribe",
        }
    }
}

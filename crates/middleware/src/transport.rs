use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use msgbus_metadata::{TransportDescriptor, TransportType};

use crate::error::TransportError;

/// Per-message metadata sent alongside the payload
pub type Headers = HashMap<String, String>;

/// Message envelope as seen by a subscriber
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub topic: String,
    pub payload: Bytes,
    pub headers: Headers,
    pub timestamp: u64,
    pub sequence: Option<u64>,
}

/// Transport parameters a publisher is created with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherParams {
    pub topic: String,
    /// Name of the declared publisher the topic belongs to
    pub publisher: String,
    pub endpoint: String,
    pub allowed_clients: Vec<String>,
}

impl PublisherParams {
    pub fn new(topic: impl Into<String>, descriptor: &TransportDescriptor) -> Self {
        Self {
            topic: topic.into(),
            publisher: descriptor.name.clone(),
            endpoint: descriptor.endpoint.clone(),
            allowed_clients: descriptor.allowed_clients.clone(),
        }
    }

    pub fn allows_client(&self, client: &str) -> bool {
        self.allowed_clients.iter().any(|c| c == "*" || c == client)
    }
}

/// Topic-bound sender living on the shared connection
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    fn topic(&self) -> &str;

    /// Send one payload. Not retried on failure.
    async fn publish(&self, payload: Bytes, headers: Headers) -> Result<(), TransportError>;

    /// Release the sender. Calling it again is a no-op.
    async fn stop(&self) -> Result<(), TransportError>;

    fn is_stopped(&self) -> bool;
}

/// The single shared bus connection
#[async_trait]
pub trait Transport: Send + Sync {
    fn transport_type(&self) -> TransportType;

    /// Mint a sender for one topic. Failure leaves the connection usable.
    async fn create_publisher(
        &self,
        params: &PublisherParams,
    ) -> Result<Arc<dyn TopicPublisher>, TransportError>;

    /// Release the connection. Calling it again is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    fn is_closed(&self) -> bool;
}

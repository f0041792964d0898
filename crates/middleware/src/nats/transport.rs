use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use msgbus_metadata::TransportType;

use crate::error::TransportError;
use crate::nats::subjects::SubjectBuilder;
use crate::transport::{Headers, PublisherParams, TopicPublisher, Transport};

/// Strip scheme and trailing slash so "nats://host:4222/" and "host:4222" compare equal
fn normalize_endpoint(endpoint: &str) -> &str {
    let endpoint = endpoint.trim();
    let endpoint = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint);
    endpoint.trim_end_matches('/')
}

fn server_url(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("nats://{}", endpoint)
    }
}

struct NatsConnection {
    client: Client,
    /// Normalized endpoint the client is connected to
    server: String,
    subjects: SubjectBuilder,
    closed: AtomicBool,
}

/// NATS transport: one client connection, one subject per topic
pub struct NatsTransport {
    conn: Arc<NatsConnection>,
}

impl NatsTransport {
    /// Create a new NatsTransport from an existing client
    pub fn new(client: Client, endpoint: &str, subject_prefix: Option<&str>) -> Self {
        Self {
            conn: Arc::new(NatsConnection {
                client,
                server: normalize_endpoint(endpoint).to_string(),
                subjects: SubjectBuilder::new(subject_prefix),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Connect to NATS server and create transport
    pub async fn connect(endpoint: &str, subject_prefix: Option<&str>) -> Result<Self, TransportError> {
        let url = server_url(endpoint);
        let client = async_nats::connect(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", url, e)))?;
        info!(url = %url, "Connected to NATS");
        Ok(Self::new(client, endpoint, subject_prefix))
    }
}

struct NatsPublisher {
    topic: String,
    subject: String,
    conn: Arc<NatsConnection>,
    stopped: AtomicBool,
}

#[async_trait]
impl TopicPublisher for NatsPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, payload: Bytes, headers: Headers) -> Result<(), TransportError> {
        if self.conn.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TransportError::Stopped(self.topic.clone()));
        }

        let result = if headers.is_empty() {
            self.conn.client.publish(self.subject.clone(), payload).await
        } else {
            let mut nats_headers = async_nats::HeaderMap::new();
            for (k, v) in headers {
                nats_headers.insert(k, v);
            }
            self.conn
                .client
                .publish_with_headers(self.subject.clone(), nats_headers, payload)
                .await
        };

        result.map_err(|e| TransportError::PublishFailed {
            topic: self.topic.clone(),
            reason: e.to_string(),
        })
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.conn.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        // Push out whatever this topic still has buffered in the client
        self.conn
            .client
            .flush()
            .await
            .map_err(|e| TransportError::PublishFailed {
                topic: self.topic.clone(),
                reason: format!("flush on stop failed: {}", e),
            })?;
        debug!(topic = %self.topic, subject = %self.subject, "NATS publisher stopped");
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for NatsTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Nats
    }

    async fn create_publisher(
        &self,
        params: &PublisherParams,
    ) -> Result<Arc<dyn TopicPublisher>, TransportError> {
        if self.conn.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let endpoint = normalize_endpoint(&params.endpoint);
        if endpoint != self.conn.server {
            return Err(TransportError::CreateFailed {
                topic: params.topic.clone(),
                reason: format!(
                    "endpoint {} is not served by this connection ({})",
                    endpoint, self.conn.server
                ),
            });
        }

        if !params.allowed_clients.iter().any(|c| c == "*") {
            // Subscriber permissions live in the NATS server's authorization config
            debug!(
                topic = %params.topic,
                allowed_clients = ?params.allowed_clients,
                "Allowed clients are enforced by the NATS server"
            );
        }

        let subject = self
            .conn
            .subjects
            .topic(&params.topic)
            .map_err(|reason| TransportError::CreateFailed {
                topic: params.topic.clone(),
                reason,
            })?;
        debug!(topic = %params.topic, subject = %subject, "NATS publisher created");

        Ok(Arc::new(NatsPublisher {
            topic: params.topic.clone(),
            subject,
            conn: Arc::clone(&self.conn),
            stopped: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.conn.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.conn
            .client
            .flush()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("flush on close failed: {}", e)))?;
        info!(server = %self.conn.server, "NATS transport closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.conn.closed.load(Ordering::SeqCst)
    }
}

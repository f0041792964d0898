use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

use msgbus_metadata::TransportType;

use crate::error::TransportError;
use crate::latency::now_tsc;
use crate::transport::{Headers, PublisherParams, TopicPublisher, Transport, TransportMessage};

const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Declared publisher that owns an endpoint, and how many topic senders use it
struct EndpointBinding {
    owner: String,
    publishers: usize,
}

struct Inner {
    channels: DashMap<String, broadcast::Sender<TransportMessage>>,
    endpoints: DashMap<String, EndpointBinding>,
    /// topic -> parameters of its publisher, set when the publisher is created
    acl: DashMap<String, PublisherParams>,
    sequence: AtomicU64,
    created: AtomicUsize,
    stopped: AtomicUsize,
    closed: AtomicBool,
}

impl Inner {
    #[inline]
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn get_or_create_channel(&self, topic: &str) -> broadcast::Sender<TransportMessage> {
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_BUFFER_SIZE).0)
            .clone()
    }

    /// Whether `client` may read `topic`. Topics without a publisher yet are
    /// undecided and report `None`.
    fn client_allowed(&self, topic: &str, client: &str) -> Option<bool> {
        self.acl.get(topic).map(|params| params.allows_client(client))
    }

    fn release_endpoint(&self, endpoint: &str) {
        if let Entry::Occupied(mut binding) = self.endpoints.entry(endpoint.to_string()) {
            binding.get_mut().publishers -= 1;
            if binding.get().publishers == 0 {
                binding.remove();
            }
        }
    }
}

/// In-process bus. Endpoints behave like bound sockets: a second declared
/// publisher cannot bind an endpoint another one holds.
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: DashMap::new(),
                endpoints: DashMap::new(),
                acl: DashMap::new(),
                sequence: AtomicU64::new(0),
                created: AtomicUsize::new(0),
                stopped: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to a topic as `client`. Rejected up front if the topic's
    /// publisher exists and does not allow `client`; a subscription made
    /// before the publisher exists is checked again on every receive.
    pub fn subscribe(&self, topic: &str, client: &str) -> Result<InMemorySubscription, TransportError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.inner.client_allowed(topic, client) == Some(false) {
            return Err(not_allowed(client, topic));
        }
        let rx = self.inner.get_or_create_channel(topic).subscribe();
        Ok(InMemorySubscription {
            rx,
            topic: topic.to_string(),
            client: client.to_string(),
            inner: Arc::clone(&self.inner),
        })
    }

    /// Number of publishers ever created on this connection
    pub fn created_publishers(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    /// Number of publishers released on this connection
    pub fn stopped_publishers(&self) -> usize {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn is_endpoint_bound(&self, endpoint: &str) -> bool {
        self.inner.endpoints.contains_key(endpoint)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn not_allowed(client: &str, topic: &str) -> TransportError {
    TransportError::NotAllowed {
        client: client.to_string(),
        topic: topic.to_string(),
    }
}

/// Receiving side of an in-memory topic, bound to one client identity
pub struct InMemorySubscription {
    rx: broadcast::Receiver<TransportMessage>,
    topic: String,
    client: String,
    inner: Arc<Inner>,
}

impl InMemorySubscription {
    /// Receive next message (blocks until available). Fails with `NotAllowed`
    /// if the topic's publisher does not allow this client.
    pub async fn next(&mut self) -> Result<TransportMessage, TransportError> {
        let msg = self
            .rx
            .recv()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        self.admit(msg)
    }

    /// Receive a message if one is already queued. Messages this client may
    /// not read are never returned.
    pub fn try_next(&mut self) -> Option<TransportMessage> {
        let msg = self.rx.try_recv().ok()?;
        self.admit(msg).ok()
    }

    fn admit(&self, msg: TransportMessage) -> Result<TransportMessage, TransportError> {
        // A message on the channel means the publisher, and so its ACL, exists
        match self.inner.client_allowed(&self.topic, &self.client) {
            Some(true) => Ok(msg),
            _ => Err(not_allowed(&self.client, &self.topic)),
        }
    }
}

struct InMemoryPublisher {
    topic: String,
    endpoint: String,
    sender: broadcast::Sender<TransportMessage>,
    inner: Arc<Inner>,
    stopped: AtomicBool,
}

#[async_trait]
impl TopicPublisher for InMemoryPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, payload: Bytes, headers: Headers) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TransportError::Stopped(self.topic.clone()));
        }

        let msg = TransportMessage {
            topic: self.topic.clone(),
            payload,
            headers,
            timestamp: now_tsc(),
            sequence: Some(self.inner.next_sequence()),
        };
        // No subscribers is not an error on a pub/sub bus
        let _ = self.sender.send(msg);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.release_endpoint(&self.endpoint);
        self.inner.stopped.fetch_add(1, Ordering::SeqCst);
        debug!(topic = %self.topic, "In-memory publisher stopped");
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Memory
    }

    async fn create_publisher(
        &self,
        params: &PublisherParams,
    ) -> Result<Arc<dyn TopicPublisher>, TransportError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        match self.inner.endpoints.entry(params.endpoint.clone()) {
            Entry::Occupied(mut binding) => {
                if binding.get().owner != params.publisher {
                    return Err(TransportError::CreateFailed {
                        topic: params.topic.clone(),
                        reason: format!(
                            "endpoint {} already bound by '{}'",
                            params.endpoint,
                            binding.get().owner
                        ),
                    });
                }
                binding.get_mut().publishers += 1;
            }
            Entry::Vacant(slot) => {
                slot.insert(EndpointBinding {
                    owner: params.publisher.clone(),
                    publishers: 1,
                });
            }
        }

        self.inner.acl.insert(params.topic.clone(), params.clone());
        self.inner.created.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(InMemoryPublisher {
            topic: params.topic.clone(),
            endpoint: params.endpoint.clone(),
            sender: self.inner.get_or_create_channel(&params.topic),
            inner: Arc::clone(&self.inner),
            stopped: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.endpoints.clear();
        info!(
            created = self.created_publishers(),
            stopped = self.stopped_publishers(),
            "In-memory transport closed"
        );
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(topic: &str, publisher: &str, endpoint: &str) -> PublisherParams {
        PublisherParams {
            topic: topic.to_string(),
            publisher: publisher.to_string(),
            endpoint: endpoint.to_string(),
            allowed_clients: vec!["*".to_string()],
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let transport = InMemoryTransport::new();
        let publisher = transport
            .create_publisher(&params("temperature", "pub1", "e1"))
            .await
            .unwrap();
        let mut sub = transport.subscribe("temperature", "client").unwrap();

        publisher
            .publish(Bytes::from("hello"), Headers::new())
            .await
            .unwrap();

        let msg = sub.next().await.unwrap();
        assert_eq!(msg.topic, "temperature");
        assert_eq!(msg.payload, Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_headers_delivered() {
        let transport = InMemoryTransport::new();
        let publisher = transport
            .create_publisher(&params("pressure", "pub1", "e1"))
            .await
            .unwrap();
        let mut sub = transport.subscribe("pressure", "client").unwrap();

        let mut headers = Headers::new();
        headers.insert("ts".to_string(), "1".to_string());
        publisher.publish(Bytes::from("x"), headers).await.unwrap();

        let msg = sub.next().await.unwrap();
        assert_eq!(msg.headers.get("ts").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_sequence_numbers_increment() {
        let transport = InMemoryTransport::new();
        let publisher = transport
            .create_publisher(&params("seq", "pub1", "e1"))
            .await
            .unwrap();
        let mut sub = transport.subscribe("seq", "client").unwrap();

        publisher.publish(Bytes::from("1"), Headers::new()).await.unwrap();
        publisher.publish(Bytes::from("2"), Headers::new()).await.unwrap();

        assert_eq!(sub.next().await.unwrap().sequence, Some(0));
        assert_eq!(sub.next().await.unwrap().sequence, Some(1));
    }

    #[tokio::test]
    async fn test_endpoint_shared_by_same_publisher() {
        let transport = InMemoryTransport::new();
        transport
            .create_publisher(&params("t1", "pub1", "e1"))
            .await
            .unwrap();
        transport
            .create_publisher(&params("t2", "pub1", "e1"))
            .await
            .unwrap();
        assert_eq!(transport.created_publishers(), 2);
    }

    #[tokio::test]
    async fn test_endpoint_already_bound() {
        let transport = InMemoryTransport::new();
        transport
            .create_publisher(&params("t1", "pub1", "e1"))
            .await
            .unwrap();

        let result = transport.create_publisher(&params("t2", "pub2", "e1")).await;
        assert!(matches!(result, Err(TransportError::CreateFailed { topic, .. }) if topic == "t2"));

        // The connection survives a failed create
        assert!(!transport.is_closed());
        transport
            .create_publisher(&params("t2", "pub2", "e2"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_releases_endpoint_and_is_idempotent() {
        let transport = InMemoryTransport::new();
        let publisher = transport
            .create_publisher(&params("t1", "pub1", "e1"))
            .await
            .unwrap();

        publisher.stop().await.unwrap();
        publisher.stop().await.unwrap();

        assert!(publisher.is_stopped());
        assert_eq!(transport.stopped_publishers(), 1);
        assert!(!transport.is_endpoint_bound("e1"));
    }

    #[tokio::test]
    async fn test_publish_after_stop_fails() {
        let transport = InMemoryTransport::new();
        let publisher = transport
            .create_publisher(&params("t1", "pub1", "e1"))
            .await
            .unwrap();
        publisher.stop().await.unwrap();

        let result = publisher.publish(Bytes::from("late"), Headers::new()).await;
        assert_eq!(result, Err(TransportError::Stopped("t1".to_string())));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_work() {
        let transport = InMemoryTransport::new();
        let publisher = transport
            .create_publisher(&params("t1", "pub1", "e1"))
            .await
            .unwrap();

        transport.close().await.unwrap();
        transport.close().await.unwrap();

        assert!(transport.is_closed());
        assert_eq!(
            publisher.publish(Bytes::from("x"), Headers::new()).await,
            Err(TransportError::Closed)
        );
        assert!(matches!(
            transport.create_publisher(&params("t2", "pub1", "e1")).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_subscribe_checks_allowed_clients() {
        let transport = InMemoryTransport::new();
        let mut restricted = params("t1", "pub1", "e1");
        restricted.allowed_clients = vec!["dashboard".to_string()];
        transport.create_publisher(&restricted).await.unwrap();

        assert!(transport.subscribe("t1", "dashboard").is_ok());
        assert!(matches!(
            transport.subscribe("t1", "intruder"),
            Err(TransportError::NotAllowed { .. })
        ));
    }

    #[tokio::test]
    async fn test_early_subscriber_checked_once_publisher_exists() {
        let transport = InMemoryTransport::new();
        // Both subscribe before any publisher exists, as in wildcard mode
        let mut intruder = transport.subscribe("humidity", "intruder").unwrap();
        let mut dashboard = transport.subscribe("humidity", "dashboard").unwrap();

        let mut restricted = params("humidity", "pub1", "e1");
        restricted.allowed_clients = vec!["dashboard".to_string()];
        let publisher = transport.create_publisher(&restricted).await.unwrap();
        publisher
            .publish(Bytes::from("42"), Headers::new())
            .await
            .unwrap();

        assert_eq!(dashboard.next().await.unwrap().payload, Bytes::from("42"));
        assert!(matches!(
            intruder.next().await,
            Err(TransportError::NotAllowed { client, .. }) if client == "intruder"
        ));
    }

    #[tokio::test]
    async fn test_early_subscriber_try_next_filters() {
        let transport = InMemoryTransport::new();
        let mut intruder = transport.subscribe("humidity", "intruder").unwrap();

        let mut restricted = params("humidity", "pub1", "e1");
        restricted.allowed_clients = vec!["dashboard".to_string()];
        let publisher = transport.create_publisher(&restricted).await.unwrap();
        publisher
            .publish(Bytes::from("42"), Headers::new())
            .await
            .unwrap();

        assert!(intruder.try_next().is_none());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let transport = InMemoryTransport::new();
        let publisher = transport
            .create_publisher(&params("lonely", "pub1", "e1"))
            .await
            .unwrap();
        assert!(publisher.publish(Bytes::from("x"), Headers::new()).await.is_ok());
    }
}

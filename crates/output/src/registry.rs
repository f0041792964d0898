//! Topic -> publisher registry
//!
//! Each topic owns a `OnceCell`. The map's shard lock is only held long enough
//! to fetch or insert that cell; the publisher itself is created inside the
//! cell's initializer, so a burst of first writes to one topic creates exactly
//! one publisher while other topics proceed untouched.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use msgbus_metadata::{PluginConfig, TopicMode};
use msgbus_middleware::{Headers, PublisherParams, TopicPublisher, Transport, TransportError};

use crate::error::RegistryError;
use crate::metrics::OutputMetrics;

/// Live publisher bound to one topic for its whole lifetime
pub struct PublisherEntry {
    params: PublisherParams,
    publisher: Arc<dyn TopicPublisher>,
    created_at: DateTime<Utc>,
    published: AtomicU64,
}

impl PublisherEntry {
    fn new(params: PublisherParams, publisher: Arc<dyn TopicPublisher>) -> Self {
        Self {
            params,
            publisher,
            created_at: Utc::now(),
            published: AtomicU64::new(0),
        }
    }

    pub fn topic(&self) -> &str {
        &self.params.topic
    }

    /// Transport parameters the publisher was created with
    pub fn params(&self) -> &PublisherParams {
        &self.params
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.publisher.is_stopped()
    }

    pub async fn publish(&self, payload: Bytes, headers: Headers) -> Result<(), TransportError> {
        self.publisher.publish(payload, headers).await?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.publisher.stop().await
    }
}

/// Outcome of `stop_all`
#[derive(Debug, Default)]
pub struct StopSummary {
    pub stopped: usize,
    pub failed: Vec<(String, TransportError)>,
}

type Slot = Arc<OnceCell<Arc<PublisherEntry>>>;

pub struct PublisherRegistry {
    config: Arc<PluginConfig>,
    transport: Arc<dyn Transport>,
    entries: DashMap<String, Slot>,
    closed: AtomicBool,
    metrics: OutputMetrics,
}

impl PublisherRegistry {
    pub fn new(config: Arc<PluginConfig>, transport: Arc<dyn Transport>) -> Self {
        let metrics = OutputMetrics::new(config.instance_name.clone());
        Self {
            config,
            transport,
            entries: DashMap::new(),
            closed: AtomicBool::new(false),
            metrics,
        }
    }

    /// Publisher for `topic`, created on first use if the topic is authorized.
    ///
    /// In static mode only declared topics resolve; anything else is
    /// `UnauthorizedTopic` and never reaches the transport. In wildcard mode
    /// every topic resolves with the wildcard publisher's descriptor.
    pub async fn ensure_publisher(&self, topic: &str) -> Result<Arc<PublisherEntry>, RegistryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::Closed);
        }

        // Fast path: existing entry, no creation work
        if let Some(slot) = self.entries.get(topic) {
            if let Some(entry) = slot.get() {
                return Ok(Arc::clone(entry));
            }
        }

        let descriptor = self
            .config
            .mode
            .descriptor_for(topic)
            .ok_or_else(|| RegistryError::UnauthorizedTopic(topic.to_string()))?;

        let slot: Slot = Arc::clone(self.entries.entry(topic.to_string()).or_default().value());

        let params = PublisherParams::new(topic, descriptor);
        let entry = slot
            .get_or_try_init(|| async {
                let publisher = self.transport.create_publisher(&params).await?;
                self.metrics.publisher_created();
                info!(
                    topic = %params.topic,
                    publisher = %params.publisher,
                    endpoint = %params.endpoint,
                    "Publisher created"
                );
                Ok::<_, TransportError>(Arc::new(PublisherEntry::new(params.clone(), publisher)))
            })
            .await
            .map_err(|source| RegistryError::Create {
                topic: topic.to_string(),
                source,
            })?;

        Ok(Arc::clone(entry))
    }

    /// Create one publisher per declared topic. Fails on the first error:
    /// a broken endpoint at startup is not recoverable per record.
    ///
    /// Wildcard mode creates nothing here and returns 0.
    pub async fn start_declared(&self) -> Result<usize, RegistryError> {
        match &self.config.mode {
            TopicMode::Static(_) => {
                let topics = self.config.declared_topics();
                for topic in &topics {
                    self.ensure_publisher(topic).await?;
                }
                info!(count = topics.len(), "Declared publishers started");
                Ok(topics.len())
            }
            TopicMode::Wildcard(descriptor) => {
                info!(
                    publisher = %descriptor.name,
                    "Wildcard topics, publishers will be created on first write"
                );
                Ok(0)
            }
        }
    }

    /// Stop every publisher once and clear the registry. Individual failures
    /// are logged and reported; the rest are still released.
    pub async fn stop_all(&self) -> StopSummary {
        self.closed.store(true, Ordering::SeqCst);

        let topics: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut summary = StopSummary::default();

        for topic in topics {
            let Some((_, slot)) = self.entries.remove(&topic) else {
                continue;
            };
            let Some(entry) = slot.get() else {
                continue;
            };
            match entry.stop().await {
                Ok(()) => {
                    summary.stopped += 1;
                    debug!(topic = %topic, published = entry.published_count(), "Publisher stopped");
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Failed to stop publisher, continuing");
                    summary.failed.push((topic, e));
                }
            }
            self.metrics.publisher_stopped();
        }

        if summary.stopped > 0 || !summary.failed.is_empty() {
            info!(
                stopped = summary.stopped,
                failed = summary.failed.len(),
                "All publishers stopped"
            );
        }
        summary
    }

    pub fn get(&self, topic: &str) -> Option<Arc<PublisherEntry>> {
        self.entries
            .get(topic)
            .and_then(|slot| slot.get().map(Arc::clone))
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.get(topic).is_some()
    }

    /// Number of live publishers
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered topics, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().initialized())
            .map(|e| e.key().clone())
            .collect();
        topics.sort_unstable();
        topics
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

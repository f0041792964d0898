use std::sync::Arc;

use tracing::trace;

use msgbus_middleware::{now_tsc, CLOCK};

use crate::error::OutputError;
use crate::message::Record;
use crate::metrics::OutputMetrics;
use crate::profiling::{ProfilingClock, PROFILING_ENTRY_KEY};
use crate::registry::PublisherRegistry;

/// Routes one record at a time to its topic's publisher.
///
/// Every call is a single publish attempt; failures belong to that record only
/// and nothing is buffered or retried here.
pub struct Router {
    registry: Arc<PublisherRegistry>,
    profiling: bool,
    clock: ProfilingClock,
    metrics: OutputMetrics,
}

impl Router {
    pub fn new(registry: Arc<PublisherRegistry>, profiling: bool, metrics: OutputMetrics) -> Self {
        Self {
            registry,
            profiling,
            clock: ProfilingClock::new(),
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<PublisherRegistry> {
        &self.registry
    }

    pub fn profiling(&self) -> bool {
        self.profiling
    }

    pub async fn write(&self, mut record: Record) -> Result<(), OutputError> {
        // Stamp before any bus work so the delta covers this layer only
        if self.profiling {
            record
                .metadata
                .insert(PROFILING_ENTRY_KEY.to_string(), self.clock.stamp().to_string());
        }

        let entry = match self.registry.ensure_publisher(&record.topic).await {
            Ok(entry) => entry,
            Err(e) => {
                self.metrics.inc_unresolved_failure(e.kind());
                return Err(e.into());
            }
        };

        let start = now_tsc();
        let result = entry.publish(record.payload, record.metadata).await;
        self.metrics
            .observe_publish_duration(CLOCK.delta(start, now_tsc()).as_secs_f64());

        match result {
            Ok(()) => {
                self.metrics.inc_published(&record.topic);
                trace!(topic = %record.topic, "Record published");
                Ok(())
            }
            Err(source) => {
                self.metrics.inc_failure(&record.topic, source.kind());
                Err(OutputError::Publish {
                    topic: record.topic,
                    source,
                })
            }
        }
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use msgbus_metadata::{translate, ConfigStore, OutputSettings, PluginConfig};
use msgbus_middleware::{BusFactory, Transport, TransportError};

use crate::error::OutputError;
use crate::message::{Measurement, Record};
use crate::metrics::OutputMetrics;
use crate::registry::PublisherRegistry;
use crate::router::Router;
use crate::serializer::{JsonSerializer, Serializer};

const DESCRIPTION: &str = "Publishes measurements to message bus topics";

const SAMPLE_CONFIG: &str = r#"# Most of the configuration for this output lives in the config store.
#
# Sample document the store must serve:
#
# {
#     "config": {
#         "publisher1": {
#             "profiling": "false"
#         }
#     },
#     "interfaces": {
#         "Publishers": [
#             {
#                 "Name": "publisher1",
#                 "Type": "nats",
#                 "EndPoint": "127.0.0.1:4222",
#                 "Topics": [
#                     "point_data"
#                 ],
#                 "AllowedClients": [
#                     "*"
#                 ]
#             }
#         ]
#     }
# }
#
# "config.<instance_name>" is the application config of this instance.
# "interfaces" is the message bus config. A single "*" topic publishes every
# incoming measurement name, creating publishers on first write.
#
# profiling = "true" adds a ts_msgbus_output_data_entry header (epoch millis)
# to every published record.
#
# Local settings (YAML):
instance_name: publisher1
# subject_prefix: prod.sensors
"#;

/// Lifecycle phase of the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Configured,
    Connected,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Configured => "configured",
            LifecycleState::Connected => "connected",
            LifecycleState::Stopped => "stopped",
        }
    }
}

enum State {
    Uninitialized,
    Configured {
        config: Arc<PluginConfig>,
        transport: Arc<dyn Transport>,
    },
    Connected {
        config: Arc<PluginConfig>,
        transport: Arc<dyn Transport>,
        router: Router,
    },
    Stopped,
}

impl State {
    fn lifecycle(&self) -> LifecycleState {
        match self {
            State::Uninitialized => LifecycleState::Uninitialized,
            State::Configured { .. } => LifecycleState::Configured,
            State::Connected { .. } => LifecycleState::Connected,
            State::Stopped => LifecycleState::Stopped,
        }
    }
}

/// A record of a batch that could not be published
#[derive(Debug)]
pub struct RecordFailure {
    /// Position of the record in the batch
    pub index: usize,
    pub topic: String,
    pub error: OutputError,
}

/// Per-record outcome of a `write` call
#[derive(Debug, Default)]
pub struct WriteReport {
    pub attempted: usize,
    pub published: usize,
    pub failures: Vec<RecordFailure>,
}

impl WriteReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Output plugin: Uninitialized -> Configured -> Connected -> Stopped.
///
/// `write` takes `&self` and may be called from many tasks at once; `close`
/// takes `&mut self`, so every write has returned before shutdown starts.
pub struct MsgbusOutput {
    settings: OutputSettings,
    serializer: Arc<dyn Serializer>,
    state: State,
    connected: Arc<AtomicBool>,
}

impl MsgbusOutput {
    pub fn new(settings: OutputSettings) -> Self {
        Self {
            settings,
            serializer: Arc::new(JsonSerializer),
            state: State::Uninitialized,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn set_serializer(&mut self, serializer: Arc<dyn Serializer>) {
        self.serializer = serializer;
    }

    pub fn description() -> &'static str {
        DESCRIPTION
    }

    pub fn sample_config() -> &'static str {
        SAMPLE_CONFIG
    }

    pub fn state(&self) -> LifecycleState {
        self.state.lifecycle()
    }

    pub fn settings(&self) -> &OutputSettings {
        &self.settings
    }

    /// Handle to the connected flag, for health checks
    pub fn connected_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    pub fn config(&self) -> Option<&Arc<PluginConfig>> {
        match &self.state {
            State::Configured { config, .. } | State::Connected { config, .. } => Some(config),
            _ => None,
        }
    }

    pub fn registry(&self) -> Option<&Arc<PublisherRegistry>> {
        match &self.state {
            State::Connected { router, .. } => Some(router.registry()),
            _ => None,
        }
    }

    fn expect_state(&self, expected: LifecycleState) -> Result<(), OutputError> {
        let actual = self.state();
        if actual != expected {
            return Err(OutputError::InvalidState {
                expected: expected.as_str(),
                actual: actual.as_str(),
            });
        }
        Ok(())
    }

    /// Fetch and validate the config document, then open the bus connection
    pub async fn init(&mut self, store: &dyn ConfigStore) -> Result<(), OutputError> {
        self.expect_state(LifecycleState::Uninitialized)?;
        let config = self.read_config(store)?;

        let transport = BusFactory::connect(&config.connection)
            .await
            .map_err(|e| {
                error!(error = %e, endpoint = %config.connection.endpoint, "Bus connection failed");
                OutputError::Connection(e)
            })?;

        self.state = State::Configured { config, transport };
        Ok(())
    }

    /// Like `init`, on a connection the caller already opened
    pub async fn init_with_transport(
        &mut self,
        store: &dyn ConfigStore,
        transport: Arc<dyn Transport>,
    ) -> Result<(), OutputError> {
        self.expect_state(LifecycleState::Uninitialized)?;
        let config = self.read_config(store)?;

        if transport.transport_type() != config.connection.transport {
            return Err(OutputError::Connection(TransportError::ConnectionFailed(format!(
                "config expects a {} transport, got {}",
                config.connection.transport,
                transport.transport_type()
            ))));
        }

        self.state = State::Configured { config, transport };
        Ok(())
    }

    fn read_config(&self, store: &dyn ConfigStore) -> Result<Arc<PluginConfig>, OutputError> {
        let document = store.fetch()?;
        let config = translate(&document, &self.settings).map_err(|e| {
            error!(error = %e, instance = %self.settings.instance_name, "Invalid configuration");
            e
        })?;
        info!(
            instance = %config.instance_name,
            profiling = config.profiling,
            wildcard = config.mode.is_wildcard(),
            topics = ?config.declared_topics(),
            transport = %config.connection.transport,
            "Configuration parsed"
        );
        Ok(Arc::new(config))
    }

    /// Start publishers for every declared topic
    pub async fn connect(&mut self) -> Result<(), OutputError> {
        let (config, transport) = match &self.state {
            State::Configured { config, transport } => (Arc::clone(config), Arc::clone(transport)),
            other => {
                return Err(OutputError::InvalidState {
                    expected: LifecycleState::Configured.as_str(),
                    actual: other.lifecycle().as_str(),
                })
            }
        };

        let registry = Arc::new(PublisherRegistry::new(
            Arc::clone(&config),
            Arc::clone(&transport),
        ));
        if let Err(e) = registry.start_declared().await {
            error!(error = %e, "Failed to start declared publishers");
            // Release whatever was created before the failure
            registry.stop_all().await;
            return Err(e.into());
        }

        let metrics = OutputMetrics::new(config.instance_name.clone());
        let router = Router::new(registry, config.profiling, metrics);
        self.state = State::Connected {
            config,
            transport,
            router,
        };
        self.connected.store(true, Ordering::SeqCst);
        info!(instance = %self.settings.instance_name, "Output connected");
        Ok(())
    }

    fn router(&self) -> Result<&Router, OutputError> {
        match &self.state {
            State::Connected { router, .. } => Ok(router),
            other => Err(OutputError::InvalidState {
                expected: LifecycleState::Connected.as_str(),
                actual: other.lifecycle().as_str(),
            }),
        }
    }

    /// Serialize and publish a batch.
    ///
    /// Serialization failure fails the whole call before anything is
    /// published. Publish failures are per record and reported in the
    /// `WriteReport`; the remaining records are still attempted.
    pub async fn write(&self, measurements: &[Measurement]) -> Result<WriteReport, OutputError> {
        let router = self.router()?;

        let records = measurements
            .iter()
            .map(|m| {
                self.serializer
                    .serialize(m)
                    .map(|payload| Record::new(m.name.clone(), payload))
                    .map_err(|e| OutputError::Serialize {
                        name: m.name.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = WriteReport {
            attempted: records.len(),
            ..Default::default()
        };

        for (index, record) in records.into_iter().enumerate() {
            let topic = record.topic.clone();
            match router.write(record).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Record dropped");
                    report.failures.push(RecordFailure {
                        index,
                        topic,
                        error: e,
                    });
                }
            }
        }

        Ok(report)
    }

    /// Publish one already-serialized record
    pub async fn write_record(&self, record: Record) -> Result<(), OutputError> {
        self.router()?.write(record).await
    }

    /// Stop every publisher, then close the bus connection. Safe to call more
    /// than once; no writes are accepted afterwards.
    pub async fn close(&mut self) -> Result<(), OutputError> {
        let previous = std::mem::replace(&mut self.state, State::Stopped);
        self.connected.store(false, Ordering::SeqCst);

        let transport = match previous {
            State::Uninitialized | State::Stopped => return Ok(()),
            State::Configured { transport, .. } => transport,
            State::Connected {
                transport, router, ..
            } => {
                let summary = router.registry().stop_all().await;
                if !summary.failed.is_empty() {
                    warn!(failed = summary.failed.len(), "Some publishers failed to stop");
                }
                transport
            }
        };

        transport.close().await.map_err(|e| {
            error!(error = %e, "Failed to close bus connection");
            OutputError::Shutdown(e)
        })?;
        info!(instance = %self.settings.instance_name, "Output stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msgbus_metadata::{ConfigDocument, StaticConfigStore};
    use msgbus_middleware::InMemoryTransport;
    use serde_json::json;

    fn store(instance: &str, topics: serde_json::Value) -> StaticConfigStore {
        let doc: ConfigDocument = serde_json::from_value(json!({
            "config": { instance: { "profiling": "false" } },
            "interfaces": {
                "Publishers": [{
                    "Name": "publisher1",
                    "Type": "memory",
                    "EndPoint": "127.0.0.1:65077",
                    "Topics": topics
                }]
            }
        }))
        .unwrap();
        StaticConfigStore::new(doc)
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let mut output = MsgbusOutput::new(OutputSettings::new("life-basic"));
        assert_eq!(output.state(), LifecycleState::Uninitialized);

        output.init(&store("life-basic", json!(["temperature"]))).await.unwrap();
        assert_eq!(output.state(), LifecycleState::Configured);
        assert!(!output.connected_handle().load(Ordering::SeqCst));

        output.connect().await.unwrap();
        assert_eq!(output.state(), LifecycleState::Connected);
        assert!(output.connected_handle().load(Ordering::SeqCst));

        output.close().await.unwrap();
        assert_eq!(output.state(), LifecycleState::Stopped);
        assert!(!output.connected_handle().load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_write_before_connect_rejected() {
        let mut output = MsgbusOutput::new(OutputSettings::new("life-early"));
        output.init(&store("life-early", json!(["temperature"]))).await.unwrap();

        let result = output.write(&[Measurement::new("temperature")]).await;
        assert!(matches!(
            result,
            Err(OutputError::InvalidState { expected: "connected", actual: "configured" })
        ));
    }

    #[tokio::test]
    async fn test_no_reconnect_after_stop() {
        let mut output = MsgbusOutput::new(OutputSettings::new("life-stop"));
        output.init(&store("life-stop", json!(["temperature"]))).await.unwrap();
        output.connect().await.unwrap();
        output.close().await.unwrap();

        assert!(matches!(output.connect().await, Err(OutputError::InvalidState { .. })));
        assert!(matches!(
            output.init(&store("life-stop", json!(["temperature"]))).await,
            Err(OutputError::InvalidState { .. })
        ));
        assert!(output.write(&[Measurement::new("temperature")]).await.is_err());
    }

    #[tokio::test]
    async fn test_config_error_keeps_uninitialized() {
        let mut output = MsgbusOutput::new(OutputSettings::new("missing-instance"));
        let result = output.init(&store("someone-else", json!(["temperature"]))).await;

        assert!(matches!(result, Err(OutputError::Config(_))));
        assert_eq!(output.state(), LifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn test_transport_type_mismatch_rejected() {
        let doc: ConfigDocument = serde_json::from_value(json!({
            "config": { "life-mismatch": {} },
            "interfaces": { "Publishers": [{
                "Name": "p", "Type": "nats", "EndPoint": "localhost:4222", "Topics": ["t"]
            }]}
        }))
        .unwrap();
        let mut output = MsgbusOutput::new(OutputSettings::new("life-mismatch"));
        let result = output
            .init_with_transport(&StaticConfigStore::new(doc), Arc::new(InMemoryTransport::new()))
            .await;
        assert!(matches!(result, Err(OutputError::Connection(_))));
    }

    #[tokio::test]
    async fn test_connect_failure_releases_partial_publishers() {
        let transport = Arc::new(InMemoryTransport::new());
        let doc: ConfigDocument = serde_json::from_value(json!({
            "config": { "life-partial": {} },
            "interfaces": { "Publishers": [
                { "Name": "a", "Type": "memory", "EndPoint": "e1", "Topics": ["t1"] },
                { "Name": "b", "Type": "memory", "EndPoint": "e2", "Topics": ["t2"] }
            ]}
        }))
        .unwrap();
        // "b" cannot bind e2
        transport
            .create_publisher(&msgbus_middleware::PublisherParams {
                topic: "squatter".to_string(),
                publisher: "intruder".to_string(),
                endpoint: "e2".to_string(),
                allowed_clients: vec!["*".to_string()],
            })
            .await
            .unwrap();

        let mut output = MsgbusOutput::new(OutputSettings::new("life-partial"));
        output
            .init_with_transport(&StaticConfigStore::new(doc), transport.clone())
            .await
            .unwrap();

        let result = output.connect().await;
        assert!(matches!(result, Err(OutputError::Registry(_))));
        assert_eq!(output.state(), LifecycleState::Configured);
        // t1 was created then released
        assert_eq!(transport.stopped_publishers(), 1);
        assert!(!transport.is_endpoint_bound("e1"));

        output.close().await.unwrap();
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_serialization_failure_fails_whole_batch() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut output = MsgbusOutput::new(OutputSettings::new("life-serialize"));
        output
            .init_with_transport(&store("life-serialize", json!(["*"])), transport.clone())
            .await
            .unwrap();
        output.connect().await.unwrap();

        let batch = vec![Measurement::new("temperature"), Measurement::new("")];
        let result = output.write(&batch).await;

        assert!(matches!(result, Err(OutputError::Serialize { .. })));
        // Nothing from the batch went out
        assert_eq!(transport.created_publishers(), 0);
    }

    #[tokio::test]
    async fn test_close_before_init_is_ok() {
        let mut output = MsgbusOutput::new(OutputSettings::new("life-noop"));
        output.close().await.unwrap();
        output.close().await.unwrap();
        assert_eq!(output.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_sample_config_mentions_instance_name() {
        assert!(MsgbusOutput::sample_config().contains("instance_name: publisher1"));
        assert!(!MsgbusOutput::description().is_empty());
    }
}

use std::sync::Arc;

use tracing::info;

use msgbus_metadata::{BusParams, TransportType};

use crate::error::TransportError;
use crate::memory::InMemoryTransport;
use crate::nats::NatsTransport;
use crate::transport::Transport;

/// Opens the shared bus connection described by the plugin config
pub struct BusFactory;

impl BusFactory {
    /// Connect once; every publisher of the process is minted on the result
    pub async fn connect(params: &BusParams) -> Result<Arc<dyn Transport>, TransportError> {
        info!(
            transport = %params.transport,
            endpoint = %params.endpoint,
            "Opening bus connection"
        );
        match params.transport {
            TransportType::Memory => Ok(Arc::new(InMemoryTransport::new())),
            TransportType::Nats => {
                let transport =
                    NatsTransport::connect(&params.endpoint, params.subject_prefix.as_deref())
                        .await?;
                Ok(Arc::new(transport))
            }
        }
    }
}

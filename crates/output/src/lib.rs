//! msgbus-output: Routes measurement records onto message bus topics
//!
//! Owns the topic -> publisher registry, the per-record router and the
//! start/stop lifecycle of every publisher and the shared bus connection.

pub mod error;
pub mod message;
pub mod metrics;
pub mod output;
pub mod profiling;
pub mod registry;
pub mod router;
pub mod serializer;
pub mod server;

pub use error::{OutputError, RegistryError};
pub use message::{Measurement, Record};
pub use metrics::OutputMetrics;
pub use output::{LifecycleState, MsgbusOutput, RecordFailure, WriteReport};
pub use profiling::{ProfilingClock, PROFILING_ENTRY_KEY};
pub use registry::{PublisherEntry, PublisherRegistry, StopSummary};
pub use router::Router;
pub use serializer::{JsonSerializer, SerializeError, Serializer};
pub use server::{create_router, run_server, ServerState};

//! msgbus-middleware: Message bus client abstractions
//!
//! One shared connection per process (`Transport`) minting topic-bound
//! senders (`TopicPublisher`), with NATS and in-memory implementations.

pub mod error;
pub mod factory;
pub mod latency;
pub mod memory;
pub mod nats;
pub mod transport;

pub use error::TransportError;
pub use factory::BusFactory;
pub use latency::{now_tsc, CLOCK};
pub use memory::{InMemorySubscription, InMemoryTransport};
pub use nats::{validate_subject_token, NatsTransport, SubjectBuilder};
pub use transport::{Headers, PublisherParams, TopicPublisher, Transport, TransportMessage};

//! In-memory bus for tests and single-process deployments
pub mod transport;

pub use transport::{InMemorySubscription, InMemoryTransport};

pub mod subjects;
mod transport;

pub use subjects::{validate_subject_token, SubjectBuilder};
pub use transport::NatsTransport;

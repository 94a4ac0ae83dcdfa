pub mod message;
pub mod server;

pub use message::{parse_message, read_message, write_message, EndpointKind, IngestMessage};
pub use server::{serve, Endpoints};

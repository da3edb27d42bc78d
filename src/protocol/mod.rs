pub mod connection;
pub mod messages;

pub use connection::{next_event, Connection, InboundStream, TransportEvent};
pub use messages::{InboundEnvelope, StartMessage};

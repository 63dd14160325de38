pub mod connection;
pub mod message;
pub mod transport;

pub use connection::{ConnectionSnapshot, StreamConnection, DEFAULT_RECONNECT_DELAY};
pub use transport::WsConnector;

//! The connection-and-subscription engine (spec.md §4): transport,
//! registries, the connection state machine, and the endpoint hook
//! surface.

pub mod base;
pub mod broadcast;
pub mod channel;
pub mod connection;
pub mod endpoint;
pub mod heartbeat;
pub mod message;
pub mod rate_limiter;
pub mod registry;
pub mod transport;

pub use base::run_connection;
pub use connection::{AuthPhase, Connection, ConnectionState};
pub use endpoint::{Endpoint, GatewayContext};

//! Event relay integration
//!
//! Connection management, channel/event naming, the publish/subscribe client
//! boundary, and inbound request consumption.

pub mod client;
pub mod connection;
pub mod handlers;
pub mod messages;

pub use client::{AmqpRelayClient, EventStream, InMemoryRelay, RelayClient};
pub use connection::{parse_relay_url, RelayConnection, RelayConnectionConfig};
pub use messages::{race_channel, RaceEvent, RelayEnvelope};

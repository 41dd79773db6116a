//! Real-time event layer for the desktop client.
//!
//! Connects the pure pipeline from `bizdesk-events` to the backend: the SSE
//! stream, the fallback poller, outbound publishing and the stats endpoint,
//! all owned by a [`RealtimeHub`].

pub mod client;
pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod hub;
pub mod poller;
pub mod publisher;
pub mod reconnect;
pub mod sse;

pub use client::{EventApiClient, EventStats, PublishRequest};
pub use config::{ConfigError, Endpoints, MAX_BUFFER_CAPACITY, RealtimeConfig};
pub use connection::{ConnectionState, ConnectionStatus};
pub use connector::TransportConnector;
pub use error::{HubError, PollError, PublishError, TransportError};
pub use hub::RealtimeHub;
pub use poller::{FallbackPoller, MAX_POLL_INTERVAL, MIN_POLL_INTERVAL, PollHandle, PollMode};
pub use publisher::Publisher;
pub use reconnect::ReconnectPolicy;

pub use bizdesk_events::{Event, IngestStats, Subscription};

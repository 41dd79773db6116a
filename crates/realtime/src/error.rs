//! Error kinds of the real-time layer.
//!
//! Only `PublishError` (and `HubError` at construction) ever reaches a
//! caller as a `Result`. `TransportError` is surfaced through the
//! connection status; `PollError` is logged by the poller.

use thiserror::Error;

use crate::config::ConfigError;

/// The live stream failed to open or dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("could not reach event stream: {0}")]
    Connect(String),
    #[error("event stream rejected ({0}): {1}")]
    Status(u16, String),
    #[error("event stream interrupted: {0}")]
    Stream(String),
    #[error("event stream closed by server")]
    Closed,
}

/// One fallback fetch (or stats read) failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// The backend did not accept an outbound event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("invalid publish request: {0}")]
    Invalid(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("publish rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// The hub could not be constructed.
#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("RealtimeHub must be created inside a Tokio runtime")]
    NoRuntime,
}

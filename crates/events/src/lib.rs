//! Client-side event distribution: the event record, topic routing, the
//! bounded recent-events window and the serialized ingestion pipeline.
//!
//! This crate does no IO; transports live in `bizdesk-realtime`.

pub mod buffer;
pub mod bus;
pub mod dispatch;
pub mod event;
pub mod pipeline;
pub mod registry;
pub mod topic;

pub use buffer::{DEFAULT_CAPACITY, EventBuffer};
pub use bus::Subscription;
pub use dispatch::Delivery;
pub use event::{DecodeError, Event};
pub use pipeline::{
    EventOrigin, EventPipeline, IngestOutcome, IngestReceiver, IngestSender, IngestStats,
    Producer, ingest_queue, run_ingestion,
};
pub use registry::{EventCallback, Sink, SubscriptionRegistry};
pub use topic::TopicPattern;

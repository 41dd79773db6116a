//! `bizdesk-core` — shared building blocks for the console client.
//!
//! This crate holds identifiers and the validation error model; it has no
//! IO and no async.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::SubscriptionId;

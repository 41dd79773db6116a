//! Topic patterns used to route events to subscriptions.

use core::fmt;
use core::str::FromStr;

use bizdesk_core::{DomainError, DomainResult};

/// A parsed subscription pattern.
///
/// - `*` matches every topic.
/// - `order.*` matches any topic below the `order` prefix (`order.created`,
///   `order.line.added`), but not `order` itself nor `orderline.created`.
/// - anything else matches only the identical topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    All,
    Prefix(String),
    Exact(String),
}

impl TopicPattern {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(Self::All);
        }

        if let Some(prefix) = raw.strip_suffix(".*") {
            validate_segments(raw, prefix)?;
            return Ok(Self::Prefix(prefix.to_string()));
        }

        validate_segments(raw, raw)?;
        Ok(Self::Exact(raw.to_string()))
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::All => true,
            Self::Exact(exact) => exact == topic,
            Self::Prefix(prefix) => topic
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|rest| !rest.is_empty()),
        }
    }
}

fn validate_segments(pattern: &str, topic: &str) -> DomainResult<()> {
    if topic.is_empty() {
        return Err(DomainError::validation(format!(
            "topic pattern `{pattern}` is empty"
        )));
    }
    for segment in topic.split('.') {
        if segment.is_empty() {
            return Err(DomainError::validation(format!(
                "topic pattern `{pattern}` has an empty segment"
            )));
        }
        if segment.contains('*') {
            return Err(DomainError::validation(format!(
                "topic pattern `{pattern}` may only use `*` as its last segment"
            )));
        }
    }
    Ok(())
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Prefix(prefix) => write!(f, "{prefix}.*"),
            Self::Exact(exact) => f.write_str(exact),
        }
    }
}

impl FromStr for TopicPattern {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

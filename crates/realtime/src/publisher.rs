//! Outbound events.

use serde_json::Value as JsonValue;

use crate::client::{EventApiClient, PublishRequest};
use crate::error::PublishError;

/// Sends locally-originated events to the backend.
///
/// Publishing never touches the local buffer or subscribers: the event shows
/// up locally only once the backend echoes it through the stream or a poll.
#[derive(Debug, Clone)]
pub struct Publisher {
    client: EventApiClient,
}

impl Publisher {
    pub fn new(client: EventApiClient) -> Self {
        Self { client }
    }

    /// `data` must be a JSON object (or `null`, sent as `{}`).
    pub async fn publish(&self, event_type: &str, data: JsonValue) -> Result<(), PublishError> {
        let request = build_request(event_type, data)?;

        match self.client.publish(&request).await {
            Ok(()) => {
                tracing::debug!(event_type = %request.event_type, "event published");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(event_type = %request.event_type, error = %e, "publish failed");
                Err(e)
            }
        }
    }
}

fn build_request(event_type: &str, data: JsonValue) -> Result<PublishRequest, PublishError> {
    let event_type = event_type.trim();
    if event_type.is_empty() {
        return Err(PublishError::Invalid("event type must not be empty".to_string()));
    }

    let data = match data {
        JsonValue::Object(map) => map,
        JsonValue::Null => serde_json::Map::new(),
        other => {
            return Err(PublishError::Invalid(format!(
                "event data must be an object, got {other}"
            )));
        }
    };

    Ok(PublishRequest {
        event_type: event_type.to_string(),
        data,
    })
}

//! HTTP access to the backend event endpoints.

use std::time::Duration;

use bizdesk_events::Event;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::config::{Endpoints, RealtimeConfig};
use crate::error::{HubError, PollError, PublishError, TransportError};

/// Thin wrapper over `reqwest` that knows the event endpoints and attaches
/// the bearer credential to every request.
#[derive(Debug, Clone)]
pub struct EventApiClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
    endpoints: Endpoints,
    request_timeout: Duration,
}

/// Body of `POST /api/events/publish/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Map<String, JsonValue>,
}

/// Aggregate counters from `GET /api/events/stats/` (diagnostics only).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventStats(pub Map<String, JsonValue>);

impl EventStats {
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn count(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(JsonValue::as_u64)
    }
}

impl EventApiClient {
    pub fn new(config: &RealtimeConfig) -> Result<Self, HubError> {
        // No overall client timeout: it would also cut the long-lived stream.
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| HubError::Client(e.to_string()))?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            endpoints: config.endpoints.clone(),
            request_timeout: config.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Open the SSE stream. Success means a 2xx status; the body is still to
    /// be read.
    pub async fn open_stream(&self) -> Result<reqwest::Response, TransportError> {
        let req = self
            .http
            .get(self.url(&self.endpoints.stream))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache");

        // Bound only the wait for response headers; the body may stay open forever.
        let resp = tokio::time::timeout(self.request_timeout, self.authorized(req).send())
            .await
            .map_err(|_| TransportError::Connect("timed out opening event stream".to_string()))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(TransportError::Status(status, resp.text().await.unwrap_or_default()));
        }
        Ok(resp)
    }

    /// Fetch the recent-events snapshot (newest first, as served).
    ///
    /// Items that do not decode are logged and skipped; they never fail the
    /// whole batch.
    pub async fn fetch_recent(&self) -> Result<Vec<Event>, PollError> {
        let body = self.get_json(&self.endpoints.recent).await?;

        let items = match body {
            JsonValue::Array(items) => items,
            JsonValue::Object(mut obj) => match obj.remove("events").or_else(|| obj.remove("results")) {
                Some(JsonValue::Array(items)) => items,
                _ => {
                    return Err(PollError::Parse(
                        "expected an array of events".to_string(),
                    ));
                }
            },
            _ => return Err(PollError::Parse("expected an array of events".to_string())),
        };

        let mut events = Vec::with_capacity(items.len());
        for item in items {
            match Event::from_value(item) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(error = %e, "skipping undecodable event in recent batch"),
            }
        }
        Ok(events)
    }

    pub async fn fetch_stats(&self) -> Result<EventStats, PollError> {
        let body = self.get_json(&self.endpoints.stats).await?;
        serde_json::from_value(body).map_err(|e| PollError::Parse(e.to_string()))
    }

    pub async fn publish(&self, request: &PublishRequest) -> Result<(), PublishError> {
        let req = self
            .http
            .post(self.url(&self.endpoints.publish))
            .timeout(self.request_timeout)
            .json(request);

        let resp = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PublishError::Rejected {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn get_json(&self, path: &str) -> Result<JsonValue, PollError> {
        let req = self.http.get(self.url(path)).timeout(self.request_timeout);

        let resp = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| PollError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PollError::Api(
                resp.status().as_u16(),
                resp.text().await.unwrap_or_default(),
            ));
        }

        resp.json().await.map_err(|e| PollError::Parse(e.to_string()))
    }
}

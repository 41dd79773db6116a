//! The live stream connection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bizdesk_events::{Event, EventOrigin, IngestSender, Producer};
use futures_util::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::EventApiClient;
use crate::connection::{ConnectionState, ConnectionStatus};
use crate::error::TransportError;
use crate::reconnect::ReconnectPolicy;
use crate::sse::{SseDecoder, SseFrame};

/// Owns at most one live SSE connection and feeds it into the ingestion queue.
///
/// Every `connect()` starts a new *session* with its own generation number
/// and cancellation token. A session task may only change the published
/// status while its generation is current, so a task that outlives
/// `disconnect()` cannot flip the state back to `Connected`.
#[derive(Debug)]
pub struct TransportConnector {
    shared: Arc<Shared>,
    runtime: Handle,
}

#[derive(Debug)]
struct Shared {
    client: EventApiClient,
    ingest: IngestSender,
    reconnect: ReconnectPolicy,
    parent: CancellationToken,
    status: watch::Sender<ConnectionStatus>,
    session: Mutex<Session>,
}

#[derive(Debug, Default)]
struct Session {
    generation: u64,
    token: Option<CancellationToken>,
}

fn lock(m: &Mutex<Session>) -> MutexGuard<'_, Session> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TransportConnector {
    /// `parent` cancels every session at once (hub teardown).
    pub fn new(
        client: EventApiClient,
        ingest: IngestSender,
        reconnect: ReconnectPolicy,
        parent: CancellationToken,
        runtime: Handle,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            shared: Arc::new(Shared {
                client,
                ingest,
                reconnect,
                parent,
                status,
                session: Mutex::new(Session::default()),
            }),
            runtime,
        }
    }

    /// Open the stream unless one is already connecting or connected.
    pub fn connect(&self) {
        let mut session = lock(&self.shared.session);

        let current = self.shared.status.borrow().state;
        if current.is_live() {
            tracing::debug!(state = current.as_str(), "connect ignored; stream already active");
            return;
        }

        if let Some(stale) = session.token.take() {
            stale.cancel();
        }
        session.generation += 1;
        let generation = session.generation;
        let token = self.shared.parent.child_token();
        session.token = Some(token.clone());

        self.shared.status.send_modify(|s| s.state = ConnectionState::Connecting);
        drop(session);

        tracing::info!(generation, "opening event stream");
        let shared = self.shared.clone();
        self.runtime
            .spawn(async move { run_session(shared, generation, token).await });
    }

    /// Close the stream (if any). Safe to call repeatedly and from any state.
    pub fn disconnect(&self) {
        let mut session = lock(&self.shared.session);
        let was_open = session.token.take().map(|token| token.cancel()).is_some();
        session.generation += 1;
        self.shared
            .status
            .send_modify(|s| s.state = ConnectionState::Disconnected);
        drop(session);

        if was_open {
            tracing::info!("event stream disconnected");
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status.borrow().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.status.borrow().last_error.clone()
    }

    /// Receiver that observes every status change.
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }
}

impl Shared {
    /// Publish a status change on behalf of session `generation`.
    /// Returns `false` (and changes nothing) if that session is over.
    fn transition(&self, generation: u64, state: ConnectionState, error: Option<String>) -> bool {
        let session = lock(&self.session);
        let current = session.generation == generation
            && session.token.as_ref().is_some_and(|t| !t.is_cancelled());
        if !current {
            return false;
        }
        self.status.send_modify(|s| {
            s.state = state;
            match state {
                ConnectionState::Connected => s.last_error = None,
                _ => {
                    if error.is_some() {
                        s.last_error = error;
                    }
                }
            }
        });
        true
    }
}

async fn run_session(shared: Arc<Shared>, generation: u64, token: CancellationToken) {
    let producer = shared.ingest.producer(EventOrigin::Stream, token.clone());
    let mut failures = 0u32;

    loop {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = stream_once(&shared, generation, &producer, &mut failures) => result,
        };

        let err = match result {
            Ok(()) => return,
            Err(err) => err,
        };
        if token.is_cancelled() {
            return;
        }

        failures += 1;
        match shared.reconnect.delay_for(failures) {
            None => {
                tracing::error!(error = %err, "event stream failed; waiting for manual reconnect");
                shared.transition(generation, ConnectionState::Error, Some(err.to_string()));
                return;
            }
            Some(delay) => {
                tracing::warn!(error = %err, attempt = failures, ?delay, "event stream failed; reconnecting");
                if !shared.transition(generation, ConnectionState::Connecting, Some(err.to_string())) {
                    return;
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Run one connection attempt until it fails. `Ok(())` means the session
/// was cancelled mid-stream.
async fn stream_once(
    shared: &Shared,
    generation: u64,
    producer: &Producer,
    failures: &mut u32,
) -> Result<(), TransportError> {
    let response = shared.client.open_stream().await?;

    if !shared.transition(generation, ConnectionState::Connected, None) {
        return Ok(());
    }
    *failures = 0;
    tracing::info!(generation, "event stream connected");

    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| TransportError::Stream(e.to_string()))?;
        for frame in decoder.feed(&chunk)? {
            if !forward_frame(frame, producer) {
                return Ok(());
            }
        }
    }

    Err(TransportError::Closed)
}

/// Decode one frame and queue it. Returns `false` once the producer is cancelled.
fn forward_frame(frame: SseFrame, producer: &Producer) -> bool {
    if frame.is_keepalive() {
        tracing::trace!("event stream keep-alive");
        return true;
    }

    match Event::from_json(&frame.data) {
        Ok(event) => {
            tracing::debug!(event_id = event.id(), event_type = event.event_type(), "stream event received");
            producer.send(event) || !producer.token().is_cancelled()
        }
        Err(e) => {
            tracing::warn!(error = %e, sse_event = ?frame.event, "dropping undecodable stream message");
            true
        }
    }
}

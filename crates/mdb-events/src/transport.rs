//! Publish/subscribe transports behind the streaming handler.
//!
//! Uses enum dispatch instead of trait objects because async methods are
//! not dyn-compatible. [`JetStreamTransport`] is the production path over
//! NATS `JetStream`; [`MemoryTransport`] records publishes in-process and
//! can be paused or told to fail.
//!
//! # Subject Convention
//!
//! Every event goes to `{subject_prefix}.{type}` where `type` is the
//! lower-cased tag, e.g. `mdb.collection_create`. The stream created at
//! connect time captures `{subject_prefix}.*`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_nats::jetstream;
use tokio::sync::{Notify, RwLock, watch};
use tracing::{debug, info};

use crate::error::{EventsError, PublishError};
use crate::event::Event;

/// Connection parameters for [`JetStreamTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JetStreamOptions {
    /// NATS server URL (e.g. `nats://localhost:4222`).
    pub url: String,
    /// Client connection name reported to the server.
    pub client_name: String,
    /// Name of the stream that captures published events.
    pub stream: String,
    /// Subject prefix; events publish to `{prefix}.{type}`.
    pub subject_prefix: String,
    /// Maximum messages retained by the stream.
    pub stream_max_messages: i64,
    /// Longest wait for a `JetStream` request, including publish acks.
    pub ack_timeout: Duration,
}

impl JetStreamOptions {
    /// Stream configuration applied at connect time.
    pub fn stream_config(&self) -> jetstream::stream::Config {
        jetstream::stream::Config {
            name: self.stream.clone(),
            description: Some(format!("Events stream for {}", self.stream)),
            subjects: vec![format!("{}.*", self.subject_prefix)],
            max_messages: self.stream_max_messages,
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        }
    }
}

/// Build the subject an event is published on.
pub fn subject_for(prefix: &str, event: &Event) -> String {
    format!("{prefix}.{}", event.event_type.as_str().to_lowercase())
}

/// A connected transport.
#[derive(Debug)]
pub enum Transport {
    /// NATS `JetStream`.
    JetStream(JetStreamTransport),
    /// In-process recorder.
    Memory(MemoryTransport),
}

impl Transport {
    /// Publish one event and wait for the transport's acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns a [`PublishError`] if the event could not be delivered.
    pub async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        match self {
            Self::JetStream(transport) => transport.publish(event).await,
            Self::Memory(transport) => transport.publish(event).await,
        }
    }

    /// Release the connection. Closing twice is a no-op.
    pub async fn close(&self) {
        match self {
            Self::JetStream(transport) => transport.close().await,
            Self::Memory(transport) => transport.close(),
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JetStream(_) => "jetstream",
            Self::Memory(_) => "memory",
        }
    }
}

impl From<JetStreamTransport> for Transport {
    fn from(transport: JetStreamTransport) -> Self {
        Self::JetStream(transport)
    }
}

impl From<MemoryTransport> for Transport {
    fn from(transport: MemoryTransport) -> Self {
        Self::Memory(transport)
    }
}

// ---------------------------------------------------------------------------
// JetStream
// ---------------------------------------------------------------------------

struct Connection {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

/// NATS `JetStream` transport.
///
/// Publishes are synchronous from the delivery loop's point of view: each
/// one waits for the stream's acknowledgment before returning.
pub struct JetStreamTransport {
    connection: RwLock<Option<Connection>>,
    subject_prefix: String,
}

impl JetStreamTransport {
    /// Connect to NATS and make sure the event stream exists with the
    /// configured subjects and limits, updating it if it already existed.
    ///
    /// There is no retry here; the caller decides whether to try again.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::Transport`] if the connection or the stream
    /// setup fails.
    pub async fn connect(options: &JetStreamOptions) -> Result<Self, EventsError> {
        info!(
            url = options.url,
            client_name = options.client_name,
            "connecting to NATS server"
        );
        let client = async_nats::ConnectOptions::new()
            .name(&options.client_name)
            .connect(options.url.as_str())
            .await
            .map_err(|e| {
                EventsError::Transport(format!("failed to connect to {}: {e}", options.url))
            })?;

        let mut jetstream = jetstream::new(client.clone());
        jetstream.set_timeout(options.ack_timeout);

        let config = options.stream_config();
        jetstream
            .get_or_create_stream(config.clone())
            .await
            .map_err(|e| {
                EventsError::Transport(format!(
                    "failed to create stream {}: {e}",
                    options.stream
                ))
            })?;
        // An existing stream keeps its old settings until updated.
        jetstream.update_stream(&config).await.map_err(|e| {
            EventsError::Transport(format!(
                "failed to update stream {}: {e}",
                options.stream
            ))
        })?;
        info!(
            stream = options.stream,
            subjects = ?config.subjects,
            max_messages = config.max_messages,
            "NATS connection established"
        );

        Ok(Self {
            connection: RwLock::new(Some(Connection { client, jetstream })),
            subject_prefix: options.subject_prefix.clone(),
        })
    }

    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        let subject = subject_for(&self.subject_prefix, event);

        let guard = self.connection.read().await;
        let connection = guard.as_ref().ok_or(PublishError::Closed)?;

        debug!(subject = subject, id = %event.id, "publishing event");
        let ack = connection
            .jetstream
            .publish(subject, payload.into())
            .await
            .map_err(|e| PublishError::Rejected(e.to_string()))?;
        ack.await
            .map_err(|e| PublishError::Rejected(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) {
        let Some(connection) = self.connection.write().await.take() else {
            return;
        };
        if let Err(e) = connection.client.flush().await {
            tracing::warn!(error = %e, "NATS flush on close failed");
        }
        info!("NATS connection closed");
    }
}

impl std::fmt::Debug for JetStreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetStreamTransport")
            .field("subject_prefix", &self.subject_prefix)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct MemoryState {
    published: std::sync::Mutex<Vec<Event>>,
    attempts: AtomicUsize,
    attempted: Notify,
    failing: AtomicBool,
    open: watch::Sender<bool>,
    closes: AtomicUsize,
}

/// In-process transport that records every successful publish.
///
/// Clones share state, so a caller can keep one clone for inspection while
/// the handler owns another.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    state: Arc<MemoryState>,
}

impl MemoryTransport {
    /// A transport that accepts every publish immediately.
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self {
            state: Arc::new(MemoryState {
                published: std::sync::Mutex::new(Vec::new()),
                attempts: AtomicUsize::new(0),
                attempted: Notify::new(),
                failing: AtomicBool::new(false),
                open,
                closes: AtomicUsize::new(0),
            }),
        }
    }

    /// Make every subsequent publish fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold publishes until [`resume`](Self::resume) is called.
    pub fn pause(&self) {
        self.state.open.send_replace(false);
    }

    /// Release held publishes.
    pub fn resume(&self) {
        self.state.open.send_replace(true);
    }

    /// Events accepted so far, in publish order.
    pub fn published(&self) -> Vec<Event> {
        self.state
            .published
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Publish attempts so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// How many times the underlying connection was actually released.
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` publishes have been attempted.
    pub async fn wait_for_attempts(&self, count: usize) {
        loop {
            let attempted = self.state.attempted.notified();
            if self.attempts() >= count {
                return;
            }
            attempted.await;
        }
    }

    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        self.state.attempted.notify_waiters();

        let mut open = self.state.open.subscribe();
        open.wait_for(|open| *open)
            .await
            .map_err(|_| PublishError::Closed)?;

        if self.state.closes.load(Ordering::SeqCst) > 0 {
            return Err(PublishError::Closed);
        }
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Rejected(format!(
                "memory transport refused {}",
                event.id
            )));
        }
        if let Ok(mut published) = self.state.published.lock() {
            published.push(event.clone());
        }
        Ok(())
    }

    fn close(&self) {
        // Only the first close counts; later ones are no-ops.
        let _ = self
            .state
            .closes
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst);
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

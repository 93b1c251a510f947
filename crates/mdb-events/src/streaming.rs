//! Durable streaming handler.
//!
//! [`StreamingHandler`] decouples accepting an event from delivering it.
//! [`handle`](StreamingHandler::handle) only ever does a non-blocking push
//! into a bounded intake queue; a dedicated delivery loop drains that queue
//! into the [`Transport`] one event at a time.
//!
//! # Lifecycle
//!
//! ```text
//! start:  load spool --> spawn delivery loop --> re-enqueue backlog --> remove spool
//! run:    intake --> delivery loop --> transport (wait for ack, bounded)
//! close:  stop accepting --> optional drain wait --> stop loop --> spool leftovers
//!         --> release transport
//! ```
//!
//! A failed publish is logged and the event is discarded; it is not retried
//! in place. Events still sitting in the intake queue at close are written
//! to the spool and re-enqueued by the next instance pointed at the same
//! path, with their original identifiers.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{EventsError, PublishError};
use crate::event::Event;
use crate::spool::{DEFAULT_SPOOL_PATH, Spool};
use crate::transport::{JetStreamOptions, JetStreamTransport, Transport};

/// Default intake queue capacity.
pub const DEFAULT_QUEUE_SIZE: usize = 4096;

/// Largest intake queue capacity accepted.
pub const MAX_QUEUE_SIZE: usize = 1 << 20;

/// How often [`StreamingHandler::close`] checks whether the queue drained.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Tuning for one streaming handler instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingSettings {
    /// Intake queue capacity. Fixed for the handler's lifetime.
    pub queue_size: usize,
    /// Longest wait for a transport acknowledgment per event.
    pub ack_timeout: Duration,
    /// Where undelivered events are spooled at close.
    pub spool_path: PathBuf,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            ack_timeout: Duration::from_secs(5),
            spool_path: PathBuf::from(DEFAULT_SPOOL_PATH),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug)]
struct Worker {
    stop: oneshot::Sender<()>,
    task: JoinHandle<mpsc::Receiver<Event>>,
}

/// Handler that forwards events to a publish/subscribe transport and
/// survives restarts through a local spool file.
#[derive(Debug)]
pub struct StreamingHandler {
    intake: mpsc::Sender<Event>,
    accepting: AtomicBool,
    counters: Arc<Counters>,
    transport: Arc<Transport>,
    spool: Spool,
    worker: Mutex<Option<Worker>>,
}

impl StreamingHandler {
    /// Connect to NATS `JetStream` and start the handler.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::Transport`] if the connection fails, or any
    /// error from [`start`](Self::start).
    pub async fn connect(
        options: &JetStreamOptions,
        settings: StreamingSettings,
    ) -> Result<Self, EventsError> {
        let transport = JetStreamTransport::connect(options).await?;
        Self::start(transport, settings).await
    }

    /// Start the handler on an already connected transport.
    ///
    /// Any spool left by a previous run is loaded first; its events are the
    /// first ones delivered, in file order, and the file is removed once they
    /// are queued.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::Config`] for a queue size of zero or above
    /// [`MAX_QUEUE_SIZE`], and
    /// [`EventsError::Spool`] if an existing spool cannot be read, decoded,
    /// or removed. The transport is released on error.
    pub async fn start(
        transport: impl Into<Transport>,
        settings: StreamingSettings,
    ) -> Result<Self, EventsError> {
        let transport = Arc::new(transport.into());
        if settings.queue_size == 0 || settings.queue_size > MAX_QUEUE_SIZE {
            transport.close().await;
            return Err(EventsError::Config(format!(
                "streaming queue size must be between 1 and {MAX_QUEUE_SIZE}, got {}",
                settings.queue_size
            )));
        }

        let spool = Spool::new(settings.spool_path);
        let backlog = match spool.load().await {
            Ok(backlog) => backlog,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };

        let (intake, receiver) = mpsc::channel(settings.queue_size);
        let (stop, stop_rx) = oneshot::channel();
        let counters = Arc::new(Counters::default());
        let task = tokio::spawn(deliver(
            receiver,
            stop_rx,
            Arc::clone(&transport),
            Arc::clone(&counters),
            settings.ack_timeout,
        ));

        let handler = Self {
            intake,
            accepting: AtomicBool::new(true),
            counters,
            transport,
            spool,
            worker: Mutex::new(Some(Worker { stop, task })),
        };

        if !backlog.is_empty() {
            warn!(
                count = backlog.len(),
                path = %handler.spool.path().display(),
                "spool has undelivered events, queuing"
            );
            for event in backlog {
                // Awaiting here is safe: the loop is already draining.
                if handler.intake.send(event).await.is_err() {
                    let _ = handler.close(None).await;
                    return Err(EventsError::Worker(
                        "delivery loop exited while reloading spool".to_owned(),
                    ));
                }
            }
        }
        if let Err(e) = handler.spool.remove().await {
            let _ = handler.close(None).await;
            return Err(e);
        }

        info!(
            transport = handler.transport.name(),
            queue_size = handler.intake.max_capacity(),
            "streaming handler started"
        );
        Ok(handler)
    }

    /// Queue an event for delivery without blocking.
    ///
    /// If the intake queue is full, or the handler is closing, the event is
    /// dropped and a warning with its identifier is logged.
    pub fn handle(&self, event: Event) {
        if !self.accepting.load(Ordering::SeqCst) {
            self.record_drop(&event, "handler closed");
            return;
        }
        match self.intake.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => self.record_drop(&event, "buffer limit reached"),
            Err(TrySendError::Closed(event)) => self.record_drop(&event, "delivery loop stopped"),
        }
    }

    /// Stop the handler.
    ///
    /// New events are refused immediately. With a `deadline`, the delivery
    /// loop gets until then to empty the queue; whatever is still queued
    /// afterwards is spooled, never discarded. An in-flight publish is not
    /// aborted, only bounded by the acknowledgment timeout. The transport is
    /// released whatever happens.
    ///
    /// Calling `close` again is a no-op. A close that races another one
    /// returns only after the first has spooled and released the transport.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::Spool`] if leftovers cannot be written, or
    /// [`EventsError::Worker`] if the delivery loop panicked.
    pub async fn close(&self, deadline: Option<Duration>) -> Result<(), EventsError> {
        // Held until the transport is released so a concurrent close waits.
        let mut slot = self.worker.lock().await;
        let Some(worker) = slot.take() else {
            self.transport.close().await;
            return Ok(());
        };
        self.accepting.store(false, Ordering::SeqCst);

        if let Some(deadline) = deadline {
            self.wait_for_drain(deadline).await;
        }

        debug!("stopping delivery loop");
        let _ = worker.stop.send(());
        let result = match worker.task.await {
            Ok(mut receiver) => {
                receiver.close();
                let mut leftovers = Vec::new();
                while let Ok(event) = receiver.try_recv() {
                    leftovers.push(event);
                }
                if !leftovers.is_empty() {
                    info!(
                        count = leftovers.len(),
                        path = %self.spool.path().display(),
                        "spooling undelivered events"
                    );
                }
                self.spool.store(&leftovers).await
            }
            Err(e) => Err(EventsError::Worker(format!("delivery loop failed: {e}"))),
        };

        self.transport.close().await;
        drop(slot);
        info!(
            delivered = self.delivered(),
            failed = self.failed(),
            dropped = self.dropped(),
            "streaming handler closed"
        );
        result
    }

    /// Events currently waiting in the intake queue.
    pub fn queued(&self) -> usize {
        self.intake
            .max_capacity()
            .saturating_sub(self.intake.capacity())
    }

    /// Events acknowledged by the transport.
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    /// Events the transport failed to take; these are not retried.
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Events refused at intake.
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Location of the spool file.
    pub fn spool_path(&self) -> &std::path::Path {
        self.spool.path()
    }

    fn record_drop(&self, event: &Event, reason: &str) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(id = %event.id, reason, "dropping event");
    }

    async fn wait_for_drain(&self, deadline: Duration) {
        let until = tokio::time::Instant::now()
            .checked_add(deadline)
            .unwrap_or_else(tokio::time::Instant::now);
        while self.queued() > 0 && tokio::time::Instant::now() < until {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        if self.queued() > 0 {
            warn!(
                remaining = self.queued(),
                "close deadline reached before queue drained"
            );
        }
    }
}

/// The delivery loop. Hands the receiver back when stopped so the caller
/// can spool whatever is left.
async fn deliver(
    mut intake: mpsc::Receiver<Event>,
    mut stop: oneshot::Receiver<()>,
    transport: Arc<Transport>,
    counters: Arc<Counters>,
    ack_timeout: Duration,
) -> mpsc::Receiver<Event> {
    loop {
        let event = tokio::select! {
            biased;
            _ = &mut stop => break,
            next = intake.recv() => match next {
                Some(event) => event,
                None => break,
            },
        };
        publish(&transport, &counters, &event, ack_timeout).await;
    }
    intake
}

async fn publish(
    transport: &Transport,
    counters: &Counters,
    event: &Event,
    ack_timeout: Duration,
) {
    debug!(id = %event.id, "publish event");
    let result = tokio::time::timeout(ack_timeout, transport.publish(event))
        .await
        .unwrap_or_else(|_| {
            Err(PublishError::Timeout {
                timeout_ms: ack_timeout.as_millis(),
            })
        });
    match result {
        Ok(()) => {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(id = %event.id, error = %e, "failed to publish event");
        }
    }
}

//! The single ingestion point for domain events.
//!
//! [`Emitter::emit`] pushes events into a bounded intake queue and returns.
//! A background worker pulls them off, assigns each a fresh time-ordered
//! identifier, and hands a copy to every handler in registration order.
//! Handlers never block the worker: the logger writes inline and the
//! streaming handler only does a non-blocking enqueue.
//!
//! # Back-pressure
//!
//! If the intake queue is full, `emit` waits for space. That is the only
//! place a producer can be slowed down by the pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::error::EventsError;
use crate::event::Event;
use crate::handler::EventHandler;
use crate::id::IdGenerator;

/// Default capacity of the emitter's intake queue.
pub const DEFAULT_EMITTER_SIZE: usize = 1024;

/// Largest intake queue capacity accepted.
pub const MAX_EMITTER_SIZE: usize = 1 << 20;

/// Buffered fan-out emitter that owns its handlers.
///
/// The handlers are shared with the worker rather than moved into it, so
/// shutdown can still close them if the worker dies.
#[derive(Debug)]
pub struct Emitter {
    intake: RwLock<Option<mpsc::Sender<Event>>>,
    running: AtomicBool,
    handlers: Arc<[EventHandler]>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Emitter {
    /// Build an emitter with an intake queue of `size` and start its worker.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::Config`] if `handlers` is empty, `size` is zero
    /// or above [`MAX_EMITTER_SIZE`], or no tokio runtime is available.
    pub fn new(size: usize, handlers: Vec<EventHandler>) -> Result<Self, EventsError> {
        Self::with_ids(size, handlers, IdGenerator::new())
    }

    /// Like [`new`](Self::new) with a caller-supplied identifier source.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_ids(
        size: usize,
        handlers: Vec<EventHandler>,
        ids: IdGenerator,
    ) -> Result<Self, EventsError> {
        if handlers.is_empty() {
            return Err(EventsError::Config(
                "at least one event handler is required".to_owned(),
            ));
        }
        if size == 0 || size > MAX_EMITTER_SIZE {
            return Err(EventsError::Config(format!(
                "emitter size must be between 1 and {MAX_EMITTER_SIZE}, got {size}"
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EventsError::Config(format!("emitter needs a tokio runtime: {e}")))?;

        let names: Vec<&str> = handlers.iter().map(EventHandler::name).collect();
        info!(size, handlers = ?names, "starting event emitter");

        let handlers: Arc<[EventHandler]> = handlers.into();
        let (intake, receiver) = mpsc::channel(size);
        let worker = runtime.spawn(run(receiver, Arc::clone(&handlers), ids));

        Ok(Self {
            intake: RwLock::new(Some(intake)),
            running: AtomicBool::new(true),
            handlers,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Submit events for fan-out, in order.
    ///
    /// Waits only while the intake queue is full. After shutdown has begun
    /// this is a no-op and the events are dropped.
    pub async fn emit(&self, events: impl IntoIterator<Item = Event>) {
        let Some(intake) = self.intake.read().await.clone() else {
            debug!("emitter not running, dropping events");
            return;
        };
        for event in events {
            if intake.send(event).await.is_err() {
                debug!("emitter worker gone, dropping events");
                return;
            }
        }
    }

    /// Blocking variant of [`emit`](Self::emit) for synchronous callers.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async execution context.
    pub fn emit_blocking(&self, events: impl IntoIterator<Item = Event>) {
        let Some(intake) = self.intake.blocking_read().clone() else {
            debug!("emitter not running, dropping events");
            return;
        };
        for event in events {
            if intake.blocking_send(event).is_err() {
                debug!("emitter worker gone, dropping events");
                return;
            }
        }
    }

    /// Whether the emitter still accepts events.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting events, drain the intake queue through the handlers,
    /// then close every handler.
    ///
    /// `deadline` bounds the whole handler-close phase; it is shared across
    /// handlers in registration order. All handlers are closed even if one
    /// fails. Calling `shutdown` again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::Worker`] if the fan-out worker panicked or was
    /// cancelled, otherwise the first handler close error. Handlers are
    /// closed in both cases.
    pub async fn shutdown(&self, deadline: Option<Duration>) -> Result<(), EventsError> {
        self.running.store(false, Ordering::SeqCst);
        drop(self.intake.write().await.take());

        let Some(worker) = self.worker.lock().await.take() else {
            return Ok(());
        };
        let mut first_error = None;
        if let Err(e) = worker.await {
            error!(error = %e, "emitter worker failed, closing handlers anyway");
            first_error = Some(EventsError::Worker(format!("emitter worker failed: {e}")));
        }

        info!(count = self.handlers.len(), "closing event handlers");
        let until = deadline.and_then(|d| Instant::now().checked_add(d));
        for handler in &*self.handlers {
            let remaining = until.map(|u| u.saturating_duration_since(Instant::now()));
            if let Err(e) = handler.close(remaining).await {
                error!(handler = handler.name(), error = %e, "close event handler");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// The fan-out worker. Returns once the intake is closed and drained.
async fn run(
    mut intake: mpsc::Receiver<Event>,
    handlers: Arc<[EventHandler]>,
    mut ids: IdGenerator,
) {
    while let Some(mut event) = intake.recv().await {
        event.id = ids.next_id();
        fan_out(&handlers, event);
    }
    debug!("emitter intake drained");
}

/// Give every handler its own copy; the last one takes the original.
fn fan_out(handlers: &[EventHandler], event: Event) {
    if let Some((last, rest)) = handlers.split_last() {
        for handler in rest {
            handler.handle(event.clone());
        }
        last.handle(event);
    }
}

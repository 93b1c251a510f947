//! Event sinks.
//!
//! [`EventHandler`] is a closed set of handler variants behind one
//! capability: [`handle`](EventHandler::handle) an event without blocking,
//! and [`close`](EventHandler::close) at shutdown. Enum dispatch keeps
//! `close` async without boxing.

use std::time::Duration;

use tracing::info;

use crate::error::EventsError;
use crate::event::Event;
use crate::streaming::StreamingHandler;

/// Handler that writes each event to the operator log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggerHandler;

impl LoggerHandler {
    /// Create a logging handler.
    pub const fn new() -> Self {
        Self
    }

    /// Log one structured record with the event's id, type, and payload.
    pub fn handle(self, event: &Event) {
        info!(
            id = %event.id,
            "type" = event.event_type.as_str(),
            payload = %serde_json::Value::Object(event.payload.clone()),
            "event"
        );
    }
}

/// A configured event sink.
#[derive(Debug)]
pub enum EventHandler {
    /// Synchronous structured-log sink.
    Logger(LoggerHandler),
    /// Asynchronous, spooled delivery to a streaming transport.
    Streaming(StreamingHandler),
}

impl EventHandler {
    /// Hand an event to the sink. Never blocks and never fails.
    pub fn handle(&self, event: Event) {
        match self {
            Self::Logger(handler) => handler.handle(&event),
            Self::Streaming(handler) => handler.handle(event),
        }
    }

    /// Release the sink's resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink could not preserve its undelivered
    /// events (see [`StreamingHandler::close`]).
    pub async fn close(&self, deadline: Option<Duration>) -> Result<(), EventsError> {
        match self {
            Self::Logger(_) => Ok(()),
            Self::Streaming(handler) => handler.close(deadline).await,
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Logger(_) => "logger",
            Self::Streaming(_) => "streaming",
        }
    }
}

impl From<LoggerHandler> for EventHandler {
    fn from(handler: LoggerHandler) -> Self {
        Self::Logger(handler)
    }
}

impl From<StreamingHandler> for EventHandler {
    fn from(handler: StreamingHandler) -> Self {
        Self::Streaming(handler)
    }
}

//! Event emission and durable delivery for the MDB metadata catalog.
//!
//! Catalog mutations (entity created, updated, deleted, published,
//! relationship changed) become discrete [`Event`] values that are given a
//! unique, time-ordered identifier and forwarded to every configured sink
//! without blocking the mutation path.
//!
//! # Architecture
//!
//! ```text
//! data layer --> catalog::* constructor --> Emitter::emit
//!                                             |
//!                                   (bounded intake, worker assigns id)
//!                                             |
//!                        +--------------------+--------------------+
//!                        |                                         |
//!                 LoggerHandler                            StreamingHandler
//!                 (tracing record)                 (bounded intake, delivery loop)
//!                                                                  |
//!                                                   Transport (JetStream / memory)
//!                                                                  |
//!                                                 spool file at close, reload at start
//! ```
//!
//! # Modules
//!
//! - [`event`] -- the [`Event`] value and [`EventType`] taxonomy
//! - [`catalog`] -- constructors that build events from mutated entities
//! - [`id`] -- monotonic UUID v7 identifiers
//! - [`emitter`] -- bounded fan-out emitter
//! - [`handler`] -- handler variants behind one capability
//! - [`streaming`] -- durable streaming handler
//! - [`transport`] -- `JetStream` and in-memory transports
//! - [`spool`] -- on-disk backlog between restarts
//! - [`config`] -- typed settings loaded from file and environment
//! - [`setup`] -- wiring from settings to a running emitter
//! - [`error`] -- shared error types

pub mod catalog;
pub mod config;
pub mod emitter;
pub mod error;
pub mod event;
pub mod handler;
pub mod id;
pub mod setup;
pub mod spool;
pub mod streaming;
pub mod transport;

// Re-export primary types for convenience.
pub use catalog::EntityRef;
pub use config::{EventsSettings, HandlerKind};
pub use emitter::Emitter;
pub use error::{EventsError, PublishError};
pub use event::{Event, EventType, Payload};
pub use handler::{EventHandler, LoggerHandler};
pub use id::IdGenerator;
pub use setup::{close_emitter, init_emitter};
pub use spool::Spool;
pub use streaming::{StreamingHandler, StreamingSettings};
pub use transport::{JetStreamOptions, JetStreamTransport, MemoryTransport, Transport};

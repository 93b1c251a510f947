//! Typed settings for the event pipeline.
//!
//! Settings come from a TOML file (optional) layered under environment
//! variables prefixed with `MDB`, using `__` as the section separator:
//!
//! ```text
//! MDB__EVENTS__HANDLERS=logger,nats
//! MDB__EVENTS__EMITTER_SIZE=2048
//! MDB__NATS__URL=nats://nats:4222
//! ```
//!
//! Every field has a default, so an empty file yields a logger-only
//! pipeline.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::emitter::{DEFAULT_EMITTER_SIZE, MAX_EMITTER_SIZE};
use crate::error::EventsError;
use crate::spool::DEFAULT_SPOOL_PATH;
use crate::streaming::{DEFAULT_QUEUE_SIZE, MAX_QUEUE_SIZE, StreamingSettings};
use crate::transport::JetStreamOptions;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MDB";

/// Top-level pipeline settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EventsSettings {
    /// Emitter and handler selection.
    #[serde(default)]
    pub events: EmitterSettings,

    /// Streaming handler connection and tuning.
    #[serde(default)]
    pub nats: NatsSettings,

    /// Log output format.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Which handlers to run and how big the emitter queue is.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EmitterSettings {
    /// Handler variant names, in registration order.
    pub handlers: Vec<String>,
    /// Emitter intake queue capacity.
    pub emitter_size: usize,
}

impl Default for EmitterSettings {
    fn default() -> Self {
        Self {
            handlers: vec![HandlerKind::Logger.to_string()],
            emitter_size: DEFAULT_EMITTER_SIZE,
        }
    }
}

/// NATS `JetStream` handler settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NatsSettings {
    /// Server URL.
    pub url: String,
    /// Connection name reported to the server.
    pub client_name: String,
    /// Stream that captures published events.
    pub stream: String,
    /// Subject prefix; events publish to `{prefix}.{type}`.
    pub subject_prefix: String,
    /// Maximum messages retained by the stream.
    pub stream_max_messages: i64,
    /// Acknowledgment wait per publish, in milliseconds.
    pub ack_timeout_ms: u64,
    /// Intake queue capacity.
    pub queue_size: usize,
    /// Spool file location.
    pub spool_path: PathBuf,
    /// How long shutdown waits for queues to drain, in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_owned(),
            client_name: "mdb".to_owned(),
            stream: "MDB".to_owned(),
            subject_prefix: "mdb".to_owned(),
            stream_max_messages: 4096,
            ack_timeout_ms: 5_000,
            queue_size: DEFAULT_QUEUE_SIZE,
            spool_path: PathBuf::from(DEFAULT_SPOOL_PATH),
            close_timeout_ms: 10_000,
        }
    }
}

impl NatsSettings {
    /// Connection parameters for the transport.
    pub fn jetstream_options(&self) -> JetStreamOptions {
        JetStreamOptions {
            url: self.url.clone(),
            client_name: self.client_name.clone(),
            stream: self.stream.clone(),
            subject_prefix: self.subject_prefix.clone(),
            stream_max_messages: self.stream_max_messages,
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
        }
    }

    /// Tuning for the handler.
    pub fn streaming_settings(&self) -> StreamingSettings {
        StreamingSettings {
            queue_size: self.queue_size,
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            spool_path: self.spool_path.clone(),
        }
    }

    /// Shutdown drain deadline.
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Log output settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

/// A handler variant selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// `logger`: structured log sink.
    Logger,
    /// `nats`: durable `JetStream` sink.
    Nats,
}

impl FromStr for HandlerKind {
    type Err = EventsError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_lowercase().as_str() {
            "logger" => Ok(Self::Logger),
            "nats" => Ok(Self::Nats),
            other => Err(EventsError::Config(format!(
                "unknown event handler: {other}"
            ))),
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Logger => "logger",
            Self::Nats => "nats",
        })
    }
}

impl EventsSettings {
    /// Load settings from `path` (if it exists) plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::Config`] if the sources cannot be read or
    /// deserialized, or the result fails [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self, EventsError> {
        let settings: Self = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::Config`] if the string is not valid TOML for
    /// these settings, or the result fails [`validate`](Self::validate).
    pub fn parse(toml: &str) -> Result<Self, EventsError> {
        let settings: Self = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The configured handler variants, in order.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::Config`] on an unknown name.
    pub fn handler_kinds(&self) -> Result<Vec<HandlerKind>, EventsError> {
        self.events.handlers.iter().map(|n| n.parse()).collect()
    }

    /// Check settings that would otherwise fail later, at construction.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), EventsError> {
        let kinds = self.handler_kinds()?;
        if kinds.is_empty() {
            return Err(EventsError::Config(
                "events.handlers must name at least one handler".to_owned(),
            ));
        }
        if let Some(repeated) = first_duplicate(&kinds) {
            return Err(EventsError::Config(format!(
                "events.handlers lists {repeated} more than once"
            )));
        }
        if !(1..=MAX_EMITTER_SIZE).contains(&self.events.emitter_size) {
            return Err(invalid(
                "events.emitter_size",
                &format!("must be between 1 and {MAX_EMITTER_SIZE}"),
            ));
        }
        if !kinds.contains(&HandlerKind::Nats) {
            return Ok(());
        }

        let nats = &self.nats;
        if nats.url.trim().is_empty() {
            return Err(invalid("nats.url", "must not be empty"));
        }
        if nats.stream.trim().is_empty() {
            return Err(invalid("nats.stream", "must not be empty"));
        }
        if nats.subject_prefix.is_empty()
            || nats
                .subject_prefix
                .contains(|c: char| c == '*' || c == '>' || c.is_whitespace())
        {
            return Err(invalid(
                "nats.subject_prefix",
                "must be a non-empty literal subject",
            ));
        }
        if !(1..=MAX_QUEUE_SIZE).contains(&nats.queue_size) {
            return Err(invalid(
                "nats.queue_size",
                &format!("must be between 1 and {MAX_QUEUE_SIZE}"),
            ));
        }
        if nats.ack_timeout_ms == 0 {
            return Err(invalid("nats.ack_timeout_ms", "must be at least 1"));
        }
        if nats.stream_max_messages < 1 {
            return Err(invalid("nats.stream_max_messages", "must be at least 1"));
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("events.handlers")
        .try_parsing(true)
}

/// Each handler kind may appear once; two streaming handlers would share
/// one spool file.
fn first_duplicate(kinds: &[HandlerKind]) -> Option<HandlerKind> {
    kinds
        .iter()
        .enumerate()
        .find(|&(i, kind)| kinds.get(..i).is_some_and(|before| before.contains(kind)))
        .map(|(_, kind)| *kind)
}

fn invalid(key: &str, problem: &str) -> EventsError {
    EventsError::Config(format!("{key} {problem}"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let settings = EventsSettings::parse("").unwrap();
        assert_eq!(settings, EventsSettings::default());
        assert_eq!(
            settings.handler_kinds().unwrap(),
            vec![HandlerKind::Logger]
        );
    }

    #[test]
    fn parses_full_document() {
        let settings = EventsSettings::parse(
            r#"
            [events]
            handlers = ["nats", "logger"]
            emitter_size = 32

            [nats]
            url = "nats://events:4222"
            client_name = "mdb-api"
            stream = "CATALOG"
            subject_prefix = "catalog"
            ack_timeout_ms = 750
            queue_size = 16
            spool_path = "/var/lib/mdb/spool.json"

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(
            settings.handler_kinds().unwrap(),
            vec![HandlerKind::Nats, HandlerKind::Logger]
        );
        assert_eq!(settings.events.emitter_size, 32);
        assert!(settings.logging.json);

        let options = settings.nats.jetstream_options();
        assert_eq!(options.url, "nats://events:4222");
        assert_eq!(options.stream, "CATALOG");
        assert_eq!(options.stream_max_messages, 4096);
        assert_eq!(options.ack_timeout, Duration::from_millis(750));

        let streaming = settings.nats.streaming_settings();
        assert_eq!(streaming.queue_size, 16);
        assert_eq!(streaming.ack_timeout, Duration::from_millis(750));
        assert_eq!(streaming.spool_path, PathBuf::from("/var/lib/mdb/spool.json"));
    }

    #[test]
    fn unknown_handler_is_a_config_error() {
        let result = EventsSettings::parse("[events]\nhandlers = [\"logger\", \"kafka\"]");
        assert!(matches!(result, Err(EventsError::Config(m)) if m.contains("kafka")));
    }

    #[test]
    fn empty_handler_list_is_a_config_error() {
        let result = EventsSettings::parse("[events]\nhandlers = []");
        assert!(matches!(result, Err(EventsError::Config(_))));
    }

    #[test]
    fn wildcard_prefix_is_rejected_only_when_nats_is_active() {
        let with_nats = "[events]\nhandlers = [\"nats\"]\n[nats]\nsubject_prefix = \"mdb.*\"";
        assert!(EventsSettings::parse(with_nats).is_err());

        let logger_only = "[events]\nhandlers = [\"logger\"]\n[nats]\nsubject_prefix = \"mdb.*\"";
        assert!(EventsSettings::parse(logger_only).is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(EventsSettings::parse("[events]\nemitter_size = 0").is_err());
        let zero_queue = "[events]\nhandlers = [\"nats\"]\n[nats]\nqueue_size = 0";
        assert!(EventsSettings::parse(zero_queue).is_err());
    }

    #[test]
    fn oversized_queues_are_rejected() {
        let huge_emitter = "[events]\nemitter_size = 4611686018427387904";
        assert!(matches!(
            EventsSettings::parse(huge_emitter),
            Err(EventsError::Config(m)) if m.contains("events.emitter_size")
        ));

        let huge_queue = "[events]\nhandlers = [\"nats\"]\n[nats]\nqueue_size = 4611686018427387904";
        assert!(matches!(
            EventsSettings::parse(huge_queue),
            Err(EventsError::Config(m)) if m.contains("nats.queue_size")
        ));

        let at_limit = format!("[events]\nemitter_size = {MAX_EMITTER_SIZE}");
        assert!(EventsSettings::parse(&at_limit).is_ok());
    }

    #[test]
    fn repeated_handler_is_rejected() {
        let twice = "[events]\nhandlers = [\"nats\", \"logger\", \"NATS\"]";
        assert!(matches!(
            EventsSettings::parse(twice),
            Err(EventsError::Config(m)) if m.contains("nats more than once")
        ));
        let logger_twice = "[events]\nhandlers = [\"logger\", \"logger\"]";
        assert!(EventsSettings::parse(logger_twice).is_err());
    }

    #[test]
    fn handler_names_are_case_insensitive() {
        assert_eq!("Logger".parse::<HandlerKind>().unwrap(), HandlerKind::Logger);
        assert_eq!(" NATS ".parse::<HandlerKind>().unwrap(), HandlerKind::Nats);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EventsSettings::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.events.emitter_size, DEFAULT_EMITTER_SIZE);
    }
}

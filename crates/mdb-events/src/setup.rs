//! Wiring from settings to a running emitter.
//!
//! [`init_emitter`] is what a host process calls once at startup;
//! [`close_emitter`] is what it calls once at shutdown. Handlers are built
//! in the configured order by a factory keyed on [`HandlerKind`] and are
//! owned by the returned [`Emitter`].

use tracing::{info, warn};

use crate::config::{EventsSettings, HandlerKind};
use crate::emitter::Emitter;
use crate::error::EventsError;
use crate::handler::{EventHandler, LoggerHandler};
use crate::streaming::StreamingHandler;

/// Build one handler variant.
///
/// # Errors
///
/// Returns [`EventsError::Transport`] if the streaming handler cannot
/// connect, or [`EventsError::Spool`] if its spool cannot be reloaded.
pub async fn build_handler(
    kind: HandlerKind,
    settings: &EventsSettings,
) -> Result<EventHandler, EventsError> {
    match kind {
        HandlerKind::Logger => Ok(LoggerHandler::new().into()),
        HandlerKind::Nats => {
            info!(url = settings.nats.url, "initializing NATS JetStream event handler");
            let handler = StreamingHandler::connect(
                &settings.nats.jetstream_options(),
                settings.nats.streaming_settings(),
            )
            .await?;
            Ok(handler.into())
        }
    }
}

/// Validate settings, build every configured handler, and start the emitter.
///
/// If a later handler fails to build, the ones already built are closed
/// before the error is returned.
///
/// # Errors
///
/// Returns [`EventsError::Config`] for invalid settings, or whatever
/// [`build_handler`] returns.
pub async fn init_emitter(settings: &EventsSettings) -> Result<Emitter, EventsError> {
    settings.validate()?;

    let mut handlers = Vec::new();
    for kind in settings.handler_kinds()? {
        match build_handler(kind, settings).await {
            Ok(handler) => handlers.push(handler),
            Err(e) => {
                close_all(&handlers, settings).await;
                return Err(e);
            }
        }
    }

    Emitter::new(settings.events.emitter_size, handlers)
}

/// Shut the emitter down using the configured close deadline.
///
/// # Errors
///
/// Returns the first error from [`Emitter::shutdown`].
pub async fn close_emitter(emitter: &Emitter, settings: &EventsSettings) -> Result<(), EventsError> {
    info!("closing events emitter");
    emitter.shutdown(Some(settings.nats.close_timeout())).await
}

async fn close_all(handlers: &[EventHandler], settings: &EventsSettings) {
    for handler in handlers {
        if let Err(e) = handler.close(Some(settings.nats.close_timeout())).await {
            warn!(handler = handler.name(), error = %e, "close event handler");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::catalog::{EntityRef, source_create};

    #[tokio::test]
    async fn logger_only_pipeline_starts_and_stops() {
        let settings = EventsSettings::default();
        let emitter = init_emitter(&settings).await.unwrap();
        assert!(emitter.is_running());

        emitter.emit([source_create(&EntityRef::new(1, "s1"))]).await;
        close_emitter(&emitter, &settings).await.unwrap();
        assert!(!emitter.is_running());
    }

    #[tokio::test]
    async fn invalid_settings_fail_before_connecting() {
        let mut settings = EventsSettings::default();
        settings.events.handlers = vec!["carrier-pigeon".to_owned()];
        let result = init_emitter(&settings).await;
        assert!(matches!(result, Err(EventsError::Config(_))));
    }

    #[tokio::test]
    async fn second_streaming_handler_is_refused_before_connecting() {
        let mut settings = EventsSettings::default();
        settings.events.handlers = vec!["nats".to_owned(), "nats".to_owned()];
        settings.nats.url = "nats://127.0.0.1:1".to_owned();

        let result = init_emitter(&settings).await;
        assert!(matches!(result, Err(EventsError::Config(m)) if m.contains("more than once")));
    }

    #[tokio::test]
    async fn unreachable_nats_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = EventsSettings::default();
        settings.events.handlers = vec!["logger".to_owned(), "nats".to_owned()];
        settings.nats.url = "nats://127.0.0.1:1".to_owned();
        settings.nats.spool_path = dir.path().join("spool.json");

        let result = init_emitter(&settings).await;
        assert!(matches!(result, Err(EventsError::Transport(_))));
    }
}

//! End-to-end tests for the event pipeline through its public API.
//!
//! Everything here runs against the in-memory transport. Tests that need a
//! live NATS server live next to the transport and are `#[ignore]`d.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    missing_docs
)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mdb_events::catalog::{self, EntityRef};
use mdb_events::{
    Emitter, Event, EventHandler, EventType, LoggerHandler, MemoryTransport, Spool,
    StreamingHandler, StreamingSettings,
};

// =============================================================================
// Helpers
// =============================================================================

/// Shared in-memory sink for formatted log lines.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn records(&self) -> Vec<serde_json::Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

fn settings(dir: &tempfile::TempDir, ack_timeout: Duration) -> StreamingSettings {
    StreamingSettings {
        queue_size: 10,
        ack_timeout,
        spool_path: dir.path().join("events.spool"),
    }
}

fn stamped(n: i64) -> Event {
    let mut event = catalog::file_insert(&EntityRef::new(n, format!("f{n}")), "upload");
    event.id = format!("01HX{n:04}");
    event
}

// =============================================================================
// Emitter + logger
// =============================================================================

#[tokio::test]
async fn logger_emitter_writes_one_record_per_event() {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let emitter = Emitter::new(8, vec![LoggerHandler::new().into()]).unwrap();
    emitter
        .emit([catalog::collection_create(&EntityRef::new(1, "c1"))])
        .await;
    emitter
        .emit([catalog::content_unit_update(&EntityRef::new(2, "u2"))])
        .await;
    emitter
        .emit([catalog::person_delete(&EntityRef::new(3, "p3"))])
        .await;
    emitter.shutdown(None).await.unwrap();

    let records: Vec<_> = capture
        .records()
        .into_iter()
        .filter(|r| r["fields"]["message"] == "event")
        .collect();
    assert_eq!(records.len(), 3);

    let ids: Vec<String> = records
        .iter()
        .map(|r| r["fields"]["id"].as_str().unwrap().to_owned())
        .collect();
    assert!(ids.iter().all(|id| !id.is_empty()));
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 3);

    let types: Vec<_> = records
        .iter()
        .map(|r| r["fields"]["type"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(
        types,
        vec!["COLLECTION_CREATE", "CONTENT_UNIT_UPDATE", "PERSON_DELETE"]
    );

    let payload: serde_json::Value =
        serde_json::from_str(records[0]["fields"]["payload"].as_str().unwrap()).unwrap();
    assert_eq!(payload, serde_json::json!({"id": 1, "uid": "c1"}));
}

// =============================================================================
// Emitter + streaming
// =============================================================================

#[tokio::test]
async fn logger_and_streaming_handlers_both_see_every_event() {
    let dir = tempfile::tempdir().unwrap();
    let memory = MemoryTransport::new();
    let streaming = StreamingHandler::start(memory.clone(), settings(&dir, Duration::from_secs(5)))
        .await
        .unwrap();
    let handlers: Vec<EventHandler> = vec![LoggerHandler::new().into(), streaming.into()];
    let emitter = Emitter::new(4, handlers).unwrap();

    let old = EntityRef::new(10, "old");
    let new = EntityRef::new(11, "new");
    emitter
        .emit([
            catalog::file_replace(&old, &new, "upload"),
            catalog::file_remove(&old),
        ])
        .await;
    emitter
        .shutdown(Some(Duration::from_secs(1)))
        .await
        .unwrap();

    let published = memory.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].event_type, EventType::FileReplace);
    assert_eq!(published[1].event_type, EventType::FileRemove);
    assert!(published[0].id < published[1].id);
    assert!(!dir.path().join("events.spool").exists());
}

#[tokio::test]
async fn full_queue_warning_names_the_dropped_event() {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = tempfile::tempdir().unwrap();
    let stuck = MemoryTransport::new();
    stuck.pause();
    let handler = StreamingHandler::start(stuck.clone(), settings(&dir, Duration::from_secs(5)))
        .await
        .unwrap();

    // One in flight plus ten queued fills the handler; the next is dropped.
    handler.handle(stamped(0));
    stuck.wait_for_attempts(1).await;
    for n in 1..=11 {
        handler.handle(stamped(n));
    }
    assert_eq!(handler.dropped(), 1);

    let drops: Vec<_> = capture
        .records()
        .into_iter()
        .filter(|r| r["fields"]["message"] == "dropping event")
        .collect();
    assert_eq!(drops.len(), 1);
    assert_eq!(drops[0]["level"], "WARN");
    assert_eq!(drops[0]["fields"]["id"], "01HX0011");
    assert_eq!(drops[0]["fields"]["reason"], "buffer limit reached");

    stuck.resume();
    handler.close(Some(Duration::from_secs(1))).await.unwrap();
    assert_eq!(stuck.published().len(), 11);
}

// =============================================================================
// Spool round trip across restarts
// =============================================================================

#[tokio::test]
async fn undelivered_events_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();

    // First run: the transport hangs, so everything behind the first event
    // stays queued and is spooled at close.
    let stuck = MemoryTransport::new();
    stuck.pause();
    let first = StreamingHandler::start(stuck.clone(), settings(&dir, Duration::from_millis(200)))
        .await
        .unwrap();
    first.handle(stamped(0));
    stuck.wait_for_attempts(1).await;
    let backlog: Vec<Event> = (1..=4).map(stamped).collect();
    for event in &backlog {
        first.handle(event.clone());
    }
    first.close(None).await.unwrap();
    first.close(None).await.unwrap();

    let spool = Spool::new(dir.path().join("events.spool"));
    assert_eq!(spool.load().await.unwrap(), backlog);

    // Second run: the backlog goes out first, unchanged, and the file is gone.
    let healthy = MemoryTransport::new();
    let second = StreamingHandler::start(healthy.clone(), settings(&dir, Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(!spool.path().exists());

    second.handle(stamped(99));
    healthy.wait_for_attempts(5).await;
    second.close(Some(Duration::from_secs(1))).await.unwrap();

    let published = healthy.published();
    assert_eq!(published.len(), 5);
    assert_eq!(published[..4], backlog[..]);
    assert_eq!(published[4].id, "01HX0099");
    assert!(!spool.path().exists());
}

#[tokio::test]
async fn emitter_shutdown_spools_what_the_transport_never_took() {
    let dir = tempfile::tempdir().unwrap();
    let stuck = MemoryTransport::new();
    stuck.pause();
    let streaming = StreamingHandler::start(stuck.clone(), settings(&dir, Duration::from_millis(100)))
        .await
        .unwrap();
    let emitter = Emitter::new(16, vec![streaming.into()]).unwrap();

    emitter
        .emit((1..=4).map(|n| catalog::tag_update(&EntityRef::new(n, format!("t{n}")))))
        .await;
    stuck.wait_for_attempts(1).await;

    // A deadline shorter than the ack timeout: the loop is still waiting on
    // the first publish when it expires.
    emitter
        .shutdown(Some(Duration::from_millis(20)))
        .await
        .unwrap();

    let spooled = Spool::new(dir.path().join("events.spool"))
        .load()
        .await
        .unwrap();
    assert_eq!(spooled.len(), 3);
    assert!(spooled.iter().all(|e| e.event_type == EventType::TagUpdate));
    assert!(spooled.iter().all(Event::has_id));
}

//! On-disk holding area for events a handler could not deliver before
//! shutdown.
//!
//! The spool is a single JSON document: an array of full [`Event`] values
//! in delivery order. It exists only between a shutdown that left a
//! backlog and the next startup that reloads it. No file locking is done;
//! one process owns a given path.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::EventsError;
use crate::event::Event;

/// Default spool location, relative to the working directory.
pub const DEFAULT_SPOOL_PATH: &str = "__DO_NOT_REMOVE_nats-event-handler.tmp";

/// A spool file at a fixed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spool {
    path: PathBuf,
}

impl Spool {
    /// Spool at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the spool file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the backlog left by a previous run.
    ///
    /// A missing file is an empty backlog. A file that exists but cannot be
    /// decoded is an error; it is left in place for inspection.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::Spool`] if the file exists but cannot be read
    /// or decoded.
    pub async fn load(&self) -> Result<Vec<Event>, EventsError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.error(format!("read failed: {e}"))),
        };
        serde_json::from_slice(&bytes).map_err(|e| self.error(format!("decode failed: {e}")))
    }

    /// Write `events` as the new backlog, replacing any existing file.
    ///
    /// The document is written to a sibling file first and renamed into
    /// place, so the spool path never holds a partial write. Writing an
    /// empty backlog leaves no file behind.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::Spool`] if encoding, writing, or the rename
    /// fails.
    pub async fn store(&self, events: &[Event]) -> Result<(), EventsError> {
        if events.is_empty() {
            return Ok(());
        }
        let bytes =
            serde_json::to_vec(events).map_err(|e| self.error(format!("encode failed: {e}")))?;

        let partial = self.partial_path();
        if let Err(e) = write_synced(&partial, &bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(self.error(format!("write failed: {e}")));
        }
        if let Err(e) = tokio::fs::rename(&partial, &self.path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(self.error(format!("rename failed: {e}")));
        }
        Ok(())
    }

    /// Delete the spool file. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::Spool`] if the file exists but cannot be removed.
    pub async fn remove(&self) -> Result<(), EventsError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.error(format!("remove failed: {e}"))),
        }
    }

    /// Where [`store`](Self::store) writes before renaming.
    pub fn partial_path(&self) -> PathBuf {
        let mut partial = self.path.clone().into_os_string();
        partial.push(".partial");
        PathBuf::from(partial)
    }

    fn error(&self, message: String) -> EventsError {
        EventsError::Spool {
            path: self.path.clone(),
            message,
        }
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt as _;

    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

impl Default for Spool {
    fn default() -> Self {
        Self::new(DEFAULT_SPOOL_PATH)
    }
}

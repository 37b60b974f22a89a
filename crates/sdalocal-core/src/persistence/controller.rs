//! Persistence Controller - load on start, save on demand and on exit.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──start──> Loaded ──(mutation)──> Dirty ⇄ Saved ──stop──> Closed
//! ```
//!
//! `Dirty` is not stored here; it comes from the store's generation counter
//! (see [`PersistenceController::state`]).
//!
//! # Startup Policy
//!
//! | File on disk          | Result             | File touched?                   |
//! |-----------------------|--------------------|---------------------------------|
//! | absent                | empty document     | no, created on first flush      |
//! | unreadable/malformed  | empty document     | no, set aside on first flush    |
//! | valid                 | decoded document   | no                              |

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::event_bus::{EventBus, StoreEvent};
use crate::store::Store;

use super::atomic::StoreFile;
use super::codec::{self, EncodeError};
use super::types::Document;
use super::worker::{FlushJob, FlushWorker};

#[derive(Error, Debug)]
pub enum PersistError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("IO error writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("background flush failed: {0}")]
    Background(String),

    #[error("persistence controller has not been started")]
    NotStarted,

    #[error("persistence controller already started")]
    AlreadyStarted,

    #[error("persistence controller is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    Uninitialized,
    Loaded,
    Dirty,
    Saved,
    Closed,
}

/// What `start` found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No file yet.
    FirstRun,
    Loaded,
    /// The file exists but could not be used; it was left in place.
    Recovered { detail: String },
}

pub struct PersistenceController {
    file: Arc<StoreFile>,
    state: LifecycleState,
    outcome: Option<LoadOutcome>,
    background: bool,
    worker: Option<FlushWorker>,
    event_bus: Option<Arc<EventBus>>,
}

impl PersistenceController {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Arc::new(StoreFile::new(path)),
            state: LifecycleState::Uninitialized,
            outcome: None,
            background: false,
            worker: None,
            event_bus: None,
        }
    }

    /// Offload `request_flush` writes to a worker thread.
    pub fn with_background_flush(mut self, enabled: bool) -> Self {
        self.background = enabled;
        self
    }

    /// Publish flush outcomes on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn load_outcome(&self) -> Option<&LoadOutcome> {
        self.outcome.as_ref()
    }

    /// Lifecycle state, given whether the store has unsaved changes.
    pub fn state(&self, dirty: bool) -> LifecycleState {
        match self.state {
            LifecycleState::Loaded | LifecycleState::Saved if dirty => LifecycleState::Dirty,
            LifecycleState::Loaded if self.has_saved() => LifecycleState::Saved,
            other => other,
        }
    }

    /// Read the data file and return the document to seed the store with.
    ///
    /// Never fails because of the file itself: a missing file yields an empty
    /// document, and an unreadable one yields an empty document while the file
    /// is left untouched. Errors only on lifecycle misuse.
    pub fn start(&mut self) -> Result<Document, PersistError> {
        match self.state {
            LifecycleState::Uninitialized => {}
            LifecycleState::Closed => return Err(PersistError::Closed),
            _ => return Err(PersistError::AlreadyStarted),
        }

        let (document, outcome) = self.read();
        match &outcome {
            LoadOutcome::FirstRun => log::info!(
                "No data file at {}, starting with an empty document",
                self.path().display()
            ),
            LoadOutcome::Loaded => log::info!(
                "Loaded {} records from {}",
                document.record_count(),
                self.path().display()
            ),
            LoadOutcome::Recovered { detail } => {
                log::warn!(
                    "Data file {} is unreadable ({detail}); starting with an empty document",
                    self.path().display()
                );
                self.file.mark_unreadable();
            }
        }

        if self.background {
            match FlushWorker::spawn(Arc::clone(&self.file), self.event_bus.clone()) {
                Ok(worker) => self.worker = Some(worker),
                Err(e) => log::warn!("Could not start flush worker, saving synchronously: {e}"),
            }
        }

        self.outcome = Some(outcome);
        self.state = LifecycleState::Loaded;
        Ok(document)
    }

    fn read(&self) -> (Document, LoadOutcome) {
        let bytes = match fs::read(self.path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return (Document::default(), LoadOutcome::FirstRun)
            }
            Err(e) => {
                return (
                    Document::default(),
                    LoadOutcome::Recovered {
                        detail: format!("read failed: {e}"),
                    },
                )
            }
        };

        match codec::decode(&bytes) {
            Ok(document) => (document, LoadOutcome::Loaded),
            Err(e) => (
                Document::default(),
                LoadOutcome::Recovered {
                    detail: e.to_string(),
                },
            ),
        }
    }

    /// Encode `document` and atomically replace the data file, on this thread.
    ///
    /// Waits for any background write first so writers never overlap.
    pub fn flush(&mut self, document: &Document) -> Result<(), PersistError> {
        self.ensure_open()?;

        if let Some(worker) = &self.worker {
            if let Err(e) = worker.wait_idle() {
                log::debug!("Superseding failed background flush: {e}");
            }
        }

        let bytes = codec::encode(document)?;
        self.file.write(&bytes)?;
        self.state = LifecycleState::Saved;
        log::debug!("Wrote {} bytes to {}", bytes.len(), self.path().display());
        Ok(())
    }

    /// Synchronously persist the store's document and clear its dirty flag.
    pub fn flush_store(&mut self, store: &Store) -> Result<(), PersistError> {
        let generation = store.generation();
        match self.flush(store.document()) {
            Ok(()) => {
                store.mark_saved(generation);
                self.publish(StoreEvent::Flushed { generation });
                Ok(())
            }
            Err(e) => {
                self.publish(StoreEvent::FlushFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Persist the store's current snapshot without blocking on the write.
    ///
    /// The snapshot is encoded here; the write happens on the worker. Without
    /// a worker this is the same as [`flush_store`](Self::flush_store).
    pub fn request_flush(&mut self, store: &Store) -> Result<(), PersistError> {
        self.ensure_open()?;

        if self.worker.is_none() {
            return self.flush_store(store);
        }

        let bytes = codec::encode(store.document())?;
        if let Some(worker) = &self.worker {
            worker.submit(FlushJob {
                bytes,
                generation: store.generation(),
                tracker: store.save_tracker().clone(),
            });
        }
        Ok(())
    }

    /// Block until background writes are done.
    pub fn wait_for_flush(&self) -> Result<(), PersistError> {
        match &self.worker {
            Some(worker) => worker.wait_idle(),
            None => Ok(()),
        }
    }

    /// Finish pending writes and release the worker. Idempotent.
    pub fn stop(&mut self) {
        if self.state == LifecycleState::Closed {
            return;
        }
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        self.state = LifecycleState::Closed;
        log::info!("Persistence for {} stopped", self.path().display());
    }

    fn has_saved(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| worker.completed_writes() > 0)
    }

    fn ensure_open(&self) -> Result<(), PersistError> {
        match self.state {
            LifecycleState::Uninitialized => Err(PersistError::NotStarted),
            LifecycleState::Closed => Err(PersistError::Closed),
            _ => Ok(()),
        }
    }

    fn publish(&self, event: StoreEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event);
        }
    }
}

impl Drop for PersistenceController {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    use crate::persistence::atomic::temp_path;
    use crate::persistence::{BulletinEvent, FinancialTransaction, TransactionKind};

    fn event(title: &str) -> BulletinEvent {
        BulletinEvent::new(title, NaiveDate::from_ymd_opt(2024, 8, 3).unwrap(), "")
    }

    fn corrupt_backups(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains(".corrupt-"))
            .collect()
    }

    mod start {
        use super::*;

        #[test]
        fn missing_file_is_first_run_and_not_created() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("data.json");
            let mut controller = PersistenceController::new(&path);

            let document = controller.start().unwrap();

            assert_eq!(document, Document::default());
            assert_eq!(controller.load_outcome(), Some(&LoadOutcome::FirstRun));
            assert!(!path.exists());
            controller.stop();
            assert!(!path.exists());
        }

        #[test]
        fn corrupt_file_recovers_and_is_untouched() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("data.json");
            fs::write(&path, "{\"events\": [oops").unwrap();
            let mut controller = PersistenceController::new(&path);

            let document = controller.start().unwrap();

            assert!(document.is_empty());
            assert!(matches!(
                controller.load_outcome(),
                Some(LoadOutcome::Recovered { .. })
            ));
            controller.stop();
            assert_eq!(fs::read_to_string(&path).unwrap(), "{\"events\": [oops");
        }

        #[test]
        fn unreadable_path_recovers() {
            let dir = tempdir().unwrap();
            // a directory where the file should be
            let path = dir.path().join("data.json");
            fs::create_dir(&path).unwrap();
            let mut controller = PersistenceController::new(&path);

            let document = controller.start().unwrap();

            assert!(document.is_empty());
            assert!(matches!(
                controller.load_outcome(),
                Some(LoadOutcome::Recovered { .. })
            ));
        }

        #[test]
        fn valid_file_is_loaded() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("data.json");
            let mut store = Store::new(Document::default());
            store.add(event("Harvest")).unwrap();
            fs::write(&path, codec::encode(store.document()).unwrap()).unwrap();

            let mut controller = PersistenceController::new(&path);
            let document = controller.start().unwrap();

            assert_eq!(&document, store.document());
            assert_eq!(controller.load_outcome(), Some(&LoadOutcome::Loaded));
        }

        #[test]
        fn start_twice_is_rejected() {
            let dir = tempdir().unwrap();
            let mut controller = PersistenceController::new(dir.path().join("data.json"));
            controller.start().unwrap();
            assert!(matches!(
                controller.start(),
                Err(PersistError::AlreadyStarted)
            ));
        }
    }

    mod flush {
        use super::*;

        #[test]
        fn flush_before_start_is_rejected() {
            let dir = tempdir().unwrap();
            let mut controller = PersistenceController::new(dir.path().join("data.json"));
            assert!(matches!(
                controller.flush(&Document::default()),
                Err(PersistError::NotStarted)
            ));
        }

        #[test]
        fn flush_writes_decodable_file() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("data.json");
            let mut controller = PersistenceController::new(&path);
            let mut store = Store::new(controller.start().unwrap());
            store.add(event("Baptism")).unwrap();

            controller.flush_store(&store).unwrap();

            let on_disk = codec::decode(&fs::read(&path).unwrap()).unwrap();
            assert_eq!(&on_disk, store.document());
            assert!(!temp_path(&path).exists());
            assert!(!store.is_dirty());
        }

        #[test]
        fn repeated_flush_is_byte_identical() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("data.json");
            let mut controller = PersistenceController::new(&path);
            let mut store = Store::new(controller.start().unwrap());
            store
                .add(FinancialTransaction::new(
                    TransactionKind::Income,
                    50.0,
                    "Offering",
                    NaiveDate::from_ymd_opt(2024, 8, 3).unwrap(),
                ))
                .unwrap();

            controller.flush_store(&store).unwrap();
            let first = fs::read(&path).unwrap();
            controller.flush_store(&store).unwrap();
            let second = fs::read(&path).unwrap();

            assert_eq!(first, second);
        }

        #[test]
        fn write_failure_keeps_store_dirty() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("data.json");
            let mut controller = PersistenceController::new(&path);
            let mut store = Store::new(controller.start().unwrap());
            store.add(event("Potluck")).unwrap();
            fs::create_dir(temp_path(&path)).unwrap();

            let err = controller.flush_store(&store).unwrap_err();

            assert!(matches!(err, PersistError::Io { .. }));
            assert!(store.is_dirty());
            assert_eq!(store.list::<BulletinEvent>().len(), 1);

            // retry succeeds once the obstacle is gone
            fs::remove_dir(temp_path(&path)).unwrap();
            controller.flush_store(&store).unwrap();
            assert!(!store.is_dirty());
        }

        #[test]
        fn first_flush_after_recovery_preserves_corrupt_file() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("data.json");
            fs::write(&path, "not json at all").unwrap();
            let mut controller = PersistenceController::new(&path);
            let store = Store::new(controller.start().unwrap());

            controller.flush_store(&store).unwrap();

            let backups = corrupt_backups(dir.path());
            assert_eq!(backups.len(), 1);
            assert_eq!(fs::read_to_string(&backups[0]).unwrap(), "not json at all");
            assert!(codec::decode(&fs::read(&path).unwrap()).is_ok());

            controller.flush_store(&store).unwrap();
            assert_eq!(corrupt_backups(dir.path()).len(), 1);
        }

        #[test]
        fn flush_after_stop_is_rejected() {
            let dir = tempdir().unwrap();
            let mut controller = PersistenceController::new(dir.path().join("data.json"));
            controller.start().unwrap();
            controller.stop();
            controller.stop();
            assert!(matches!(
                controller.flush(&Document::default()),
                Err(PersistError::Closed)
            ));
        }
    }

    mod background {
        use super::*;

        #[test]
        fn request_flush_writes_latest_snapshot() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("data.json");
            let mut controller = PersistenceController::new(&path).with_background_flush(true);
            let mut store = Store::new(controller.start().unwrap());

            for n in 0..10 {
                store.add(event(&format!("Event {n}"))).unwrap();
                controller.request_flush(&store).unwrap();
            }
            controller.wait_for_flush().unwrap();

            let on_disk = codec::decode(&fs::read(&path).unwrap()).unwrap();
            assert_eq!(on_disk.events.len(), 10);
            assert!(!store.is_dirty());
        }

        #[test]
        fn stop_drains_pending_write() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("data.json");
            let mut controller = PersistenceController::new(&path).with_background_flush(true);
            let mut store = Store::new(controller.start().unwrap());
            store.add(event("Last")).unwrap();

            controller.request_flush(&store).unwrap();
            controller.stop();

            let on_disk = codec::decode(&fs::read(&path).unwrap()).unwrap();
            assert_eq!(on_disk.events[0].title, "Last");
        }

        #[test]
        fn without_worker_request_is_synchronous() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("data.json");
            let mut controller = PersistenceController::new(&path);
            let mut store = Store::new(controller.start().unwrap());
            store.add(event("Sync")).unwrap();

            controller.request_flush(&store).unwrap();

            assert!(path.exists());
            assert!(!store.is_dirty());
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn states_follow_the_lifecycle() {
            let dir = tempdir().unwrap();
            let mut controller = PersistenceController::new(dir.path().join("data.json"));
            assert_eq!(controller.state(false), LifecycleState::Uninitialized);

            let mut store = Store::new(controller.start().unwrap());
            assert_eq!(controller.state(store.is_dirty()), LifecycleState::Loaded);

            store.add(event("Choir")).unwrap();
            assert_eq!(controller.state(store.is_dirty()), LifecycleState::Dirty);

            controller.flush_store(&store).unwrap();
            assert_eq!(controller.state(store.is_dirty()), LifecycleState::Saved);

            store.add(event("Vespers")).unwrap();
            assert_eq!(controller.state(store.is_dirty()), LifecycleState::Dirty);

            controller.stop();
            assert_eq!(controller.state(store.is_dirty()), LifecycleState::Closed);
        }

        #[test]
        fn flush_outcomes_are_published() {
            let dir = tempdir().unwrap();
            let bus = Arc::new(EventBus::new());
            let mut rx = bus.subscribe();
            let mut controller =
                PersistenceController::new(dir.path().join("data.json")).with_event_bus(bus);
            let store = Store::new(controller.start().unwrap());

            controller.flush_store(&store).unwrap();

            assert_eq!(rx.try_recv().unwrap(), StoreEvent::Flushed { generation: 0 });
        }
    }
}

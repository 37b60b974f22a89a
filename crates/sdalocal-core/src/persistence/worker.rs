//! Background flush worker.
//!
//! One thread, one write in flight. A request that arrives while a write is
//! running replaces whatever is already queued, so the newest snapshot is
//! written next and intermediate snapshots are skipped.
//!
//! ```text
//! submit(g1) ──> [writing g1]
//! submit(g2) ──>   queued: g2
//! submit(g3) ──>   queued: g3   (g2 coalesced away)
//!                [writing g3]
//!                  idle
//! ```

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::event_bus::{EventBus, StoreEvent};
use crate::store::SaveTracker;

use super::atomic::StoreFile;
use super::controller::PersistError;

/// An encoded snapshot waiting to be written.
pub struct FlushJob {
    pub bytes: Vec<u8>,
    pub generation: u64,
    pub tracker: SaveTracker,
}

#[derive(Default)]
struct WorkerState {
    queued: Option<FlushJob>,
    in_flight: bool,
    shutdown: bool,
    last_error: Option<String>,
    writes: u64,
    coalesced: u64,
}

struct Shared {
    state: Mutex<WorkerState>,
    /// Signalled when work is queued or shutdown is requested.
    wake: Condvar,
    /// Signalled when a write finishes.
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct FlushWorker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl FlushWorker {
    pub fn spawn(file: Arc<StoreFile>, event_bus: Option<Arc<EventBus>>) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState::default()),
            wake: Condvar::new(),
            idle: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("sdalocal-flush".to_string())
            .spawn(move || run(worker_shared, file, event_bus))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Queue `job`, replacing any job that has not started yet.
    pub fn submit(&self, job: FlushJob) {
        let mut state = self.shared.lock();
        if let Some(skipped) = state.queued.replace(job) {
            state.coalesced += 1;
            log::debug!(
                "Coalesced flush of generation {} into a newer request",
                skipped.generation
            );
        }
        self.shared.wake.notify_one();
    }

    /// Block until nothing is queued or in flight.
    ///
    /// Returns the error of the most recent write if it failed.
    pub fn wait_idle(&self) -> Result<(), PersistError> {
        let mut state = self.shared.lock();
        while state.queued.is_some() || state.in_flight {
            state = self
                .shared
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match state.last_error.take() {
            Some(reason) => Err(PersistError::Background(reason)),
            None => Ok(()),
        }
    }

    /// Number of snapshots actually written.
    pub fn completed_writes(&self) -> u64 {
        self.shared.lock().writes
    }

    /// Number of queued snapshots replaced before they were written.
    pub fn coalesced(&self) -> u64 {
        self.shared.lock().coalesced
    }

    /// Finish queued work and join the thread. Idempotent.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Flush worker thread panicked");
            }
        }
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: Arc<Shared>, file: Arc<StoreFile>, event_bus: Option<Arc<EventBus>>) {
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if let Some(job) = state.queued.take() {
                    state.in_flight = true;
                    break job;
                }
                if state.shutdown {
                    return;
                }
                state = shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let result = file.write(&job.bytes);

        let mut state = shared.lock();
        state.in_flight = false;
        let event = match result {
            Ok(()) => {
                job.tracker.mark_saved(job.generation);
                state.writes += 1;
                state.last_error = None;
                log::debug!(
                    "Flushed generation {} to {}",
                    job.generation,
                    file.path().display()
                );
                StoreEvent::Flushed {
                    generation: job.generation,
                }
            }
            Err(err) => {
                log::warn!("Background flush failed: {err}");
                let reason = err.to_string();
                state.last_error = Some(reason.clone());
                StoreEvent::FlushFailed { reason }
            }
        };
        shared.idle.notify_all();
        drop(state);

        if let Some(bus) = &event_bus {
            bus.emit(event);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    use crate::persistence::atomic::temp_path;

    fn job(bytes: &str, generation: u64, tracker: &SaveTracker) -> FlushJob {
        FlushJob {
            bytes: bytes.as_bytes().to_vec(),
            generation,
            tracker: tracker.clone(),
        }
    }

    #[test]
    fn single_job_is_written() {
        let dir = tempdir().unwrap();
        let file = Arc::new(StoreFile::new(dir.path().join("data.json")));
        let worker = FlushWorker::spawn(Arc::clone(&file), None).unwrap();
        let tracker = SaveTracker::default();

        worker.submit(job("one", 1, &tracker));
        worker.wait_idle().unwrap();

        assert_eq!(fs::read_to_string(file.path()).unwrap(), "one");
        assert_eq!(tracker.saved(), 1);
        assert_eq!(worker.completed_writes(), 1);
    }

    #[test]
    fn burst_is_coalesced_to_latest() {
        let dir = tempdir().unwrap();
        let file = Arc::new(StoreFile::new(dir.path().join("data.json")));
        let worker = FlushWorker::spawn(Arc::clone(&file), None).unwrap();
        let tracker = SaveTracker::default();

        for generation in 1..=20 {
            worker.submit(job(&format!("gen {generation}"), generation, &tracker));
        }
        worker.wait_idle().unwrap();

        assert_eq!(fs::read_to_string(file.path()).unwrap(), "gen 20");
        assert_eq!(tracker.saved(), 20);
        assert_eq!(worker.completed_writes() + worker.coalesced(), 20);
        assert!(!temp_path(file.path()).exists());
    }

    #[test]
    fn failure_is_reported_once() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("data.json");
        fs::create_dir(temp_path(&target)).unwrap();
        let file = Arc::new(StoreFile::new(&target));
        let worker = FlushWorker::spawn(file, None).unwrap();
        let tracker = SaveTracker::default();

        worker.submit(job("x", 1, &tracker));
        let err = worker.wait_idle().unwrap_err();

        assert!(matches!(err, PersistError::Background(_)));
        assert_eq!(tracker.saved(), 0);
        // reported error is consumed
        assert!(worker.wait_idle().is_ok());
    }

    #[test]
    fn outcomes_are_published() {
        let dir = tempdir().unwrap();
        let file = Arc::new(StoreFile::new(dir.path().join("data.json")));
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let worker = FlushWorker::spawn(file, Some(Arc::clone(&bus))).unwrap();

        worker.submit(job("{}", 4, &SaveTracker::default()));
        worker.wait_idle().unwrap();

        // the event is emitted after the idle signal; wait for the thread to finish it
        let mut worker = worker;
        worker.shutdown();
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::Flushed { generation: 4 });
    }

    #[test]
    fn shutdown_drains_queue() {
        let dir = tempdir().unwrap();
        let file = Arc::new(StoreFile::new(dir.path().join("data.json")));
        let mut worker = FlushWorker::spawn(Arc::clone(&file), None).unwrap();

        worker.submit(job("last words", 1, &SaveTracker::default()));
        worker.shutdown();
        worker.shutdown();

        assert_eq!(fs::read_to_string(file.path()).unwrap(), "last words");
    }
}

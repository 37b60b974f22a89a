//! AppContext - the top-level owner of the application state.
//!
//! There is no global document. The presentation layer builds one
//! `AppContext` at startup and passes it (or `&mut` borrows of its store) to
//! whatever needs it.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────┐
//!                 │        AppContext        │
//!                 ├──────────────────────────┤
//!                 │  - Store (document)      │
//!                 │  - PersistenceController │
//!                 │  - EventBus              │
//!                 └────────────┬─────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//!        ┌──────────┐    ┌──────────┐    ┌──────────┐
//!        │  Events  │    │ Finance  │    │ Projects │   ... views
//!        └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! ## Shutdown
//!
//! [`AppContext::shutdown`] flushes then stops persistence. If the context is
//! dropped without it (early return, unwinding panic) `Drop` does the same,
//! logging rather than returning the flush error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::event_bus::EventBus;
use crate::paths::{self, PathError};
use crate::persistence::{LifecycleState, LoadOutcome, PersistError, PersistenceController};
use crate::store::Store;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Configuration for building an AppContext.
pub struct AppContextBuilder {
    data_file: Option<PathBuf>,
    background_flush: bool,
    event_bus: Option<Arc<EventBus>>,
}

impl Default for AppContextBuilder {
    fn default() -> Self {
        Self {
            data_file: None,
            background_flush: true,
            event_bus: None,
        }
    }
}

impl AppContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this data file instead of resolving one from the environment.
    pub fn data_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_file = Some(path.into());
        self
    }

    /// Write requested flushes on a worker thread (default: on).
    pub fn background_flush(mut self, enabled: bool) -> Self {
        self.background_flush = enabled;
        self
    }

    /// Use an existing EventBus (for testing or a shared UI bus).
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Resolve the data file, load it, and seed the store.
    pub fn build(self) -> Result<AppContext, ContextError> {
        let data_file = match self.data_file {
            Some(path) => path,
            None => paths::resolve_data_file(None)?,
        };
        let event_bus = self.event_bus.unwrap_or_default();

        let mut persistence = PersistenceController::new(data_file)
            .with_background_flush(self.background_flush)
            .with_event_bus(Arc::clone(&event_bus));
        let document = persistence.start()?;
        let store = Store::new(document).with_event_bus(Arc::clone(&event_bus));

        Ok(AppContext {
            store,
            persistence,
            event_bus,
            closed: false,
        })
    }
}

pub struct AppContext {
    store: Store,
    persistence: PersistenceController,
    event_bus: Arc<EventBus>,
    closed: bool,
}

impl AppContext {
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::new()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn data_file(&self) -> &Path {
        self.persistence.path()
    }

    pub fn load_outcome(&self) -> Option<&LoadOutcome> {
        self.persistence.load_outcome()
    }

    pub fn is_dirty(&self) -> bool {
        self.store.is_dirty()
    }

    pub fn state(&self) -> LifecycleState {
        if self.closed {
            return LifecycleState::Closed;
        }
        self.persistence.state(self.store.is_dirty())
    }

    /// Save now, on this thread.
    pub fn flush(&mut self) -> Result<(), PersistError> {
        self.persistence.flush_store(&self.store)
    }

    /// Save in the background; bursts of requests collapse into one write.
    pub fn request_flush(&mut self) -> Result<(), PersistError> {
        self.persistence.request_flush(&self.store)
    }

    pub fn wait_for_flush(&self) -> Result<(), PersistError> {
        self.persistence.wait_for_flush()
    }

    /// Final flush, then stop. Returns the flush result.
    pub fn shutdown(mut self) -> Result<(), PersistError> {
        self.close()
    }

    fn close(&mut self) -> Result<(), PersistError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self.persistence.flush_store(&self.store);
        if let Err(e) = &result {
            log::error!(
                "Final flush to {} failed: {e}",
                self.persistence.path().display()
            );
        }
        self.persistence.stop();
        result
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ============================================================================
// TESTS
// ============================================================================

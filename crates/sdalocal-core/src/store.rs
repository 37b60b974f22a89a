//! Store Engine - the only owner of the in-memory [`Document`].
//!
//! Collaborators never touch the document directly. Every change goes
//! through [`Store::add`], [`Store::update`] or [`Store::remove`], which
//! normalize and validate records, hand out ids, and bump the mutation
//! generation that drives the dirty flag.
//!
//! ## Dirty Tracking
//!
//! ```text
//! generation:  0 ──add──> 1 ──update──> 2 ──remove──> 3
//! saved:       0                  (flush of gen 2 lands) 2
//! dirty:       no         yes         yes             yes (3 > 2)
//! ```
//!
//! The saved marker is shared with the flush worker, so a background write of
//! an older snapshot can never clear dirtiness caused by newer mutations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::event_bus::{EventBus, StoreEvent};
use crate::persistence::{
    CollectionKind, Document, FinancialTransaction, Record, TransactionKind, ValidationError,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{collection} record not found: {id}")]
    NotFound { collection: CollectionKind, id: u64 },

    #[error("no ids left in {collection}")]
    IdsExhausted { collection: CollectionKind },
}

/// Newest generation known to be on disk. Cloned into flush jobs.
#[derive(Debug, Clone, Default)]
pub struct SaveTracker(Arc<AtomicU64>);

impl SaveTracker {
    pub fn saved(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Record that `generation` reached disk. Never moves backwards.
    pub fn mark_saved(&self, generation: u64) {
        self.0.fetch_max(generation, Ordering::AcqRel);
    }
}

/// Ledger totals, recomputed from the transactions on every call.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub total_income: f64,
    pub total_expense: f64,
    pub balance: f64,
}

pub struct Store {
    document: Document,
    generation: u64,
    saved: SaveTracker,
    event_bus: Option<Arc<EventBus>>,
}

impl Store {
    /// Seed the store with a loaded (or empty) document. Starts clean.
    pub fn new(document: Document) -> Self {
        Self {
            document,
            generation: 0,
            saved: SaveTracker::default(),
            event_bus: None,
        }
    }

    /// Publish record changes on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Validate `record` and append it with a freshly allocated id.
    ///
    /// Whatever id the caller put on the record is overwritten.
    pub fn add<T: Record>(&mut self, mut record: T) -> Result<u64, StoreError> {
        record.normalize();
        record.validate()?;

        let id = self
            .document
            .next_ids
            .allocate(T::COLLECTION)
            .ok_or(StoreError::IdsExhausted {
                collection: T::COLLECTION,
            })?;
        record.set_id(id);
        T::items_mut(&mut self.document).push(record);

        self.touch(StoreEvent::RecordAdded {
            collection: T::COLLECTION,
            id,
        });
        Ok(id)
    }

    /// Apply `edit` to a copy of record `id`, re-validate, then replace it.
    ///
    /// The id and the record's position are preserved. On any error the
    /// stored record is left exactly as it was.
    pub fn update<T: Record>(
        &mut self,
        id: u64,
        edit: impl FnOnce(&mut T),
    ) -> Result<(), StoreError> {
        let position = self.position::<T>(id)?;

        let mut draft = T::items(&self.document)[position].clone();
        edit(&mut draft);
        draft.set_id(id);
        draft.normalize();
        draft.validate()?;

        T::items_mut(&mut self.document)[position] = draft;

        self.touch(StoreEvent::RecordUpdated {
            collection: T::COLLECTION,
            id,
        });
        Ok(())
    }

    /// Replace record `id` wholesale (its id is kept).
    pub fn replace<T: Record>(&mut self, id: u64, record: T) -> Result<(), StoreError> {
        self.update(id, move |slot: &mut T| *slot = record)
    }

    /// Remove record `id`. Its id is never handed out again.
    pub fn remove<T: Record>(&mut self, id: u64) -> Result<T, StoreError> {
        let position = self.position::<T>(id)?;
        let removed = T::items_mut(&mut self.document).remove(position);

        self.touch(StoreEvent::RecordRemoved {
            collection: T::COLLECTION,
            id,
        });
        Ok(removed)
    }

    /// Records of one collection in insertion order.
    pub fn list<T: Record>(&self) -> &[T] {
        T::items(&self.document)
    }

    pub fn get<T: Record>(&self, id: u64) -> Option<&T> {
        T::items(&self.document).iter().find(|r| r.id() == id)
    }

    /// Number of records in `kind`.
    pub fn len(&self, kind: CollectionKind) -> usize {
        match kind {
            CollectionKind::Events => self.document.events.len(),
            CollectionKind::Transactions => self.document.transactions.len(),
            CollectionKind::MediaChatEntries => self.document.media_chat_entries.len(),
            CollectionKind::Projects => self.document.projects.len(),
        }
    }

    /// Fold the current transactions into income, expense and balance.
    pub fn summary(&self) -> LedgerSummary {
        let (total_income, total_expense) = self.list::<FinancialTransaction>().iter().fold(
            (0.0, 0.0),
            |(income, expense), tx| match tx.kind {
                TransactionKind::Income => (income + tx.amount, expense),
                TransactionKind::Expense => (income, expense + tx.amount),
            },
        );

        LedgerSummary {
            total_income,
            total_expense,
            balance: total_income - total_expense,
        }
    }

    /// True if the document changed since the last successful persist.
    pub fn is_dirty(&self) -> bool {
        self.generation > self.saved.saved()
    }

    /// Mutation counter; increments on every successful change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn save_tracker(&self) -> &SaveTracker {
        &self.saved
    }

    /// Record that the state as of `generation` has been persisted.
    pub fn mark_saved(&self, generation: u64) {
        self.saved.mark_saved(generation);
    }

    fn position<T: Record>(&self, id: u64) -> Result<usize, StoreError> {
        T::items(&self.document)
            .iter()
            .position(|r| r.id() == id)
            .ok_or(StoreError::NotFound {
                collection: T::COLLECTION,
                id,
            })
    }

    fn touch(&mut self, event: StoreEvent) {
        self.generation += 1;
        log::debug!("Store generation {}: {:?}", self.generation, event);
        if let Some(bus) = &self.event_bus {
            bus.emit(event);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

//! Record invariants.
//!
//! Every record is normalized (clamped, defaulted) and then validated before
//! the store accepts it, and again when a document is decoded from disk.
//! A record that passes `validate` is already normalized, so normalizing it
//! again changes nothing.
//! Field names in errors are the on-disk camelCase names.

use std::collections::HashSet;

use thiserror::Error;

use super::types::{
    BuildingProject, BulletinEvent, CollectionKind, Document, FinancialTransaction, LogEntry,
    Record, DEFAULT_CATEGORY,
};

pub const MIN_PROGRESS: i32 = 0;
pub const MAX_PROGRESS: i32 = 100;

/// A record field violates an invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A decoded document breaks a collection-level invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("{collection} record {id}: {source}")]
    InvalidRecord {
        collection: CollectionKind,
        id: u64,
        source: ValidationError,
    },

    #[error("{collection} contains duplicate id {id}")]
    DuplicateId { collection: CollectionKind, id: u64 },
}

pub trait Validate {
    /// Apply the documented coercions. Never fails.
    fn normalize(&mut self) {}

    /// Check invariants without side effects.
    fn validate(&self) -> Result<(), ValidationError>;
}

fn require_text(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    Ok(())
}

fn require_non_negative(field: &str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::new(field, "must be a finite number"));
    }
    if value < 0.0 {
        return Err(ValidationError::new(field, "must not be negative"));
    }
    Ok(())
}

impl Validate for BulletinEvent {
    fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title)
    }
}

impl Validate for FinancialTransaction {
    fn normalize(&mut self) {
        if self.category.trim().is_empty() {
            self.category = DEFAULT_CATEGORY.to_string();
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("category", &self.category)?;
        require_non_negative("amount", self.amount)
    }
}

impl Validate for LogEntry {
    fn normalize(&mut self) {
        if self
            .media_link
            .as_deref()
            .is_some_and(|link| link.trim().is_empty())
        {
            self.media_link = None;
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("author", &self.author)?;
        require_text("message", &self.message)?;
        match &self.media_link {
            Some(link) => require_text("mediaLink", link),
            None => Ok(()),
        }
    }
}

impl Validate for BuildingProject {
    fn normalize(&mut self) {
        self.progress_percent = self.progress_percent.clamp(MIN_PROGRESS, MAX_PROGRESS);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name)?;
        require_non_negative("budget", self.budget)?;

        if !(MIN_PROGRESS..=MAX_PROGRESS).contains(&self.progress_percent) {
            return Err(ValidationError::new(
                "progressPercent",
                format!("must be between {MIN_PROGRESS} and {MAX_PROGRESS}"),
            ));
        }

        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(ValidationError::new("endDate", "must not precede startDate"));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Document Checks
// ============================================================================

/// Normalize every record in the document.
pub fn normalize_document(document: &mut Document) {
    document.events.iter_mut().for_each(Validate::normalize);
    document.transactions.iter_mut().for_each(Validate::normalize);
    document
        .media_chat_entries
        .iter_mut()
        .for_each(Validate::normalize);
    document.projects.iter_mut().for_each(Validate::normalize);
}

/// Validate every record and reject duplicate ids within a collection.
pub fn validate_document(document: &Document) -> Result<(), DocumentError> {
    check_collection(BulletinEvent::items(document))?;
    check_collection(FinancialTransaction::items(document))?;
    check_collection(LogEntry::items(document))?;
    check_collection(BuildingProject::items(document))?;
    Ok(())
}

fn check_collection<T: Record>(records: &[T]) -> Result<(), DocumentError> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        record
            .validate()
            .map_err(|source| DocumentError::InvalidRecord {
                collection: T::COLLECTION,
                id: record.id(),
                source,
            })?;

        if !seen.insert(record.id()) {
            return Err(DocumentError::DuplicateId {
                collection: T::COLLECTION,
                id: record.id(),
            });
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

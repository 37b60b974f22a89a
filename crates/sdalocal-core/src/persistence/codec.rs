//! Document <-> bytes.
//!
//! # Format
//!
//! Pretty-printed UTF-8 JSON followed by a newline. Keys are emitted in struct
//! declaration order, so encoding an unchanged document always produces the
//! same bytes.
//!
//! # Decoding Rules
//!
//! - Top level must be a JSON object
//! - Missing collections (or a missing `nextIds`) default to empty
//! - Unknown keys are dropped
//! - Wrong field types, invalid records and duplicate ids are `Malformed`
//! - `nextIds` is raised past the largest id present in each collection

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use super::schema;
use super::types::{
    BuildingProject, BulletinEvent, CollectionKind, Document, FinancialTransaction, LogEntry,
    Record,
};

const UTF8_BOM: char = '\u{feff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// The bytes are not a well-formed document.
    Malformed,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeErrorKind::Malformed => f.write_str("malformed document"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub detail: String,
}

impl DecodeError {
    fn malformed(detail: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::Malformed,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to encode document: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Render a document to its on-disk form.
pub fn encode(document: &Document) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = serde_json::to_vec_pretty(document)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse the on-disk form back into a document.
pub fn decode(bytes: &[u8]) -> Result<Document, DecodeError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| DecodeError::malformed(format!("not valid UTF-8: {e}")))?;
    let text = text.trim_start_matches(UTF8_BOM);

    let value: Value = serde_json::from_str(text)
        .map_err(|e| DecodeError::malformed(format!("invalid JSON: {e}")))?;

    if !value.is_object() {
        return Err(DecodeError::malformed(format!(
            "expected an object at the top level, found {}",
            json_type_name(&value)
        )));
    }

    let mut document: Document = serde_json::from_value(value)
        .map_err(|e| DecodeError::malformed(format!("unexpected field type: {e}")))?;

    schema::normalize_document(&mut document);
    schema::validate_document(&document).map_err(|e| DecodeError::malformed(e.to_string()))?;
    check_id_space(&document)?;
    repair_next_ids(&mut document);

    Ok(document)
}

/// Reject a collection whose highest id leaves no room for the next one.
fn check_id_space(document: &Document) -> Result<(), DecodeError> {
    let maxima = collection_maxima(document);

    match maxima.into_iter().find(|(_, max)| *max == u64::MAX) {
        Some((kind, max)) => Err(DecodeError::malformed(format!(
            "{kind} id {max} is out of range"
        ))),
        None => Ok(()),
    }
}

/// Raise each counter past the highest id in its collection.
///
/// Returns the collections whose counter had to move.
pub(crate) fn repair_next_ids(document: &mut Document) -> Vec<CollectionKind> {
    let maxima = collection_maxima(document);

    let mut repaired = Vec::new();
    for (kind, max) in maxima {
        if document.next_ids.ensure_above(kind, max) {
            log::warn!(
                "nextIds.{kind} was behind the stored records, raised to {}",
                document.next_ids.peek(kind)
            );
            repaired.push(kind);
        }
    }
    repaired
}

/// Highest stored id per collection (0 when empty).
fn collection_maxima(document: &Document) -> [(CollectionKind, u64); 4] {
    [
        (CollectionKind::Events, max_id::<BulletinEvent>(document)),
        (
            CollectionKind::Transactions,
            max_id::<FinancialTransaction>(document),
        ),
        (CollectionKind::MediaChatEntries, max_id::<LogEntry>(document)),
        (CollectionKind::Projects, max_id::<BuildingProject>(document)),
    ]
}

fn max_id<T: Record>(document: &Document) -> u64 {
    T::items(document).iter().map(Record::id).max().unwrap_or(0)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// TESTS
// ============================================================================

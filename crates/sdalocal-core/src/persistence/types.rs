//! Persisted document types.
//!
//! # Data Model Overview
//!
//! sdaLocal keeps all of its state in one JSON file:
//!
//! ```text
//! <data dir>/sdaLocal/
//! ├── sdalocal_data.json                  # The document
//! ├── sdalocal_data.json.tmp              # In-flight write (transient)
//! └── sdalocal_data.json.corrupt-<stamp>  # Unreadable file set aside on first save
//! ```
//!
//! The document holds four independent collections plus the id counters:
//!
//! ```json
//! {
//!   "events": [...],
//!   "transactions": [...],
//!   "mediaChatEntries": [...],
//!   "projects": [...],
//!   "nextIds": { "events": 1, "transactions": 1, "mediaChatEntries": 1, "projects": 1 }
//! }
//! ```
//!
//! # Design Principles
//!
//! - **Tolerant reads**: a missing collection defaults to empty, unknown keys are dropped
//! - **Strict types**: a field with the wrong JSON type fails the whole decode
//! - **Stable output**: keys are written in declaration order, so encodes are repeatable
//! - **Ids are never reused**: `nextIds` only moves forward

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use thiserror::Error;

use super::schema::Validate;

/// First id handed out in every collection.
pub const FIRST_ID: u64 = 1;

/// Category assigned to transactions entered without one.
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

// ============================================================================
// Collections
// ============================================================================

/// One of the four record sequences in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollectionKind {
    Events,
    Transactions,
    MediaChatEntries,
    Projects,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 4] = [
        CollectionKind::Events,
        CollectionKind::Transactions,
        CollectionKind::MediaChatEntries,
        CollectionKind::Projects,
    ];

    /// The key used for this collection in the persisted document.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Events => "events",
            CollectionKind::Transactions => "transactions",
            CollectionKind::MediaChatEntries => "mediaChatEntries",
            CollectionKind::Projects => "projects",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown collection: {0}")]
pub struct UnknownCollection(pub String);

impl FromStr for CollectionKind {
    type Err = UnknownCollection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "events" => Ok(CollectionKind::Events),
            "transactions" => Ok(CollectionKind::Transactions),
            "mediaChatEntries" | "media" => Ok(CollectionKind::MediaChatEntries),
            "projects" => Ok(CollectionKind::Projects),
            other => Err(UnknownCollection(other.to_string())),
        }
    }
}

// ============================================================================
// Document
// ============================================================================

/// The full application state, as held in memory and written to disk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Document {
    /// Bulletin events, in insertion order.
    pub events: Vec<BulletinEvent>,

    /// Ledger entries, in insertion order.
    pub transactions: Vec<FinancialTransaction>,

    /// Media and chat log, in insertion order (timestamps may go backwards).
    pub media_chat_entries: Vec<LogEntry>,

    /// Building projects, in insertion order.
    pub projects: Vec<BuildingProject>,

    /// Next id to hand out per collection.
    pub next_ids: NextIds,
}

impl Document {
    /// True when no collection holds a record.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.transactions.is_empty()
            && self.media_chat_entries.is_empty()
            && self.projects.is_empty()
    }

    /// Total number of records across all collections.
    pub fn record_count(&self) -> usize {
        self.events.len()
            + self.transactions.len()
            + self.media_chat_entries.len()
            + self.projects.len()
    }
}

/// Per-collection id counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NextIds {
    pub events: u64,
    pub transactions: u64,
    pub media_chat_entries: u64,
    pub projects: u64,
}

impl Default for NextIds {
    fn default() -> Self {
        Self {
            events: FIRST_ID,
            transactions: FIRST_ID,
            media_chat_entries: FIRST_ID,
            projects: FIRST_ID,
        }
    }
}

impl NextIds {
    /// The id the next `allocate` for `kind` will return.
    pub fn peek(&self, kind: CollectionKind) -> u64 {
        match kind {
            CollectionKind::Events => self.events,
            CollectionKind::Transactions => self.transactions,
            CollectionKind::MediaChatEntries => self.media_chat_entries,
            CollectionKind::Projects => self.projects,
        }
    }

    /// Hand out the next id for `kind` and advance the counter.
    ///
    /// Returns `None` when the counter cannot advance any further. The
    /// counter is left as it was, so no id is ever handed out twice.
    pub fn allocate(&mut self, kind: CollectionKind) -> Option<u64> {
        let slot = self.slot_mut(kind);
        let id = *slot;
        *slot = id.checked_add(1)?;
        Some(id)
    }

    /// Raise the counter for `kind` past `max_id`. Returns true if it moved.
    pub fn ensure_above(&mut self, kind: CollectionKind, max_id: u64) -> bool {
        let slot = self.slot_mut(kind);
        let floor = max_id.saturating_add(1).max(FIRST_ID);
        if *slot < floor {
            *slot = floor;
            true
        } else {
            false
        }
    }

    fn slot_mut(&mut self, kind: CollectionKind) -> &mut u64 {
        match kind {
            CollectionKind::Events => &mut self.events,
            CollectionKind::Transactions => &mut self.transactions,
            CollectionKind::MediaChatEntries => &mut self.media_chat_entries,
            CollectionKind::Projects => &mut self.projects,
        }
    }
}

// ============================================================================
// Record Types
// ============================================================================

/// A record that lives in one of the document's collections.
///
/// Ties a concrete type to its collection so the store can offer one
/// generic `add`/`update`/`remove`/`list` surface for all four.
pub trait Record: Clone + fmt::Debug + Validate {
    const COLLECTION: CollectionKind;

    fn id(&self) -> u64;

    fn set_id(&mut self, id: u64);

    fn items(document: &Document) -> &[Self];

    fn items_mut(document: &mut Document) -> &mut Vec<Self>;
}

/// An entry on the bulletin board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletinEvent {
    pub id: u64,

    /// Headline shown in the bulletin list. Must not be blank.
    pub title: String,

    /// Day of the event (`YYYY-MM-DD`).
    pub date: NaiveDate,

    /// Free-form body text.
    #[serde(default)]
    pub details: String,
}

impl BulletinEvent {
    /// A new, not yet stored event (id is assigned by the store).
    pub fn new(title: impl Into<String>, date: NaiveDate, details: impl Into<String>) -> Self {
        Self {
            id: 0,
            title: title.into(),
            date,
            details: details.into(),
        }
    }
}

impl Record for BulletinEvent {
    const COLLECTION: CollectionKind = CollectionKind::Events;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn items(document: &Document) -> &[Self] {
        &document.events
    }

    fn items_mut(document: &mut Document) -> &mut Vec<Self> {
        &mut document.events
    }
}

/// Direction of money for a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    #[serde(alias = "Income")]
    Income,
    #[serde(alias = "Expense")]
    Expense,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Income => f.write_str("Income"),
            TransactionKind::Expense => f.write_str("Expense"),
        }
    }
}

/// A single ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialTransaction {
    pub id: u64,

    pub kind: TransactionKind,

    /// Always non-negative; `kind` carries the sign.
    pub amount: f64,

    /// e.g. "Tithe", "Offering", "Operations".
    #[serde(default = "default_category")]
    pub category: String,

    pub date: NaiveDate,

    #[serde(default)]
    pub note: String,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl FinancialTransaction {
    /// A new, not yet stored ledger entry.
    pub fn new(
        kind: TransactionKind,
        amount: f64,
        category: impl Into<String>,
        date: NaiveDate,
    ) -> Self {
        Self {
            id: 0,
            kind,
            amount,
            category: category.into(),
            date,
            note: String::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }
}

impl Record for FinancialTransaction {
    const COLLECTION: CollectionKind = CollectionKind::Transactions;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn items(document: &Document) -> &[Self] {
        &document.transactions
    }

    fn items_mut(document: &mut Document) -> &mut Vec<Self> {
        &mut document.transactions
    }
}

/// A line in the media/chat log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: u64,

    pub timestamp: DateTime<Utc>,

    pub author: String,

    pub message: String,

    /// Video URL or local file path shared with the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_link: Option<String>,
}

impl LogEntry {
    /// A new, not yet stored log entry.
    pub fn new(
        author: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            timestamp,
            author: author.into(),
            message: message.into(),
            media_link: None,
        }
    }

    pub fn with_media_link(mut self, link: impl Into<String>) -> Self {
        self.media_link = Some(link.into());
        self
    }
}

impl Record for LogEntry {
    const COLLECTION: CollectionKind = CollectionKind::MediaChatEntries;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn items(document: &Document) -> &[Self] {
        &document.media_chat_entries
    }

    fn items_mut(document: &mut Document) -> &mut Vec<Self> {
        &mut document.media_chat_entries
    }
}

/// Where a building project stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProjectStatus {
    #[default]
    Planned,
    InProgress,
    OnHold,
    Completed,
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProjectStatus::Planned => "Planned",
            ProjectStatus::InProgress => "In Progress",
            ProjectStatus::OnHold => "On Hold",
            ProjectStatus::Completed => "Completed",
        };
        f.write_str(label)
    }
}

/// A tracked construction or renovation project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingProject {
    pub id: u64,

    /// Must not be blank.
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Person responsible for the project.
    #[serde(default)]
    pub manager: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,

    /// Not earlier than `start_date` when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,

    /// Non-negative.
    #[serde(default)]
    pub budget: f64,

    /// Clamped into `0..=100`.
    #[serde(default, deserialize_with = "saturating_i32")]
    pub progress_percent: i32,

    #[serde(default)]
    pub status: ProjectStatus,
}

/// Accept any JSON integer, saturating at the `i32` bounds.
///
/// Out-of-range progress is a value to clamp, not a malformed file.
fn saturating_i32<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    struct SaturatingI32;

    impl<'de> de::Visitor<'de> for SaturatingI32 {
        type Value = i32;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer")
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<i32, E> {
            Ok(i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX }))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<i32, E> {
            Ok(i32::try_from(value).unwrap_or(i32::MAX))
        }
    }

    deserializer.deserialize_i64(SaturatingI32)
}

impl BuildingProject {
    /// A new, not yet stored project in the `Planned` state.
    pub fn new(name: impl Into<String>, budget: f64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: String::new(),
            manager: String::new(),
            start_date: None,
            end_date: None,
            budget,
            progress_percent: 0,
            status: ProjectStatus::Planned,
        }
    }
}

impl Record for BuildingProject {
    const COLLECTION: CollectionKind = CollectionKind::Projects;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn items(document: &Document) -> &[Self] {
        &document.projects
    }

    fn items_mut(document: &mut Document) -> &mut Vec<Self> {
        &mut document.projects
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_round_trip() {
        for kind in CollectionKind::ALL {
            assert_eq!(kind.as_str().parse::<CollectionKind>().unwrap(), kind);
        }
        assert_eq!(
            "media".parse::<CollectionKind>().unwrap(),
            CollectionKind::MediaChatEntries
        );
        assert!("finance".parse::<CollectionKind>().is_err());
    }

    #[test]
    fn next_ids_allocate_advances() {
        let mut ids = NextIds::default();
        assert_eq!(ids.allocate(CollectionKind::Events), Some(1));
        assert_eq!(ids.allocate(CollectionKind::Events), Some(2));
        assert_eq!(ids.peek(CollectionKind::Events), 3);
        assert_eq!(ids.peek(CollectionKind::Projects), 1);
    }

    #[test]
    fn exhausted_counter_stops_allocating() {
        let mut ids = NextIds {
            events: u64::MAX - 1,
            ..NextIds::default()
        };
        assert_eq!(ids.allocate(CollectionKind::Events), Some(u64::MAX - 1));
        assert_eq!(ids.allocate(CollectionKind::Events), None);
        assert_eq!(ids.allocate(CollectionKind::Events), None);
        assert_eq!(ids.peek(CollectionKind::Events), u64::MAX);
    }

    #[test]
    fn ensure_above_only_raises() {
        let mut ids = NextIds::default();
        assert!(ids.ensure_above(CollectionKind::Transactions, 7));
        assert_eq!(ids.peek(CollectionKind::Transactions), 8);

        assert!(!ids.ensure_above(CollectionKind::Transactions, 3));
        assert_eq!(ids.peek(CollectionKind::Transactions), 8);
    }

    #[test]
    fn transaction_accepts_capitalized_kind() {
        let json = r#"{"id": 1, "kind": "Expense", "amount": 4.5, "date": "2024-03-01"}"#;
        let tx: FinancialTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.kind, TransactionKind::Expense);
        assert_eq!(tx.category, DEFAULT_CATEGORY);
        assert!(tx.note.is_empty());
    }

    #[test]
    fn project_serializes_camel_case() {
        let mut project = BuildingProject::new("Roof", 1200.0);
        project.status = ProjectStatus::InProgress;
        project.progress_percent = 40;

        let value = serde_json::to_value(&project).unwrap();
        assert_eq!(value["progressPercent"], 40);
        assert_eq!(value["status"], "inProgress");
        assert!(value.get("startDate").is_none());
    }

    #[test]
    fn oversized_progress_saturates() {
        let json = r#"{"id": 1, "name": "Annex", "progressPercent": 3000000000}"#;
        let project: BuildingProject = serde_json::from_str(json).unwrap();
        assert_eq!(project.progress_percent, i32::MAX);

        let json = r#"{"id": 1, "name": "Annex", "progressPercent": -99999999999}"#;
        let project: BuildingProject = serde_json::from_str(json).unwrap();
        assert_eq!(project.progress_percent, i32::MIN);

        let json = r#"{"id": 1, "name": "Annex", "progressPercent": 18446744073709551615}"#;
        let project: BuildingProject = serde_json::from_str(json).unwrap();
        assert_eq!(project.progress_percent, i32::MAX);
    }

    #[test]
    fn fractional_progress_is_rejected() {
        let json = r#"{"id": 1, "name": "Annex", "progressPercent": 12.5}"#;
        assert!(serde_json::from_str::<BuildingProject>(json).is_err());
    }

    #[test]
    fn log_entry_omits_missing_media_link() {
        let entry = LogEntry::new("You", "hello", Utc::now());
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("mediaLink").is_none());

        let linked = entry.with_media_link("https://example.org/v.mp4");
        let value = serde_json::to_value(&linked).unwrap();
        assert_eq!(value["mediaLink"], "https://example.org/v.mp4");
    }

    #[test]
    fn empty_document_has_no_records() {
        let document = Document::default();
        assert!(document.is_empty());
        assert_eq!(document.record_count(), 0);
        assert_eq!(document.next_ids, NextIds::default());
    }
}

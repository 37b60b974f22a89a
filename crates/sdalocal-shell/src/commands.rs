//! Line-oriented commands understood by the shell.
//!
//! ```text
//! list <collection>
//! add <collection> <json>
//! update <collection> <id> <json>
//! remove <collection> <id>
//! summary | save | status | help | quit
//! ```

use std::io::{self, Write};

use chrono::{SecondsFormat, Utc};
use sdalocal_core::persistence::UnknownCollection;
use sdalocal_core::{
    AppContext, BuildingProject, BulletinEvent, CollectionKind, FinancialTransaction,
    LoadOutcome, LogEntry, PersistError, Record, StoreError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  list <collection>                 Show all records
  add <collection> <json>           Add a record, e.g. add events {\"title\":\"Vespers\",\"date\":\"2024-06-08\"}
  update <collection> <id> <json>   Merge fields into an existing record
  remove <collection> <id>          Delete a record
  summary                           Income, expenses and balance
  save                              Write the data file now
  status                            Data file and unsaved changes
  help                              This text
  quit                              Save and exit

Collections: events, transactions, media, projects";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    List(CollectionKind),
    Add(CollectionKind, Value),
    Update(CollectionKind, u64, Value),
    Remove(CollectionKind, u64),
    Summary,
    Save,
    Status,
    Help,
    Quit,
}

/// What the read loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Error, Debug)]
pub enum CommandError {
    /// First word is not a command
    #[error("Unknown command: {0} (try `help`)")]
    Unknown(String),

    /// Missing or extra arguments
    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error(transparent)]
    Collection(#[from] UnknownCollection),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Invalid record JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Save failed: {0}")]
    Persist(#[from] PersistError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Parsing
// ============================================================================

/// Split off the first whitespace-delimited word.
fn next_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (input, ""),
    }
}

fn parse_id(raw: &str) -> Result<u64, CommandError> {
    raw.parse()
        .map_err(|_| CommandError::InvalidId(raw.to_string()))
}

fn parse_object(raw: &str, usage: &'static str) -> Result<Value, CommandError> {
    if raw.is_empty() {
        return Err(CommandError::Usage(usage));
    }
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(CommandError::Usage(usage));
    }
    Ok(value)
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let (verb, rest) = next_word(line.trim());
    if verb.is_empty() {
        return Ok(None);
    }

    let command = match verb {
        "list" => {
            const USAGE: &str = "list <collection>";
            let (collection, extra) = next_word(rest);
            if collection.is_empty() || !extra.is_empty() {
                return Err(CommandError::Usage(USAGE));
            }
            Command::List(collection.parse()?)
        }
        "add" => {
            const USAGE: &str = "add <collection> <json>";
            let (collection, json) = next_word(rest);
            if collection.is_empty() {
                return Err(CommandError::Usage(USAGE));
            }
            Command::Add(collection.parse()?, parse_object(json, USAGE)?)
        }
        "update" => {
            const USAGE: &str = "update <collection> <id> <json>";
            let (collection, rest) = next_word(rest);
            let (id, json) = next_word(rest);
            if collection.is_empty() || id.is_empty() {
                return Err(CommandError::Usage(USAGE));
            }
            Command::Update(
                collection.parse()?,
                parse_id(id)?,
                parse_object(json, USAGE)?,
            )
        }
        "remove" => {
            const USAGE: &str = "remove <collection> <id>";
            let (collection, rest) = next_word(rest);
            let (id, extra) = next_word(rest);
            if collection.is_empty() || id.is_empty() || !extra.is_empty() {
                return Err(CommandError::Usage(USAGE));
            }
            Command::Remove(collection.parse()?, parse_id(id)?)
        }
        "summary" => Command::Summary,
        "save" => Command::Save,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

// ============================================================================
// Execution
// ============================================================================

/// Run `command` against the context, writing its output to `out`.
pub fn execute(
    command: Command,
    context: &mut AppContext,
    out: &mut impl Write,
) -> Result<Flow, CommandError> {
    match command {
        Command::List(kind) => list(kind, context, out)?,
        Command::Add(kind, value) => {
            let id = match kind {
                CollectionKind::Events => add_record::<BulletinEvent>(context, value)?,
                CollectionKind::Transactions => {
                    add_record::<FinancialTransaction>(context, value)?
                }
                CollectionKind::MediaChatEntries => add_record::<LogEntry>(context, value)?,
                CollectionKind::Projects => add_record::<BuildingProject>(context, value)?,
            };
            writeln!(out, "Added {kind} #{id}")?;
            after_mutation(context, out)?;
        }
        Command::Update(kind, id, patch) => {
            match kind {
                CollectionKind::Events => update_record::<BulletinEvent>(context, id, patch)?,
                CollectionKind::Transactions => {
                    update_record::<FinancialTransaction>(context, id, patch)?
                }
                CollectionKind::MediaChatEntries => {
                    update_record::<LogEntry>(context, id, patch)?
                }
                CollectionKind::Projects => update_record::<BuildingProject>(context, id, patch)?,
            }
            writeln!(out, "Updated {kind} #{id}")?;
            after_mutation(context, out)?;
        }
        Command::Remove(kind, id) => {
            let store = context.store_mut();
            match kind {
                CollectionKind::Events => {
                    store.remove::<BulletinEvent>(id)?;
                }
                CollectionKind::Transactions => {
                    store.remove::<FinancialTransaction>(id)?;
                }
                CollectionKind::MediaChatEntries => {
                    store.remove::<LogEntry>(id)?;
                }
                CollectionKind::Projects => {
                    store.remove::<BuildingProject>(id)?;
                }
            }
            writeln!(out, "Removed {kind} #{id}")?;
            after_mutation(context, out)?;
        }
        Command::Summary => {
            let summary = context.store().summary();
            writeln!(
                out,
                "Income: {}   Expenses: {}   Balance: {}",
                money(summary.total_income),
                money(summary.total_expense),
                money(summary.balance)
            )?;
        }
        Command::Save => {
            context.flush()?;
            writeln!(out, "Saved to {}", context.data_file().display())?;
        }
        Command::Status => status(context, out)?,
        Command::Help => writeln!(out, "{HELP}")?,
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

/// Ask for a background save; a failure here is reported, not fatal.
fn after_mutation(context: &mut AppContext, out: &mut impl Write) -> io::Result<()> {
    if let Err(e) = context.request_flush() {
        log::warn!("Save after change failed: {e}");
        writeln!(out, "warning: change not saved yet: {e}")?;
    }
    Ok(())
}

fn add_record<T>(context: &mut AppContext, mut value: Value) -> Result<u64, CommandError>
where
    T: Record + DeserializeOwned,
{
    let object = value
        .as_object_mut()
        .ok_or(CommandError::Usage("add <collection> <json>"))?;
    // the store assigns the real id
    object.insert("id".to_string(), Value::from(0u64));
    if T::COLLECTION == CollectionKind::MediaChatEntries {
        object
            .entry("timestamp")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)));
    }

    let record: T = serde_json::from_value(value)?;
    Ok(context.store_mut().add(record)?)
}

fn update_record<T>(context: &mut AppContext, id: u64, patch: Value) -> Result<(), CommandError>
where
    T: Record + Serialize + DeserializeOwned,
{
    let current = context
        .store()
        .get::<T>(id)
        .ok_or(StoreError::NotFound {
            collection: T::COLLECTION,
            id,
        })?;

    let mut merged = serde_json::to_value(current)?;
    if let (Some(target), Value::Object(fields)) = (merged.as_object_mut(), patch) {
        merge(target, fields);
    }

    let record: T = serde_json::from_value(merged)?;
    Ok(context.store_mut().replace(id, record)?)
}

/// Shallow merge; `null` clears an optional field.
fn merge(target: &mut Map<String, Value>, fields: Map<String, Value>) {
    for (key, value) in fields {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn money(amount: f64) -> String {
    if amount < 0.0 {
        format!("-${:.2}", -amount)
    } else {
        format!("${amount:.2}")
    }
}

fn list(kind: CollectionKind, context: &AppContext, out: &mut impl Write) -> io::Result<()> {
    let store = context.store();
    if store.len(kind) == 0 {
        return writeln!(out, "(no {kind})");
    }

    match kind {
        CollectionKind::Events => {
            for event in store.list::<BulletinEvent>() {
                write!(out, "#{}  {}  {}", event.id, event.date, event.title)?;
                if !event.details.is_empty() {
                    write!(out, "  ({})", event.details)?;
                }
                writeln!(out)?;
            }
        }
        CollectionKind::Transactions => {
            for tx in store.list::<FinancialTransaction>() {
                write!(
                    out,
                    "#{}  {}  {:<7}  {:>10}  {}",
                    tx.id,
                    tx.date,
                    tx.kind.to_string(),
                    money(tx.amount),
                    tx.category
                )?;
                if !tx.note.is_empty() {
                    write!(out, "  ({})", tx.note)?;
                }
                writeln!(out)?;
            }
        }
        CollectionKind::MediaChatEntries => {
            for entry in store.list::<LogEntry>() {
                write!(
                    out,
                    "#{}  [{}]  {}: {}",
                    entry.id,
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.author,
                    entry.message
                )?;
                if let Some(link) = &entry.media_link {
                    write!(out, "  <{link}>")?;
                }
                writeln!(out)?;
            }
        }
        CollectionKind::Projects => {
            for project in store.list::<BuildingProject>() {
                write!(
                    out,
                    "#{}  {}  [{} {}%]  budget {}",
                    project.id,
                    project.name,
                    project.status,
                    project.progress_percent,
                    money(project.budget)
                )?;
                if !project.manager.is_empty() {
                    write!(out, "  manager: {}", project.manager)?;
                }
                writeln!(out)?;
            }
        }
    }
    Ok(())
}

fn status(context: &AppContext, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Data file: {}", context.data_file().display())?;
    match context.load_outcome() {
        Some(LoadOutcome::Recovered { detail }) => {
            writeln!(out, "Loaded:    recovered from unreadable file ({detail})")?
        }
        Some(LoadOutcome::FirstRun) => writeln!(out, "Loaded:    new file")?,
        Some(LoadOutcome::Loaded) | None => {}
    }
    let state = serde_json::to_value(context.state())
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    writeln!(out, "State:     {state}")?;
    for kind in CollectionKind::ALL {
        writeln!(out, "{:<18}{}", format!("{kind}:"), context.store().len(kind))?;
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

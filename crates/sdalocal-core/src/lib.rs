//! # sdalocal-core
//!
//! Local state store for sdaLocal, the congregation organizer.
//!
//! This crate is framework-agnostic and can be used by:
//! - the interactive shell (`sdalocal`)
//! - any UI that wants the same document and save behavior
//!
//! ## Key Concepts
//!
//! - **Document**: All persisted state (events, transactions, media/chat log, projects)
//! - **Store**: The single owner of the document; validates and numbers records
//! - **PersistenceController**: Loads on start, writes atomically, recovers from bad files
//! - **AppContext**: Wires the pieces together for one running application

pub mod context;
pub mod event_bus;
pub mod paths;
pub mod persistence;
pub mod store;

// Re-export commonly used types
pub use context::{AppContext, AppContextBuilder, ContextError};
pub use event_bus::{EventBus, StoreEvent};
pub use persistence::{
    BuildingProject, BulletinEvent, CollectionKind, Document, FinancialTransaction,
    LifecycleState, LoadOutcome, LogEntry, PersistError, ProjectStatus, Record, TransactionKind,
};
pub use store::{LedgerSummary, Store, StoreError};

//! Persistence layer for the sdaLocal document.
//!
//! # Overview
//!
//! - **Types** - The document and its four record collections
//! - **Schema** - Per-record normalization and validation
//! - **Codec** - Deterministic JSON encoding, tolerant decoding
//! - **Controller** - Load on start, atomic save, corruption recovery
//! - **Worker** - Serialized, coalescing background saves
//!
//! # File Location
//!
//! One JSON file, by default under the platform data directory:
//!
//! ```text
//! ~/.local/share/sdaLocal/          (or platform equivalent)
//! └── sdalocal_data.json
//! ```
//!
//! See [`crate::paths`] for the lookup rules and the override.
//!
//! # Design Principles
//!
//! ## Atomic Writes
//!
//! All saves use write-then-rename to prevent corruption:
//!
//! 1. Write to `sdalocal_data.json.tmp`
//! 2. Rename to `sdalocal_data.json` (atomic on the same filesystem)
//!
//! ## Never Overwrite What We Could Not Read
//!
//! A file that fails to load is left on disk, and set aside under a
//! `.corrupt-<timestamp>` name before the first save replaces it.
//!
//! # Usage
//!
//! ```ignore
//! use sdalocal_core::persistence::{PersistenceController, codec};
//! use sdalocal_core::store::Store;
//!
//! let mut controller = PersistenceController::new(path);
//! let mut store = Store::new(controller.start()?);
//! // ... mutate the store ...
//! controller.flush_store(&store)?;
//! controller.stop();
//! ```

pub mod atomic;
pub mod codec;
pub mod controller;
pub mod schema;
pub mod types;
pub mod worker;

pub use codec::{decode, encode, DecodeError, DecodeErrorKind, EncodeError};
pub use controller::{LifecycleState, LoadOutcome, PersistError, PersistenceController};
pub use schema::{DocumentError, Validate, ValidationError};
pub use types::*;

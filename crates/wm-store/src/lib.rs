//! Local record cache for water measurement field collection.
//!
//! This crate provides SQLite-based storage for sampling locations and
//! Secchi observations, so collection keeps working while the remote
//! datasets are unreachable.
//!
//! # Features
//!
//! - Typed record tables derived from the remote field layout
//! - Working-set/committed reconciliation status per row
//! - Mirroring of remote feature tables (idempotent upserts)
//! - Paging, filtered observation queries and CSV export
//!
//! # Example
//!
//! ```
//! use wm_store::{Page, Record, Store, Table};
//! use wm_types::Location;
//!
//! let store = Store::open_in_memory()?;
//! store.insert(&Record::Location(Location::new(7, 44.9, -93.2, "Pier A")))?;
//!
//! let first = store.page(Table::Locations, Page::new(25, 1))?;
//! assert_eq!(first.len(), 1);
//! # Ok::<(), wm_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
pub mod schema;
mod store;

pub use error::{Error, Result, codes};
pub use models::{CollectScope, MirrorSummary, Record, Table};
pub use queries::{ObservationQuery, Page};
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/watermeasurements/data.db`
/// - macOS: `~/Library/Application Support/watermeasurements/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\watermeasurements\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("watermeasurements")
        .join("data.db")
}

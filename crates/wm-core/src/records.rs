//! Async record store facade with structured results.
//!
//! [`RecordStore`] wraps the synchronous [`wm_store::Store`] for use from
//! async code. Every call runs on the blocking thread pool; writes first
//! take a per-table writer lock, so concurrent writers to the same table
//! are serialized while readers are never blocked by a pending write.
//!
//! Outcomes are reported as a [`StoreResult`] rather than an error: callers
//! inspect [`StoreResult::status`], and an empty page is
//! [`StoreStatus::SuccessNoRecords`], not a failure.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use wm_store::{CollectScope, MirrorSummary, Page, Record, Store, Table, codes};
use wm_types::{CollectionStatus, FeatureTable, Location, RecordId, RecordStatus};

use crate::error::{Error, Result};

/// Outcome class of a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StoreStatus {
    Success,
    /// A batch operation completed for some rows only.
    SuccessWithPartialRecords,
    /// The operation succeeded but matched no rows.
    SuccessNoRecords,
    Failure,
}

/// Structured result of a store operation.
///
/// `code` is zero on success, negative for application-level failures (see
/// [`wm_store::codes`]) and the SQLite result code otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreResult<T> {
    pub status: StoreStatus,
    pub code: i32,
    pub value: Option<T>,
    /// Failure description, if any.
    pub message: Option<String>,
}

impl<T> StoreResult<T> {
    pub fn success(value: T) -> Self {
        Self {
            status: StoreStatus::Success,
            code: codes::OK,
            value: Some(value),
            message: None,
        }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self {
            status: StoreStatus::Failure,
            code,
            value: None,
            message: Some(message.into()),
        }
    }

    fn from_error(err: &wm_store::Error) -> Self {
        Self::failure(err.code(), err.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.status != StoreStatus::Failure
    }

    /// Convert into a `Result`, treating only [`StoreStatus::Failure`] as an error.
    pub fn into_result(self) -> Result<Option<T>> {
        match self.status {
            StoreStatus::Failure => Err(Error::Storage {
                code: self.code,
                message: self.message.unwrap_or_default(),
            }),
            _ => Ok(self.value),
        }
    }

    /// Like [`into_result`](Self::into_result) but requires a value.
    pub fn into_value(self) -> Result<T> {
        let code = self.code;
        self.into_result()?.ok_or(Error::Storage {
            code,
            message: "store returned no value".into(),
        })
    }
}

impl<T> StoreResult<Vec<T>> {
    fn rows(rows: Vec<T>) -> Self {
        if rows.is_empty() {
            Self {
                status: StoreStatus::SuccessNoRecords,
                code: codes::OK,
                value: Some(rows),
                message: None,
            }
        } else {
            Self::success(rows)
        }
    }
}

/// Shared, cloneable async handle to the local record cache.
#[derive(Clone)]
pub struct RecordStore {
    store: Arc<Mutex<Store>>,
    writers: Arc<[AsyncMutex<()>; 2]>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Wrap an open store.
    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            writers: Arc::new([AsyncMutex::new(()), AsyncMutex::new(())]),
        }
    }

    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Store::open(path)?))
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Store::open_in_memory()?))
    }

    fn writer(&self, table: Table) -> &AsyncMutex<()> {
        match table {
            Table::Locations => &self.writers[0],
            Table::Observations => &self.writers[1],
        }
    }

    async fn blocking<T, F>(&self, f: F) -> std::result::Result<T, wm_store::Error>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> wm_store::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let guard = store.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
        .await
        .map_err(|e| wm_store::Error::Io(std::io::Error::other(e)))?
    }

    async fn read<T, F>(&self, operation: &'static str, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> wm_store::Result<T> + Send + 'static,
    {
        match self.blocking(f).await {
            Ok(v) => StoreResult::success(v),
            Err(e) => {
                warn!("{} failed: {}", operation, e);
                StoreResult::from_error(&e)
            }
        }
    }

    async fn write<T, F>(&self, table: Table, operation: &'static str, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> wm_store::Result<T> + Send + 'static,
    {
        let _writer = self.writer(table).lock().await;
        self.read(operation, f).await
    }

    /// Read one 1-based page of `table`.
    ///
    /// A page past the end is [`StoreStatus::SuccessNoRecords`] with an
    /// empty list.
    pub async fn get_page(
        &self,
        table: Table,
        page_size: u32,
        page_number: u32,
    ) -> StoreResult<Vec<Record>> {
        let page = Page::new(page_size, page_number);
        match self.read("get_page", move |s| s.page(table, page)).await {
            StoreResult {
                value: Some(rows), ..
            } => StoreResult::rows(rows),
            failed => failed,
        }
    }

    /// Insert a record as `WorkingSet`; returns its id.
    pub async fn insert(&self, record: Record) -> StoreResult<RecordId> {
        let table = record.table();
        self.write(table, "insert", move |s| s.insert(&record)).await
    }

    /// Insert several records under one writer lock.
    ///
    /// Rows that fail are skipped; the result is
    /// [`StoreStatus::SuccessWithPartialRecords`] with the ids that made it,
    /// or [`StoreStatus::Failure`] if none did.
    pub async fn insert_many(
        &self,
        table: Table,
        records: Vec<Record>,
    ) -> StoreResult<Vec<RecordId>> {
        if records.iter().any(|r| r.table() != table) {
            return StoreResult::failure(
                codes::INVALID_ARGUMENT,
                format!("batch contains records for another table than {table}"),
            );
        }
        let total = records.len();
        let result = self
            .write(table, "insert_many", move |s| {
                let mut ids = Vec::with_capacity(records.len());
                let mut last_error = None;
                for record in &records {
                    match s.insert(record) {
                        Ok(id) => ids.push(id),
                        Err(e) => {
                            warn!("Batch insert of {} {} failed: {}", table, record.id(), e);
                            last_error = Some(e);
                        }
                    }
                }
                Ok((ids, last_error))
            })
            .await;

        let (ids, last_error) = match result {
            StoreResult {
                value: Some(outcome),
                ..
            } => outcome,
            failed => return StoreResult::failure(failed.code, failed.message.unwrap_or_default()),
        };
        match last_error {
            None if ids.is_empty() => StoreResult::rows(ids),
            None => StoreResult::success(ids),
            Some(e) if ids.is_empty() => StoreResult::from_error(&e),
            Some(e) => {
                debug!("Inserted {} of {} rows into {}", ids.len(), total, table);
                StoreResult {
                    status: StoreStatus::SuccessWithPartialRecords,
                    code: e.code(),
                    value: Some(ids),
                    message: Some(e.to_string()),
                }
            }
        }
    }

    /// Overwrite an existing record.
    pub async fn update(&self, record: Record) -> StoreResult<()> {
        let table = record.table();
        self.write(table, "update", move |s| s.update(&record)).await
    }

    /// Delete a record.
    pub async fn delete(&self, table: Table, id: RecordId) -> StoreResult<()> {
        self.write(table, "delete", move |s| s.delete(table, id)).await
    }

    /// Change the collected state of one location or of all of them.
    ///
    /// Returns the number of rows changed.
    pub async fn set_collected_state(
        &self,
        table: Table,
        id: RecordId,
        state: CollectionStatus,
        scope: CollectScope,
    ) -> StoreResult<usize> {
        self.write(table, "set_collected_state", move |s| {
            s.set_collected_state(table, id, state, scope)
        })
        .await
    }

    /// Mark a record as acknowledged by the remote dataset.
    pub async fn commit(&self, table: Table, id: RecordId) -> StoreResult<()> {
        self.write(table, "commit", move |s| s.commit(table, id)).await
    }

    /// Commit a record under the id the remote dataset assigned to it.
    pub async fn commit_as(
        &self,
        table: Table,
        id: RecordId,
        assigned: RecordId,
    ) -> StoreResult<()> {
        self.write(table, "commit", move |s| s.commit_as(table, id, assigned))
            .await
    }

    /// Upsert a remote feature table as committed rows.
    pub async fn mirror(
        &self,
        table: Table,
        features: Arc<FeatureTable>,
    ) -> StoreResult<MirrorSummary> {
        self.write(table, "mirror", move |s| s.mirror(table, &features))
            .await
    }

    /// Every stored location.
    pub async fn locations(&self) -> StoreResult<Vec<Location>> {
        match self.read("locations", |s| s.list_locations()).await {
            StoreResult {
                value: Some(rows), ..
            } => StoreResult::rows(rows),
            failed => failed,
        }
    }

    /// Count rows, optionally by status.
    pub async fn count(&self, table: Table, status: Option<RecordStatus>) -> StoreResult<u64> {
        self.read("count", move |s| s.count(table, status)).await
    }

    /// Run an arbitrary read against the underlying store.
    pub async fn with_store<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> wm_store::Result<T> + Send + 'static,
    {
        self.read("with_store", f).await
    }
}

//! Query builders for paging and filtering stored records.
//!
//! # Example
//!
//! ```
//! use wm_store::{ObservationQuery, Page, Store};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! let query = ObservationQuery::new()
//!     .location(7)
//!     .since(yesterday)
//!     .limit(50);
//! let observations = store.query_observations(&query)?;
//! assert!(observations.is_empty());
//!
//! // Second page of ten.
//! let page = Page::new(10, 2);
//! assert_eq!(page.offset(), 10);
//! # Ok::<(), wm_store::Error>(())
//! ```

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use wm_types::{RecordId, RecordStatus, fields};

use crate::error::{Error, Result};

/// A 1-based page of fixed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Rows per page; must be non-zero.
    pub size: u32,
    /// Page number, starting at 1.
    pub number: u32,
}

impl Page {
    pub fn new(size: u32, number: u32) -> Self {
        Self { size, number }
    }

    /// Reject zero sizes and page zero.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::InvalidArgument("page size must be non-zero".into()));
        }
        if self.number == 0 {
            return Err(Error::InvalidArgument("page numbers start at 1".into()));
        }
        Ok(())
    }

    /// Row offset of the first record on this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.number.saturating_sub(1)) * u64::from(self.size)
    }
}

/// Fluent query builder for observations.
///
/// By default results are ordered by collection time, newest first.
#[derive(Debug, Default, Clone)]
pub struct ObservationQuery {
    /// Filter by location.
    pub location_id: Option<RecordId>,
    /// Filter by reconciliation status.
    pub status: Option<RecordStatus>,
    /// Observations collected at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Observations collected at or before this time.
    pub until: Option<OffsetDateTime>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub newest_first: bool,
}

impl ObservationQuery {
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    pub fn location(mut self, location_id: RecordId) -> Self {
        self.location_id = Some(location_id);
        self
    }

    pub fn status(mut self, status: RecordStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Chronological ordering.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    ///
    /// Timestamps are stored as RFC 3339 UTC text, which sorts lexically.
    pub(crate) fn build_where(&self) -> Result<(String, Vec<Box<dyn rusqlite::ToSql>>)> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(location_id) = self.location_id {
            conditions.push(format!("\"{}\" = ?", fields::LOCATION_ID));
            params.push(Box::new(location_id));
        }

        if let Some(status) = self.status {
            conditions.push("record_status = ?".to_string());
            params.push(Box::new(status.as_str()));
        }

        if let Some(since) = self.since {
            conditions.push(format!("\"{}\" >= ?", fields::DATE_COLLECTED));
            params.push(Box::new(format_time(since)?));
        }

        if let Some(until) = self.until {
            conditions.push(format!("\"{}\" <= ?", fields::DATE_COLLECTED));
            params.push(Box::new(format_time(until)?));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        Ok((where_clause, params))
    }

    /// Build the ORDER/LIMIT/OFFSET tail.
    pub(crate) fn build_tail(&self) -> String {
        let order = if self.newest_first { "DESC" } else { "ASC" };
        let mut sql = format!(
            " ORDER BY \"{}\" {order}, object_id {order}",
            fields::DATE_COLLECTED
        );

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        sql
    }
}

/// Format a timestamp the way it is stored.
pub(crate) fn format_time(t: OffsetDateTime) -> Result<String> {
    t.to_offset(time::UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|e| Error::InvalidTimestamp(e.to_string()))
}

/// Parse a stored timestamp.
pub(crate) fn parse_time(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).map_err(|e| Error::InvalidTimestamp(format!("{s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offsets() {
        assert_eq!(Page::new(10, 1).offset(), 0);
        assert_eq!(Page::new(10, 3).offset(), 20);
        assert!(Page::new(0, 1).validate().is_err());
        assert!(Page::new(5, 0).validate().is_err());
        assert!(Page::new(5, 1).validate().is_ok());
    }

    #[test]
    fn test_query_defaults() {
        let q = ObservationQuery::new();
        assert!(q.newest_first);
        assert!(q.location_id.is_none());
        let (where_clause, params) = q.build_where().unwrap();
        assert!(where_clause.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn test_query_where_clause() {
        let q = ObservationQuery::new()
            .location(7)
            .status(RecordStatus::WorkingSet)
            .since(OffsetDateTime::UNIX_EPOCH);
        let (where_clause, params) = q.build_where().unwrap();
        assert!(where_clause.contains("\"LocationId\" = ?"));
        assert!(where_clause.contains("record_status = ?"));
        assert!(where_clause.contains("\"DateCollected\" >= ?"));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_query_tail() {
        let tail = ObservationQuery::new().oldest_first().limit(5).offset(10).build_tail();
        assert!(tail.contains("ASC"));
        assert!(tail.ends_with("LIMIT 5 OFFSET 10"));

        let tail = ObservationQuery::new().offset(3).build_tail();
        assert!(tail.ends_with("LIMIT -1 OFFSET 3"));
    }

    #[test]
    fn test_time_format_roundtrip() {
        let t = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(parse_time(&format_time(t).unwrap()).unwrap(), t);
    }
}

//! Main store implementation.

use std::io::Write;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use wm_types::{
    CollectionStatus, FeatureTable, Geometry, Location, Observation, RecordId, RecordStatus,
    fields,
};

use crate::error::{Error, Result};
use crate::models::{CollectScope, MirrorSummary, Record, Table};
use crate::queries::{ObservationQuery, Page, format_time, parse_time};
use crate::schema::{self, ID_COLUMN, STATUS_COLUMN};

const LOCATION_COLUMNS: &str = r#"object_id, "LocationId", "Latitude", "Longitude", "LocationName", "LocationType", "Collected", record_status"#;

const OBSERVATION_COLUMNS: &str = r#"object_id, "GlobalID", "Secchi1", "Secchi2", "Secchi3", "Secchi", "DateCollected", "Latitude", "Longitude", "LocationId", record_status"#;

/// SQLite-based store for locations and observations.
///
/// The store is synchronous; the async record-store facade in wm-core
/// serializes writers per table and runs calls off the async runtime.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    // === Generic record operations ===

    /// Insert a record into its table. New rows are always `WorkingSet`.
    pub fn insert(&self, record: &Record) -> Result<RecordId> {
        match record {
            Record::Location(l) => self.insert_location(l),
            Record::Observation(o) => self.insert_observation(o),
        }
    }

    /// Overwrite an existing record.
    pub fn update(&self, record: &Record) -> Result<()> {
        match record {
            Record::Location(l) => self.update_location(l),
            Record::Observation(o) => self.update_observation(o),
        }
    }

    /// Delete a record by id.
    pub fn delete(&self, table: Table, id: RecordId) -> Result<()> {
        let changed = self.conn.execute(
            &format!("DELETE FROM {} WHERE {ID_COLUMN} = ?", table.name()),
            [id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound { table, id });
        }
        debug!("Deleted {} from {}", id, table);
        Ok(())
    }

    /// Read one page of a table ordered by id.
    ///
    /// A page past the end returns an empty vector.
    pub fn page(&self, table: Table, page: Page) -> Result<Vec<Record>> {
        page.validate()?;
        let limit = i64::from(page.size);
        let offset = i64::try_from(page.offset())
            .map_err(|_| Error::InvalidArgument("page offset out of range".into()))?;

        match table {
            Table::Locations => {
                let sql = format!(
                    "SELECT {LOCATION_COLUMNS} FROM locations ORDER BY object_id LIMIT ?1 OFFSET ?2"
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([limit, offset], location_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .map(|r| r.map(Record::Location))
                    .collect()
            }
            Table::Observations => {
                let sql = format!(
                    "SELECT {OBSERVATION_COLUMNS} FROM observations ORDER BY object_id LIMIT ?1 OFFSET ?2"
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([limit, offset], observation_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .map(|r| r.map(Record::Observation))
                    .collect()
            }
        }
    }

    /// Set the reconciliation status of a record.
    pub fn set_status(&self, table: Table, id: RecordId, status: RecordStatus) -> Result<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET {STATUS_COLUMN} = ?1, updated_at = ?2 WHERE {ID_COLUMN} = ?3",
                table.name()
            ),
            rusqlite::params![status.as_str(), now(), id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound { table, id });
        }
        debug!("{} {} is now {}", table, id, status);
        Ok(())
    }

    /// Mark a working-set record as acknowledged by the remote dataset.
    pub fn commit(&self, table: Table, id: RecordId) -> Result<()> {
        self.set_status(table, id, RecordStatus::Committed)
    }

    /// Commit a record under the id the remote dataset assigned to it.
    ///
    /// The local row is renumbered to `assigned`. If a mirror already
    /// brought in the remote copy under that id, the local row is dropped
    /// instead.
    pub fn commit_as(&self, table: Table, id: RecordId, assigned: RecordId) -> Result<()> {
        if id == assigned {
            return self.commit(table, id);
        }

        let tx = self.conn.unchecked_transaction()?;
        let exists: bool = self.conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE {ID_COLUMN} = ?)",
                table.name()
            ),
            [assigned],
            |row| row.get(0),
        )?;

        let changed = if exists {
            self.conn.execute(
                &format!("DELETE FROM {} WHERE {ID_COLUMN} = ?", table.name()),
                [id],
            )?
        } else {
            let renumber = match table {
                Table::Locations => r#"UPDATE locations SET object_id = ?1, "LocationId" = ?1,
                    record_status = ?2, updated_at = ?3 WHERE object_id = ?4"#,
                Table::Observations => r#"UPDATE observations SET object_id = ?1,
                    record_status = ?2, updated_at = ?3 WHERE object_id = ?4"#,
            };
            self.conn.execute(
                renumber,
                rusqlite::params![assigned, RecordStatus::Committed.as_str(), now(), id],
            )?
        };
        if changed == 0 {
            return Err(Error::NotFound { table, id });
        }
        tx.commit()?;

        debug!("{} {} committed as {}", table, id, assigned);
        Ok(())
    }

    /// Change the collected state of one or all locations.
    ///
    /// Returns the number of rows changed.
    pub fn set_collected_state(
        &self,
        table: Table,
        id: RecordId,
        state: CollectionStatus,
        scope: CollectScope,
    ) -> Result<usize> {
        if table != Table::Locations {
            return Err(Error::Unsupported {
                operation: "set_collected_state",
                table,
            });
        }

        let changed = match scope {
            CollectScope::Single => {
                let changed = self.conn.execute(
                    r#"UPDATE locations SET "Collected" = ?1, updated_at = ?2 WHERE object_id = ?3"#,
                    rusqlite::params![state.as_str(), now(), id],
                )?;
                if changed == 0 {
                    return Err(Error::NotFound { table, id });
                }
                changed
            }
            CollectScope::All => self.conn.execute(
                r#"UPDATE locations SET "Collected" = ?1, updated_at = ?2"#,
                rusqlite::params![state.as_str(), now()],
            )?,
        };

        debug!("Set {} location(s) to {}", changed, state);
        Ok(changed)
    }

    /// Count rows in a table, optionally filtered by status.
    pub fn count(&self, table: Table, status: Option<RecordStatus>) -> Result<u64> {
        let count: i64 = match status {
            Some(s) => self.conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE {STATUS_COLUMN} = ?",
                    table.name()
                ),
                [s.as_str()],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", table.name()),
                [],
                |row| row.get(0),
            )?,
        };
        Ok(count as u64)
    }

    /// Upsert every convertible feature of a remote table as a committed row.
    ///
    /// Committed rows are refreshed from the remote copy. Working-set rows
    /// with a matching id are left as they are.
    /// A remote observation carrying the global id of a pending local one
    /// replaces it, since the remote has already stored that edit.
    pub fn mirror(&self, table: Table, features: &FeatureTable) -> Result<MirrorSummary> {
        let mut summary = MirrorSummary::default();
        let tx = self.conn.unchecked_transaction()?;

        for feature in &features.features {
            let converted = match table {
                Table::Locations => Location::from_feature(feature).map(Record::Location),
                Table::Observations => Observation::from_feature(feature).map(Record::Observation),
            };
            match converted {
                Ok(record) => {
                    if let Record::Observation(o) = &record {
                        self.drop_pending_duplicate(o)?;
                    }
                    if self.upsert(&record, RecordStatus::Committed)? {
                        summary.upserted += 1;
                    } else {
                        debug!("Keeping pending {} {}", table, record.id());
                        summary.kept += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        "Skipping feature {} of {}: {}",
                        feature.object_id, features.name, e
                    );
                    summary.skipped += 1;
                }
            }
        }

        tx.commit()?;
        info!(
            "Mirrored {} into {}: {} upserted, {} skipped, {} pending kept",
            features.name, table, summary.upserted, summary.skipped, summary.kept
        );
        Ok(summary)
    }
}

// Location operations
impl Store {
    /// Insert a new location.
    pub fn insert_location(&self, location: &Location) -> Result<RecordId> {
        if location.id < 0 {
            return Err(Error::InvalidArgument(format!(
                "negative location id {}",
                location.id
            )));
        }
        self.conn.execute(
            r#"INSERT INTO locations (object_id, "LocationId", "Latitude", "Longitude",
               "LocationName", "LocationType", "Collected", "Shape", record_status, updated_at)
               VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            rusqlite::params![
                location.id,
                location.latitude,
                location.longitude,
                location.name,
                location.kind.as_str(),
                location.collected.as_str(),
                Geometry::Point(location.point()).to_blob(),
                RecordStatus::WorkingSet.as_str(),
                now(),
            ],
        )?;
        debug!("Inserted location {} ({})", location.id, location.name);
        Ok(location.id)
    }

    /// Overwrite a location's attributes (status is left unchanged).
    pub fn update_location(&self, location: &Location) -> Result<()> {
        let changed = self.conn.execute(
            r#"UPDATE locations SET "Latitude" = ?2, "Longitude" = ?3, "LocationName" = ?4,
               "LocationType" = ?5, "Collected" = ?6, "Shape" = ?7, updated_at = ?8
               WHERE object_id = ?1"#,
            rusqlite::params![
                location.id,
                location.latitude,
                location.longitude,
                location.name,
                location.kind.as_str(),
                location.collected.as_str(),
                Geometry::Point(location.point()).to_blob(),
                now(),
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound {
                table: Table::Locations,
                id: location.id,
            });
        }
        Ok(())
    }

    /// Get a location by id.
    pub fn get_location(&self, id: RecordId) -> Result<Option<Location>> {
        let sql = format!("SELECT {LOCATION_COLUMNS} FROM locations WHERE object_id = ?");
        let row = self
            .conn
            .query_row(&sql, [id], location_from_row)
            .optional()?;
        row.transpose()
    }

    /// All locations ordered by id.
    pub fn list_locations(&self) -> Result<Vec<Location>> {
        let sql = format!("SELECT {LOCATION_COLUMNS} FROM locations ORDER BY object_id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], location_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }
}

// Observation operations
impl Store {
    /// Insert a new observation.
    ///
    /// An id of zero takes the next local id. Local ids count down from -1
    /// so they never collide with ids handed out by the remote dataset.
    pub fn insert_observation(&self, observation: &Observation) -> Result<RecordId> {
        let id = match observation.id {
            0 => self.next_local_id(Table::Observations)?,
            id => id,
        };
        let m = |i: usize| observation.measurements.get(i).copied();

        self.conn.execute(
            r#"INSERT INTO observations (object_id, "GlobalID", "Secchi1", "Secchi2", "Secchi3",
               "Secchi", "DateCollected", "Latitude", "Longitude", "LocationId", "Shape",
               record_status, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            rusqlite::params![
                id,
                observation.global_id.hyphenated().to_string(),
                m(0),
                m(1),
                m(2),
                observation.secchi,
                format_time(observation.collected_at)?,
                observation.latitude,
                observation.longitude,
                observation.location_id,
                Geometry::Point(observation.point()).to_blob(),
                RecordStatus::WorkingSet.as_str(),
                now(),
            ],
        )?;

        debug!(
            "Inserted observation {} for location {}",
            id, observation.location_id
        );
        Ok(id)
    }

    /// Overwrite an observation's attributes (status is left unchanged).
    pub fn update_observation(&self, observation: &Observation) -> Result<()> {
        let m = |i: usize| observation.measurements.get(i).copied();
        let changed = self.conn.execute(
            r#"UPDATE observations SET "GlobalID" = ?2, "Secchi1" = ?3, "Secchi2" = ?4,
               "Secchi3" = ?5, "Secchi" = ?6, "DateCollected" = ?7, "Latitude" = ?8,
               "Longitude" = ?9, "LocationId" = ?10, "Shape" = ?11, updated_at = ?12
               WHERE object_id = ?1"#,
            rusqlite::params![
                observation.id,
                observation.global_id.hyphenated().to_string(),
                m(0),
                m(1),
                m(2),
                observation.secchi,
                format_time(observation.collected_at)?,
                observation.latitude,
                observation.longitude,
                observation.location_id,
                Geometry::Point(observation.point()).to_blob(),
                now(),
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound {
                table: Table::Observations,
                id: observation.id,
            });
        }
        Ok(())
    }

    /// Get an observation by id.
    pub fn get_observation(&self, id: RecordId) -> Result<Option<Observation>> {
        let sql = format!("SELECT {OBSERVATION_COLUMNS} FROM observations WHERE object_id = ?");
        let row = self
            .conn
            .query_row(&sql, [id], observation_from_row)
            .optional()?;
        row.transpose()
    }

    /// Query observations with filters.
    pub fn query_observations(&self, query: &ObservationQuery) -> Result<Vec<Observation>> {
        let (where_clause, params) = query.build_where()?;
        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations {where_clause}{}",
            query.build_tail()
        );

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), observation_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    /// Write observations matching `query` as CSV.
    ///
    /// Returns the number of rows written.
    pub fn export_observations_csv<W: Write>(
        &self,
        query: &ObservationQuery,
        writer: W,
    ) -> Result<usize> {
        let observations = self.query_observations(query)?;
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record([
            "object_id",
            fields::LOCATION_ID,
            fields::DATE_COLLECTED,
            fields::SECCHI_1,
            fields::SECCHI_2,
            fields::SECCHI_3,
            fields::SECCHI,
            fields::LATITUDE,
            fields::LONGITUDE,
            fields::GLOBAL_ID,
            STATUS_COLUMN,
        ])?;

        for o in &observations {
            let m = |i: usize| {
                o.measurements
                    .get(i)
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            };
            csv.write_record([
                o.id.to_string(),
                o.location_id.to_string(),
                format_time(o.collected_at)?,
                m(0),
                m(1),
                m(2),
                o.secchi.to_string(),
                o.latitude.to_string(),
                o.longitude.to_string(),
                o.global_id.to_string(),
                o.status.to_string(),
            ])?;
        }
        csv.flush()?;

        Ok(observations.len())
    }
}

impl Store {
    /// Next id in the local range, below every id already in `table`.
    fn next_local_id(&self, table: Table) -> Result<RecordId> {
        let lowest: RecordId = self.conn.query_row(
            &format!(
                "SELECT MIN(COALESCE(MIN({ID_COLUMN}), 0), 0) FROM {}",
                table.name()
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(lowest - 1)
    }

    /// Remove a pending local observation that the remote now holds under
    /// another id.
    fn drop_pending_duplicate(&self, remote: &Observation) -> Result<()> {
        let dropped = self.conn.execute(
            r#"DELETE FROM observations WHERE "GlobalID" = ?1 AND object_id <> ?2
               AND record_status = ?3"#,
            rusqlite::params![
                remote.global_id.hyphenated().to_string(),
                remote.id,
                RecordStatus::WorkingSet.as_str(),
            ],
        )?;
        if dropped > 0 {
            debug!("Pending observation {} arrived as {}", remote.global_id, remote.id);
        }
        Ok(())
    }

    /// Insert or refresh a row. Returns false when a pending row with the
    /// same id was left as it is.
    fn upsert(&self, record: &Record, status: RecordStatus) -> Result<bool> {
        let changed = match record {
            Record::Location(l) => {
                self.conn.execute(
                    r#"INSERT INTO locations (object_id, "LocationId", "Latitude", "Longitude",
                       "LocationName", "LocationType", "Collected", "Shape", record_status, updated_at)
                       VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                       ON CONFLICT(object_id) DO UPDATE SET
                          "Latitude" = ?2, "Longitude" = ?3, "LocationName" = ?4,
                          "LocationType" = ?5, "Collected" = ?6, "Shape" = ?7,
                          record_status = ?8, updated_at = ?9
                       WHERE locations.record_status <> 'WorkingSet'"#,
                    rusqlite::params![
                        l.id,
                        l.latitude,
                        l.longitude,
                        l.name,
                        l.kind.as_str(),
                        l.collected.as_str(),
                        Geometry::Point(l.point()).to_blob(),
                        status.as_str(),
                        now(),
                    ],
                )?
            }
            Record::Observation(o) => {
                let m = |i: usize| o.measurements.get(i).copied();
                self.conn.execute(
                    r#"INSERT INTO observations (object_id, "GlobalID", "Secchi1", "Secchi2", "Secchi3",
                       "Secchi", "DateCollected", "Latitude", "Longitude", "LocationId", "Shape",
                       record_status, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                       ON CONFLICT(object_id) DO UPDATE SET
                          "GlobalID" = ?2, "Secchi1" = ?3, "Secchi2" = ?4, "Secchi3" = ?5,
                          "Secchi" = ?6, "DateCollected" = ?7, "Latitude" = ?8,
                          "Longitude" = ?9, "LocationId" = ?10, "Shape" = ?11,
                          record_status = ?12, updated_at = ?13
                       WHERE observations.record_status <> 'WorkingSet'"#,
                    rusqlite::params![
                        o.id,
                        o.global_id.hyphenated().to_string(),
                        m(0),
                        m(1),
                        m(2),
                        o.secchi,
                        format_time(o.collected_at)?,
                        o.latitude,
                        o.longitude,
                        o.location_id,
                        Geometry::Point(o.point()).to_blob(),
                        status.as_str(),
                        now(),
                    ],
                )?
            }
        };
        Ok(changed > 0)
    }
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Row mapper: SQL failures go to rusqlite, conversion failures are
/// carried as an inner `Result` so they surface as [`Error::Parse`].
fn location_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Location>> {
    let kind: String = row.get(5)?;
    let collected: String = row.get(6)?;
    let status: String = row.get(7)?;
    let id: i64 = row.get(0)?;
    let latitude: f64 = row.get(2)?;
    let longitude: f64 = row.get(3)?;
    let name: String = row.get(4)?;

    let build = || -> Result<Location> {
        Ok(Location {
            id,
            latitude,
            longitude,
            name,
            kind: kind.parse()?,
            collected: collected.parse()?,
            status: status.parse()?,
        })
    };
    Ok(build())
}

fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Observation>> {
    let id: i64 = row.get(0)?;
    let global_id: String = row.get(1)?;
    let measurements: Vec<f64> = [row.get::<_, Option<f64>>(2)?, row.get(3)?, row.get(4)?]
        .into_iter()
        .flatten()
        .collect();
    let secchi: f64 = row.get(5)?;
    let collected_at: String = row.get(6)?;
    let latitude: f64 = row.get(7)?;
    let longitude: f64 = row.get(8)?;
    let location_id: i64 = row.get(9)?;
    let status: String = row.get(10)?;

    let build = || -> Result<Observation> {
        Ok(Observation {
            id,
            global_id: uuid::Uuid::parse_str(&global_id)
                .map_err(|e| Error::InvalidArgument(format!("GlobalID {global_id}: {e}")))?,
            measurements,
            secchi,
            collected_at: parse_time(&collected_at)?,
            latitude,
            longitude,
            location_id,
            status: status.parse()?,
        })
    };
    Ok(build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wm_types::{Feature, LocationKind, Point};

    fn pier() -> Location {
        Location::new(7, 44.9, -93.2, "Pier A")
    }

    fn observation(location_id: RecordId) -> Observation {
        Observation::new(
            location_id,
            &[4.0, 5.0, 6.0],
            Point::new(44.9, -93.2),
            OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.count(Table::Locations, None).unwrap(), 0);
        assert_eq!(store.count(Table::Observations, None).unwrap(), 0);
    }

    #[test]
    fn test_open_on_disk_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");
        let store = Store::open(&path).unwrap();
        store.insert_location(&pier()).unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.count(Table::Locations, None).unwrap(), 1);
    }

    #[test]
    fn test_insert_and_page_location() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert(&Record::Location(pier())).unwrap();
        assert_eq!(id, 7);

        let page = store.page(Table::Locations, Page::new(10, 1)).unwrap();
        assert_eq!(page.len(), 1);
        let loc = page[0].as_location().unwrap();
        assert_eq!(loc.name, "Pier A");
        assert_eq!(loc.status, RecordStatus::WorkingSet);
        assert_eq!(loc.point(), Point::new(44.9, -93.2));
    }

    #[test]
    fn test_page_beyond_range_is_empty() {
        let store = Store::open_in_memory().unwrap();
        store.insert_location(&pier()).unwrap();
        assert!(store.page(Table::Locations, Page::new(10, 2)).unwrap().is_empty());
        assert!(store.page(Table::Observations, Page::new(10, 1)).unwrap().is_empty());
        assert!(matches!(
            store.page(Table::Locations, Page::new(0, 1)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_paging_splits_rows() {
        let store = Store::open_in_memory().unwrap();
        for i in 1..=5 {
            store
                .insert_location(&Location::new(i, 0.0, 0.0, format!("L{i}")))
                .unwrap();
        }
        let ids = |n| -> Vec<RecordId> {
            store
                .page(Table::Locations, Page::new(2, n))
                .unwrap()
                .iter()
                .map(Record::id)
                .collect()
        };
        assert_eq!(ids(1), vec![1, 2]);
        assert_eq!(ids(2), vec![3, 4]);
        assert_eq!(ids(3), vec![5]);
        assert!(ids(4).is_empty());
    }

    #[test]
    fn test_duplicate_location_is_database_error() {
        let store = Store::open_in_memory().unwrap();
        store.insert_location(&pier()).unwrap();
        let err = store.insert_location(&pier()).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(err.code() >= 0);
    }

    #[test]
    fn test_insert_observation_assigns_local_id() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert_observation(&observation(7)).unwrap();
        let b = store.insert_observation(&observation(7)).unwrap();
        assert_eq!(a, -1);
        assert_eq!(b, -2);

        let stored = store.get_observation(a).unwrap().unwrap();
        assert_eq!(stored.measurements, vec![4.0, 5.0, 6.0]);
        assert_eq!(stored.secchi, 5.0);
        assert_eq!(stored.location_id, 7);
        assert_eq!(stored.status, RecordStatus::WorkingSet);

        let mut explicit = observation(7);
        explicit.id = 40;
        assert_eq!(store.insert_observation(&explicit).unwrap(), 40);
        assert_eq!(store.insert_observation(&observation(7)).unwrap(), -3);
    }

    #[test]
    fn test_commit_flips_status() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert_observation(&observation(7)).unwrap();
        store.commit(Table::Observations, id).unwrap();
        assert_eq!(
            store.get_observation(id).unwrap().unwrap().status,
            RecordStatus::Committed
        );
        assert_eq!(
            store.count(Table::Observations, Some(RecordStatus::Committed)).unwrap(),
            1
        );
        assert!(store.commit(Table::Observations, 999).unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_and_delete() {
        let store = Store::open_in_memory().unwrap();
        store.insert_location(&pier()).unwrap();

        let mut moved = pier().with_kind(LocationKind::OneOff);
        moved.name = "Pier B".into();
        store.update(&Record::Location(moved)).unwrap();
        let loc = store.get_location(7).unwrap().unwrap();
        assert_eq!(loc.name, "Pier B");
        assert_eq!(loc.kind, LocationKind::OneOff);

        store.delete(Table::Locations, 7).unwrap();
        assert!(store.get_location(7).unwrap().is_none());
        assert!(matches!(
            store.delete(Table::Locations, 7),
            Err(Error::NotFound { id: 7, .. })
        ));
        assert!(store.update_location(&pier()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_collected_state_scopes() {
        let store = Store::open_in_memory().unwrap();
        for i in 1..=3 {
            store
                .insert_location(&Location::new(i, 0.0, 0.0, format!("L{i}")))
                .unwrap();
        }

        let n = store
            .set_collected_state(
                Table::Locations,
                2,
                CollectionStatus::Collected,
                CollectScope::Single,
            )
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            store.get_location(2).unwrap().unwrap().collected,
            CollectionStatus::Collected
        );
        assert_eq!(
            store.get_location(1).unwrap().unwrap().collected,
            CollectionStatus::NotCollected
        );

        let n = store
            .set_collected_state(
                Table::Locations,
                0,
                CollectionStatus::NotCollected,
                CollectScope::All,
            )
            .unwrap();
        assert_eq!(n, 3);

        assert!(matches!(
            store.set_collected_state(
                Table::Observations,
                1,
                CollectionStatus::Collected,
                CollectScope::Single
            ),
            Err(Error::Unsupported { .. })
        ));
    }

    #[test]
    fn test_mirror_upserts_committed_and_skips_invalid() {
        let store = Store::open_in_memory().unwrap();
        store.insert_location(&pier()).unwrap();
        store.commit(Table::Locations, 7).unwrap();

        let mut table = FeatureTable::new("secchi_locations", Location::fields());
        let mut renamed = pier();
        renamed.name = "Pier A (remote)".into();
        table.features.push(renamed.to_feature());
        table
            .features
            .push(Location::new(8, 45.0, -93.0, "Dock").to_feature());
        table.features.push(Feature::new(9, None));

        let summary = store.mirror(Table::Locations, &table).unwrap();
        assert_eq!(
            summary,
            MirrorSummary {
                upserted: 2,
                skipped: 1,
                kept: 0
            }
        );

        let loc = store.get_location(7).unwrap().unwrap();
        assert_eq!(loc.name, "Pier A (remote)");
        assert_eq!(loc.status, RecordStatus::Committed);

        // Mirroring again is idempotent.
        store.mirror(Table::Locations, &table).unwrap();
        assert_eq!(store.count(Table::Locations, None).unwrap(), 2);
    }

    #[test]
    fn test_mirror_keeps_pending_rows() {
        let store = Store::open_in_memory().unwrap();
        store.insert_location(&pier()).unwrap();

        let mut table = FeatureTable::new("secchi_locations", Location::fields());
        let mut renamed = pier();
        renamed.name = "Pier A (remote)".into();
        table.features.push(renamed.to_feature());

        let summary = store.mirror(Table::Locations, &table).unwrap();
        assert_eq!(summary.kept, 1);
        let loc = store.get_location(7).unwrap().unwrap();
        assert_eq!(loc.name, "Pier A");
        assert_eq!(loc.status, RecordStatus::WorkingSet);
    }

    fn remote_observation(id: RecordId, location_id: RecordId, depth: f64) -> Feature {
        let mut obs = Observation::new(
            location_id,
            &[depth],
            Point::new(45.0, -93.0),
            OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        )
        .unwrap();
        obs.id = id;
        obs.to_feature()
    }

    #[test]
    fn test_remirror_never_replaces_local_observation() {
        let store = Store::open_in_memory().unwrap();
        let mut table = FeatureTable::new("secchi_observations", Observation::fields());
        table.features.push(remote_observation(1, 99, 9.0));
        store.mirror(Table::Observations, &table).unwrap();

        let local = store.insert_observation(&observation(7)).unwrap();
        assert!(local < 0);

        // Another device's observation arrives under the next provider id.
        table.features.push(remote_observation(2, 98, 8.0));
        let summary = store.mirror(Table::Observations, &table).unwrap();
        assert_eq!(summary.kept, 0);

        let stored = store.get_observation(local).unwrap().unwrap();
        assert_eq!(stored.location_id, 7);
        assert_eq!(stored.measurements, vec![4.0, 5.0, 6.0]);
        assert_eq!(stored.status, RecordStatus::WorkingSet);
        assert_eq!(store.count(Table::Observations, None).unwrap(), 3);
    }

    #[test]
    fn test_commit_as_renumbers_local_row() {
        let store = Store::open_in_memory().unwrap();
        let local = store.insert_observation(&observation(7)).unwrap();

        store.commit_as(Table::Observations, local, 12).unwrap();
        assert!(store.get_observation(local).unwrap().is_none());
        let stored = store.get_observation(12).unwrap().unwrap();
        assert_eq!(stored.location_id, 7);
        assert_eq!(stored.status, RecordStatus::Committed);

        // The next local id is still below every stored id.
        assert_eq!(store.insert_observation(&observation(7)).unwrap(), -1);
        assert!(
            store
                .commit_as(Table::Observations, -50, 13)
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_commit_as_after_remote_copy_was_mirrored() {
        let store = Store::open_in_memory().unwrap();
        let pending = observation(7);
        let local = store.insert_observation(&pending).unwrap();

        // The remote copy of the same edit shows up before the ack.
        let mut remote = pending.clone();
        remote.id = 30;
        let mut table = FeatureTable::new("secchi_observations", Observation::fields());
        table.features.push(remote.to_feature());
        store.mirror(Table::Observations, &table).unwrap();
        assert!(store.get_observation(local).unwrap().is_none());
        assert_eq!(store.count(Table::Observations, None).unwrap(), 1);

        // A second pending row is renumbered onto an id the mirror filled.
        let other = store.insert_observation(&observation(8)).unwrap();
        store.commit_as(Table::Observations, other, 30).unwrap();
        assert_eq!(store.count(Table::Observations, None).unwrap(), 1);
        assert_eq!(
            store.get_observation(30).unwrap().unwrap().status,
            RecordStatus::Committed
        );
    }

    #[test]
    fn test_query_observations_filters() {
        let store = Store::open_in_memory().unwrap();
        store.insert_observation(&observation(7)).unwrap();
        store.insert_observation(&observation(8)).unwrap();

        let q = ObservationQuery::new().location(7);
        assert_eq!(store.query_observations(&q).unwrap().len(), 1);

        let q = ObservationQuery::new().status(RecordStatus::Committed);
        assert!(store.query_observations(&q).unwrap().is_empty());

        let q = ObservationQuery::new().limit(1);
        assert_eq!(store.query_observations(&q).unwrap().len(), 1);
    }

    #[test]
    fn test_export_csv() {
        let store = Store::open_in_memory().unwrap();
        store.insert_observation(&observation(7)).unwrap();

        let mut out = Vec::new();
        let n = store
            .export_observations_csv(&ObservationQuery::new(), &mut out)
            .unwrap();
        assert_eq!(n, 1);
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("object_id,LocationId"));
        assert!(lines.next().unwrap().contains(",7,2023-11-14T22:13:20Z,4,5,6,5,"));
    }
}

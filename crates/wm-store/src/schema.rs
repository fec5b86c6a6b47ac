//! Database schema and migrations.
//!
//! Record tables are declared from their field lists rather than written
//! out by hand, so the column storage classes always follow the field type
//! conversion table in [`wm_types::FieldType::sql_type`].

use rusqlite::Connection;

use wm_types::FieldDef;

use crate::error::Result;
use crate::models::Table;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Primary key column shared by every record table.
pub const ID_COLUMN: &str = "object_id";
/// Encoded geometry column.
pub const SHAPE_COLUMN: &str = "Shape";
/// Reconciliation status column.
pub const STATUS_COLUMN: &str = "record_status";

/// Create the tables on a fresh database, or migrate an older one.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = read_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        write_version(conn, SCHEMA_VERSION)?;
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    }

    Ok(())
}

/// Stored schema version; zero for a database that has never been set up.
fn read_version(conn: &Connection) -> Result<i32> {
    let tracked: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
        [],
        |row| row.get(0),
    )?;
    if tracked == 0 {
        return Ok(0);
    }
    Ok(conn.query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| row.get(0))?)
}

fn write_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Build the `CREATE TABLE` statement for a record table.
///
/// ```
/// use wm_types::{FieldDef, FieldType};
///
/// let sql = wm_store::schema::create_table_sql(
///     "t",
///     &[FieldDef::new("Depth", FieldType::Float32), FieldDef::new("When", FieldType::Date)],
///     false,
/// );
/// assert!(sql.contains("\"Depth\" REAL"));
/// assert!(sql.contains("\"When\" TEXT"));
/// ```
pub fn create_table_sql(name: &str, fields: &[FieldDef], autoincrement: bool) -> String {
    let mut columns = vec![format!(
        "{ID_COLUMN} INTEGER PRIMARY KEY{}",
        if autoincrement { " AUTOINCREMENT" } else { "" }
    )];
    columns.extend(
        fields
            .iter()
            .map(|f| format!("\"{}\" {}", f.name, f.field_type.sql_type())),
    );
    columns.push(format!("\"{SHAPE_COLUMN}\" BLOB"));
    columns.push(format!(
        "{STATUS_COLUMN} TEXT NOT NULL DEFAULT 'WorkingSet'"
    ));
    columns.push("updated_at INTEGER NOT NULL".to_string());

    format!(
        "CREATE TABLE IF NOT EXISTS {name} (\n    {}\n)",
        columns.join(",\n    ")
    )
}

/// Version 1: the version table, both record tables and their indexes.
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );
        "#,
    )?;

    for table in Table::ALL {
        let sql = create_table_sql(
            table.name(),
            &table.fields(),
            table == Table::Observations,
        );
        conn.execute(&sql, [])?;
    }

    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_observations_location
            ON observations("LocationId", "DateCollected");
        CREATE INDEX IF NOT EXISTS idx_locations_status
            ON locations(record_status);
        "#,
    )?;

    Ok(())
}

/// Bring a database written by an older release up to [`SCHEMA_VERSION`].
///
/// Version 1 is the first layout, so there are no steps yet.
fn migrate(conn: &Connection, from: i32) -> Result<()> {
    tracing::info!("Migrating record cache schema {} -> {}", from, SCHEMA_VERSION);
    write_version(conn, SCHEMA_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_types(conn: &Connection, table: &str) -> Vec<(String, String)> {
        conn.prepare(&format!("PRAGMA table_info({table})"))
            .unwrap()
            .query_map([], |row| Ok((row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_initialize_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"locations".to_string()));
        assert!(tables.contains(&"observations".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_column_types_follow_conversion_table() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let cols = column_types(&conn, "observations");
        let ty = |name: &str| {
            cols.iter()
                .find(|(n, _)| n == name)
                .map(|(_, t)| t.clone())
                .unwrap()
        };
        assert_eq!(ty("object_id"), "INTEGER");
        assert_eq!(ty("LocationId"), "INTEGER");
        assert_eq!(ty("Secchi"), "REAL");
        assert_eq!(ty("DateCollected"), "TEXT");
        assert_eq!(ty("GlobalID"), "TEXT");
        assert_eq!(ty("Shape"), "BLOB");
    }

    #[test]
    fn test_schema_version_tracking() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_version(&conn).unwrap(), 0);
        initialize(&conn).unwrap();
        assert_eq!(read_version(&conn).unwrap(), SCHEMA_VERSION);
        // Idempotent.
        initialize(&conn).unwrap();
        assert_eq!(read_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}

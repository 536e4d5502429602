use crate::app::ports::SinkPort;
use crate::error::{EtlError, Result};
use crate::pipeline::load::{quote_identifier, Dialect, TableSchema};
use crate::types::{Dataset, Value, WriteMode, TIMESTAMP_FORMAT};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// SQLite file sink. Every call opens its own connection, which is closed when
/// it drops at the end of the call, on success and error paths alike.
#[derive(Debug, Clone)]
pub struct SqliteSink {
    path: PathBuf,
}

impl SqliteSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self, table: &str) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| EtlError::Write {
                    table: table.to_string(),
                    message: format!("failed to create '{}': {e}", parent.display()),
                })?;
            }
        }
        Connection::open(&self.path).map_err(|e| EtlError::Write {
            table: table.to_string(),
            message: format!("failed to open '{}': {e}", self.path.display()),
        })
    }

    /// Row count of `table`, for reporting and verification.
    pub fn count_rows(&self, table: &str) -> Result<usize> {
        let conn = self.connect(table)?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_identifier(table)),
                params![],
                |row| row.get(0),
            )
            .map_err(|e| EtlError::Write {
                table: table.to_string(),
                message: format!("failed to count rows: {e}"),
            })?;
        Ok(count as usize)
    }
}

fn schema_error(schema: &TableSchema, e: rusqlite::Error) -> EtlError {
    EtlError::Schema {
        table: schema.name().to_string(),
        message: e.to_string(),
    }
}

fn write_error(schema: &TableSchema, e: rusqlite::Error) -> EtlError {
    EtlError::Write {
        table: schema.name().to_string(),
        message: e.to_string(),
    }
}

fn existing_columns(conn: &Connection, schema: &TableSchema) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!(
            "PRAGMA table_info({})",
            quote_identifier(schema.name())
        ))
        .map_err(|e| schema_error(schema, e))?;
    let names = stmt
        .query_map(params![], |row| row.get::<_, String>(1))
        .map_err(|e| schema_error(schema, e))?
        .collect::<std::result::Result<Vec<String>, _>>()
        .map_err(|e| schema_error(schema, e))?;
    Ok(names)
}

fn create_table(conn: &Connection, schema: &TableSchema) -> Result<()> {
    conn.execute_batch(&schema.create_table_sql(Dialect::Sqlite))
        .map_err(|e| schema_error(schema, e))?;
    let existing = existing_columns(conn, schema)?;
    schema.check_existing(&existing)?;
    debug!(table = schema.name(), "Destination table ready");
    Ok(())
}

fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Integer(v) => Sql::Integer(*v),
        Value::Real(v) => Sql::Real(*v),
        Value::Text(s) => Sql::Text(s.clone()),
        Value::Boolean(b) => Sql::Integer(i64::from(*b)),
        Value::Timestamp(ts) => Sql::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
    }
}

/// Single transaction: a failure part-way leaves the table as it was before the
/// call, which is SQLite's guarantee rather than this sink's.
fn write_rows(
    conn: &mut Connection,
    schema: &TableSchema,
    dataset: &Dataset,
    mode: WriteMode,
) -> Result<usize> {
    let tx = conn.transaction().map_err(|e| write_error(schema, e))?;

    if mode == WriteMode::Replace {
        let cleared = tx
            .execute(&schema.delete_all_sql(), params![])
            .map_err(|e| write_error(schema, e))?;
        debug!(table = schema.name(), cleared, "Cleared table for replace");
    }

    let mut written = 0usize;
    {
        let mut stmt = tx
            .prepare(&schema.insert_sql(Dialect::Sqlite))
            .map_err(|e| write_error(schema, e))?;
        for row in dataset.rows() {
            written += stmt
                .execute(params_from_iter(row.iter().map(to_sql_value)))
                .map_err(|e| write_error(schema, e))?;
        }
    }

    tx.commit().map_err(|e| write_error(schema, e))?;
    Ok(written)
}

// rusqlite is synchronous; the async signature only satisfies the port.
#[async_trait]
impl SinkPort for SqliteSink {
    async fn ensure_table(&self, schema: &TableSchema) -> Result<()> {
        let conn = self.connect(schema.name())?;
        create_table(&conn, schema)
    }

    async fn load(&self, schema: &TableSchema, dataset: &Dataset, mode: WriteMode) -> Result<usize> {
        let mut conn = self.connect(schema.name())?;
        create_table(&conn, schema)?;
        let written = write_rows(&mut conn, schema, dataset, mode)?;
        info!(
            table = schema.name(),
            path = %self.path.display(),
            %mode,
            written,
            "Wrote rows to SQLite"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, ColumnType};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn dataset(cities: &[&str]) -> Dataset {
        let mut ds = Dataset::new(vec![
            Column::new("city_name", ColumnType::Text),
            Column::new("temperature", ColumnType::Real),
            Column::new("is_night", ColumnType::Boolean),
            Column::new("sunset", ColumnType::Timestamp),
        ]);
        for city in cities {
            ds.push_row(vec![
                Value::Text(city.to_string()),
                Value::Real(21.5),
                Value::Boolean(true),
                Value::Timestamp(Utc.with_ymd_and_hms(2024, 6, 21, 19, 15, 0).unwrap()),
            ])
            .unwrap();
        }
        ds
    }

    fn table_count(sink: &SqliteSink, table: &str) -> i64 {
        let conn = Connection::open(sink.path()).unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let dir = tempdir().unwrap();
        let sink = SqliteSink::new(dir.path().join("etl.db"));
        let schema = TableSchema::for_dataset("weather_data", &dataset(&[])).unwrap();

        sink.ensure_table(&schema).await.unwrap();
        sink.ensure_table(&schema).await.unwrap();

        assert_eq!(table_count(&sink, "weather_data"), 1);
        assert_eq!(sink.count_rows("weather_data").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_then_replace() {
        let dir = tempdir().unwrap();
        let sink = SqliteSink::new(dir.path().join("etl.db"));
        let ds = dataset(&["Madrid", "Barcelona"]);
        let schema = TableSchema::for_dataset("weather_data", &ds).unwrap();

        assert_eq!(sink.load(&schema, &ds, WriteMode::Append).await.unwrap(), 2);
        assert_eq!(sink.load(&schema, &ds, WriteMode::Append).await.unwrap(), 2);
        assert_eq!(sink.count_rows("weather_data").unwrap(), 4);

        let replacement = dataset(&["Sevilla"]);
        assert_eq!(sink.load(&schema, &replacement, WriteMode::Replace).await.unwrap(), 1);
        assert_eq!(sink.count_rows("weather_data").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_values_are_stored_with_defaults() {
        let dir = tempdir().unwrap();
        let sink = SqliteSink::new(dir.path().join("etl.db"));
        let ds = dataset(&["Valencia"]);
        let schema = TableSchema::for_dataset("weather_data", &ds).unwrap();
        sink.load(&schema, &ds, WriteMode::Append).await.unwrap();

        let conn = Connection::open(sink.path()).unwrap();
        let (id, city, is_night, sunset, created_at): (i64, String, i64, String, Option<String>) = conn
            .query_row(
                "SELECT id, city_name, is_night, sunset, created_at FROM weather_data",
                params![],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(city, "Valencia");
        assert_eq!(is_night, 1);
        assert_eq!(sunset, "2024-06-21 19:15:00");
        assert!(created_at.is_some());
    }

    #[tokio::test]
    async fn test_drifted_table_is_schema_error_and_untouched() {
        let dir = tempdir().unwrap();
        let sink = SqliteSink::new(dir.path().join("etl.db"));
        {
            let conn = Connection::open(sink.path()).unwrap();
            conn.execute_batch(
                "CREATE TABLE weather_data (id INTEGER PRIMARY KEY, city_name TEXT);
                 INSERT INTO weather_data (city_name) VALUES ('Old');",
            )
            .unwrap();
        }

        let ds = dataset(&["Madrid"]);
        let schema = TableSchema::for_dataset("weather_data", &ds).unwrap();
        let err = sink.load(&schema, &ds, WriteMode::Replace).await.unwrap_err();

        assert!(matches!(err, EtlError::Schema { .. }));
        assert_eq!(sink.count_rows("weather_data").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_location_is_table_tagged_write_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();
        let sink = SqliteSink::new(blocker.join("nested").join("etl.db"));
        let ds = dataset(&["Madrid"]);
        let schema = TableSchema::for_dataset("weather_data", &ds).unwrap();

        let err = sink.load(&schema, &ds, WriteMode::Append).await.unwrap_err();
        match err {
            EtlError::Write { table, .. } => assert_eq!(table, "weather_data"),
            other => panic!("expected write error, got {other:?}"),
        }
    }
}

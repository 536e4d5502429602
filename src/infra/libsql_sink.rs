use crate::app::ports::SinkPort;
use crate::error::{EtlError, Result};
use crate::pipeline::load::{quote_identifier, Dialect, TableSchema};
use crate::types::{Dataset, Value, WriteMode, TIMESTAMP_FORMAT};
use async_trait::async_trait;
use libsql::params::Params;
use libsql::{Builder, Connection, Database};
use tracing::{debug, info};

/// Remote libSQL (Turso) sink. Same SQL dialect as the SQLite sink.
pub struct LibsqlSink {
    db: Database,
    url: String,
}

impl LibsqlSink {
    pub async fn connect(url: &str, auth_token: &str) -> Result<Self> {
        let db = Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| EtlError::Config(format!("Failed to connect to database: {e}")))?;
        Ok(Self {
            db,
            url: url.to_string(),
        })
    }

    fn connection(&self, schema: &TableSchema) -> Result<Connection> {
        self.db.connect().map_err(|e| EtlError::Write {
            table: schema.name().to_string(),
            message: format!("Failed to get database connection: {e}"),
        })
    }

    async fn create_table(&self, conn: &Connection, schema: &TableSchema) -> Result<()> {
        conn.execute_batch(&schema.create_table_sql(Dialect::Sqlite))
            .await
            .map_err(|e| schema_error(schema, e))?;

        let mut rows = conn
            .query(
                &format!("PRAGMA table_info({})", quote_identifier(schema.name())),
                libsql::params![],
            )
            .await
            .map_err(|e| schema_error(schema, e))?;
        let mut existing = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| schema_error(schema, e))? {
            let name: String = row.get(1).map_err(|e| schema_error(schema, e))?;
            existing.push(name);
        }
        schema.check_existing(&existing)?;
        debug!(table = schema.name(), "Destination table ready");
        Ok(())
    }
}

fn schema_error(schema: &TableSchema, e: libsql::Error) -> EtlError {
    EtlError::Schema {
        table: schema.name().to_string(),
        message: e.to_string(),
    }
}

fn write_error(schema: &TableSchema, e: libsql::Error) -> EtlError {
    EtlError::Write {
        table: schema.name().to_string(),
        message: e.to_string(),
    }
}

fn to_libsql_value(value: &Value) -> libsql::Value {
    match value {
        Value::Null => libsql::Value::Null,
        Value::Integer(v) => libsql::Value::Integer(*v),
        Value::Real(v) => libsql::Value::Real(*v),
        Value::Text(s) => libsql::Value::Text(s.clone()),
        Value::Boolean(b) => libsql::Value::Integer(i64::from(*b)),
        Value::Timestamp(ts) => libsql::Value::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
    }
}

#[async_trait]
impl SinkPort for LibsqlSink {
    async fn ensure_table(&self, schema: &TableSchema) -> Result<()> {
        let conn = self.connection(schema)?;
        self.create_table(&conn, schema).await
    }

    async fn load(&self, schema: &TableSchema, dataset: &Dataset, mode: WriteMode) -> Result<usize> {
        let conn = self.connection(schema)?;
        self.create_table(&conn, schema).await?;

        let tx = conn.transaction().await.map_err(|e| write_error(schema, e))?;
        if mode == WriteMode::Replace {
            tx.execute(&schema.delete_all_sql(), libsql::params![])
                .await
                .map_err(|e| write_error(schema, e))?;
        }

        let insert = schema.insert_sql(Dialect::Sqlite);
        let mut written = 0usize;
        for row in dataset.rows() {
            let values: Vec<libsql::Value> = row.iter().map(to_libsql_value).collect();
            written += tx
                .execute(&insert, Params::Positional(values))
                .await
                .map_err(|e| write_error(schema, e))? as usize;
        }
        // dropping an uncommitted transaction rolls it back
        tx.commit().await.map_err(|e| write_error(schema, e))?;

        info!(table = schema.name(), url = %self.url, %mode, written, "Wrote rows to libSQL");
        Ok(written)
    }
}

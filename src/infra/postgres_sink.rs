use crate::app::ports::SinkPort;
use crate::config::DestinationConfig;
use crate::error::{EtlError, Result};
use crate::pipeline::load::{Dialect, TableSchema};
use crate::types::{ColumnType, Dataset, Value, WriteMode};
use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::{debug, error, info};

const DEFAULT_PORT: u16 = 5432;

/// PostgreSQL sink. Connects per call; the connection task ends when the
/// client is dropped at the end of the call.
pub struct PostgresSink {
    config: PgConfig,
    target: String,
}

impl PostgresSink {
    /// Builds the connection settings only; nothing is opened until a load.
    pub fn new(destination: &DestinationConfig) -> Result<Self> {
        if destination.host.trim().is_empty() {
            return Err(EtlError::Config(
                "a PostgreSQL destination needs a host".to_string(),
            ));
        }
        let mut config = PgConfig::new();
        config.host(&destination.host);
        config.port(destination.port.unwrap_or(DEFAULT_PORT));
        if !destination.user.is_empty() {
            config.user(&destination.user);
        }
        if !destination.password.is_empty() {
            config.password(&destination.password);
        }
        config.dbname(&destination.database);

        Ok(Self {
            config,
            target: destination.redacted_connection_string(),
        })
    }

    async fn connect(&self, schema: &TableSchema) -> Result<Client> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| EtlError::Write {
                table: schema.name().to_string(),
                message: format!("Connection to {} failed: {e}", self.target),
            })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });
        Ok(client)
    }
}

fn schema_error(schema: &TableSchema, e: tokio_postgres::Error) -> EtlError {
    EtlError::Schema {
        table: schema.name().to_string(),
        message: e.to_string(),
    }
}

fn write_error(schema: &TableSchema, e: tokio_postgres::Error) -> EtlError {
    EtlError::Write {
        table: schema.name().to_string(),
        message: e.to_string(),
    }
}

async fn create_table(client: &Client, schema: &TableSchema) -> Result<()> {
    client
        .batch_execute(&schema.create_table_sql(Dialect::Postgres))
        .await
        .map_err(|e| schema_error(schema, e))?;

    let rows = client
        .query(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
            &[&schema.name()],
        )
        .await
        .map_err(|e| schema_error(schema, e))?;
    let existing: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
    schema.check_existing(&existing)?;
    debug!(table = schema.name(), "Destination table ready");
    Ok(())
}

/// Typed by column so that NULLs bind with the column's SQL type.
/// Timestamps go out as `TIMESTAMP` (naive UTC).
fn to_pg_param(value: &Value, column_type: ColumnType) -> Box<dyn ToSql + Sync + Send> {
    match column_type {
        ColumnType::Integer => Box::new(value.as_i64()),
        ColumnType::Real => Box::new(value.as_f64()),
        ColumnType::Text => Box::new(value.as_str().map(str::to_string)),
        ColumnType::Boolean => Box::new(match value {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }),
        ColumnType::Timestamp => Box::new(value.as_timestamp().map(|ts| ts.naive_utc())),
    }
}

#[async_trait]
impl SinkPort for PostgresSink {
    async fn ensure_table(&self, schema: &TableSchema) -> Result<()> {
        let client = self.connect(schema).await?;
        create_table(&client, schema).await
    }

    async fn load(&self, schema: &TableSchema, dataset: &Dataset, mode: WriteMode) -> Result<usize> {
        let mut client = self.connect(schema).await?;
        create_table(&client, schema).await?;

        let tx = client.transaction().await.map_err(|e| write_error(schema, e))?;
        if mode == WriteMode::Replace {
            let cleared = tx
                .execute(schema.delete_all_sql().as_str(), &[])
                .await
                .map_err(|e| write_error(schema, e))?;
            debug!(table = schema.name(), cleared, "Cleared table for replace");
        }

        let stmt = tx
            .prepare(&schema.insert_sql(Dialect::Postgres))
            .await
            .map_err(|e| write_error(schema, e))?;
        let mut written = 0usize;
        for row in dataset.rows() {
            let params: Vec<Box<dyn ToSql + Sync + Send>> = row
                .iter()
                .zip(schema.columns())
                .map(|(value, column)| to_pg_param(value, column.column_type))
                .collect();
            let param_refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            written += tx
                .execute(&stmt, &param_refs)
                .await
                .map_err(|e| write_error(schema, e))? as usize;
        }
        // an uncommitted transaction rolls back on drop
        tx.commit().await.map_err(|e| write_error(schema, e))?;

        info!(table = schema.name(), target = %self.target, %mode, written, "Wrote rows to PostgreSQL");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn destination() -> DestinationConfig {
        DestinationConfig {
            protocol: "postgresql".into(),
            user: "postgres".into(),
            password: "s3cret".into(),
            host: "localhost".into(),
            port: None,
            database: "weather_db".into(),
        }
    }

    #[test]
    fn test_new_maps_destination_without_connecting() {
        let sink = PostgresSink::new(&destination()).unwrap();
        assert_eq!(sink.config.get_ports(), &[5432]);
        assert_eq!(sink.config.get_dbname(), Some("weather_db"));
        assert_eq!(sink.config.get_user(), Some("postgres"));
        assert!(!sink.target.contains("s3cret"));
    }

    #[test]
    fn test_new_requires_host() {
        let mut dest = destination();
        dest.host.clear();
        assert!(matches!(PostgresSink::new(&dest), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_params_follow_column_types() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 21, 19, 15, 0).unwrap();
        // rendered through Debug since boxed ToSql values are opaque
        let rendered = |value: &Value, column_type| format!("{:?}", to_pg_param(value, column_type));

        assert_eq!(rendered(&Value::Integer(40), ColumnType::Integer), "Some(40)");
        assert_eq!(rendered(&Value::Integer(3), ColumnType::Real), "Some(3.0)");
        assert_eq!(rendered(&Value::Boolean(true), ColumnType::Boolean), "Some(true)");
        assert_eq!(rendered(&Value::Null, ColumnType::Text), "None");
        assert_eq!(
            rendered(&Value::Timestamp(ts), ColumnType::Timestamp),
            "Some(2024-06-21T19:15:00)"
        );
    }
}

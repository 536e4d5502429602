//! Destination schema and the load step.
//!
//! The table is `id` (auto) + the dataset's columns in order + `created_at`
//! (defaulted at write time). SQLite and libSQL share [`Dialect::Sqlite`];
//! the PostgreSQL sink uses [`Dialect::Postgres`].

use crate::app::ports::SinkPort;
use crate::constants::{CREATED_AT_COLUMN, ID_COLUMN};
use crate::error::{EtlError, Result};
use crate::types::{Column, ColumnType, Dataset, WriteMode};
use metrics::counter;
use std::collections::HashSet;
use tracing::{info, instrument};

const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    fn id_column(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "SERIAL PRIMARY KEY",
        }
    }

    fn placeholder(&self, position: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{position}"),
            Dialect::Postgres => format!("${position}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(name: &str, columns: Vec<Column>) -> Result<Self> {
        let schema_err = |message: String| EtlError::Schema {
            table: name.to_string(),
            message,
        };

        validate_identifier(name).map_err(|e| schema_err(e.to_string()))?;
        let mut seen = HashSet::new();
        for column in &columns {
            validate_identifier(&column.name).map_err(|e| schema_err(e.to_string()))?;
            if column.name == ID_COLUMN || column.name == CREATED_AT_COLUMN {
                return Err(schema_err(format!(
                    "column '{}' is reserved by the destination table",
                    column.name
                )));
            }
            // SQL identifiers compare case-insensitively
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(schema_err(format!("duplicate column '{}'", column.name)));
            }
        }

        Ok(Self {
            name: name.to_string(),
            columns,
        })
    }

    pub fn for_dataset(name: &str, dataset: &Dataset) -> Result<Self> {
        Self::new(name, dataset.columns().to_vec())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn create_table_sql(&self, dialect: Dialect) -> String {
        let mut defs = Vec::with_capacity(self.columns.len() + 2);
        defs.push(format!("{ID_COLUMN} {}", dialect.id_column()));
        for column in &self.columns {
            defs.push(format!(
                "{} {}",
                quote_identifier(&column.name),
                sql_type(column.column_type, dialect)
            ));
        }
        defs.push(format!(
            "{CREATED_AT_COLUMN} TIMESTAMP DEFAULT CURRENT_TIMESTAMP"
        ));
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote_identifier(&self.name),
            defs.join(",\n    ")
        )
    }

    pub fn insert_sql(&self, dialect: Dialect) -> String {
        let names: Vec<String> = self
            .columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect();
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| dialect.placeholder(i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(&self.name),
            names.join(", "),
            placeholders.join(", ")
        )
    }

    pub fn delete_all_sql(&self) -> String {
        format!("DELETE FROM {}", quote_identifier(&self.name))
    }

    /// Dataset columns an existing table lacks, given its column names.
    pub fn missing_columns(&self, existing: &[String]) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !existing.iter().any(|e| e.eq_ignore_ascii_case(&c.name)))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Fails with a schema error when the existing table lacks a dataset column.
    pub fn check_existing(&self, existing: &[String]) -> Result<()> {
        let missing = self.missing_columns(existing);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EtlError::Schema {
                table: self.name.clone(),
                message: format!(
                    "existing table is missing column(s): {}",
                    missing.join(", ")
                ),
            })
        }
    }
}

/// Integers are 64-bit in both dialects.
pub fn sql_type(column_type: ColumnType, dialect: Dialect) -> &'static str {
    match column_type {
        ColumnType::Integer => match dialect {
            Dialect::Sqlite => "INTEGER",
            Dialect::Postgres => "BIGINT",
        },
        ColumnType::Real => "FLOAT",
        ColumnType::Text => "TEXT",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Timestamp => "TIMESTAMP",
    }
}

pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{name}\"")
}

/// `[A-Za-z_][A-Za-z0-9_]*`, at most 63 characters.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_start && valid_rest && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(EtlError::Config(format!("invalid SQL identifier '{name}'")))
    }
}

/// Ensure the destination table and write the dataset with the chosen mode.
#[instrument(skip(sink, dataset), fields(rows = dataset.len()))]
pub async fn load(
    sink: &dyn SinkPort,
    dataset: &Dataset,
    table_name: &str,
    mode: WriteMode,
) -> Result<usize> {
    let schema = TableSchema::for_dataset(table_name, dataset)?;
    let written = sink.load(&schema, dataset, mode).await?;

    counter!("etl_rows_written_total", "table" => table_name.to_string()).increment(written as u64);
    info!(table = table_name, %mode, written, "Loaded dataset");
    Ok(written)
}

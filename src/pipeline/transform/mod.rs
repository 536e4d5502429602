//! Record-to-row transformation.
//!
//! A [`Transformer`] declares its columns up front and maps each [`RawRecord`]
//! to one row. [`transform`] drives it over a whole extraction and is pure:
//! time comes from the injected [`Clock`], read once per call.

pub mod users;
pub mod weather;

use crate::clock::Clock;
use crate::constants;
use crate::error::{EtlError, Result};
use crate::types::{Column, Dataset, RawRecord, Value};
use chrono::{DateTime, Utc};
use tracing::info;

pub use users::UsersTransformer;
pub use weather::{categorize_temperature, TempCategory, WeatherTransformer};

pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    /// The full column set, derived columns included, in table order.
    fn columns(&self) -> Vec<Column>;

    /// One row in `columns()` order. `now` is identical for every row of a run.
    fn transform_record(&self, record: &RawRecord, now: DateTime<Utc>) -> Result<Vec<Value>>;
}

pub fn create_transformer(source_kind: &str) -> Result<Box<dyn Transformer>> {
    match source_kind {
        constants::OPENWEATHER_SOURCE => Ok(Box::new(WeatherTransformer)),
        constants::USERS_SOURCE => Ok(Box::new(UsersTransformer)),
        other => Err(EtlError::Config(format!(
            "no transformer for source kind '{other}'"
        ))),
    }
}

/// Build the dataset, one row per record, preserving input order.
pub fn transform(
    transformer: &dyn Transformer,
    records: Vec<RawRecord>,
    clock: &dyn Clock,
) -> Result<Dataset> {
    let now = clock.now();
    let mut dataset = Dataset::new(transformer.columns());
    for record in &records {
        let row = transformer.transform_record(record, now)?;
        dataset.push_row(row)?;
    }
    info!(
        transformer = transformer.name(),
        rows = dataset.len(),
        columns = dataset.columns().len(),
        "Transformed records"
    );
    Ok(dataset)
}

/// Upper-case every letter that follows a non-letter, lower-case the rest.
pub fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_is_alpha = false;
    for ch in input.chars() {
        if ch.is_alphabetic() {
            if prev_is_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_is_alpha = true;
        } else {
            out.push(ch);
            prev_is_alpha = false;
        }
    }
    out
}

/// Fractional hours from `start` to `end`.
pub fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 3_600_000.0
}

fn field<'a>(record: &'a RawRecord, name: &str) -> Result<&'a Value> {
    record.get(name).ok_or_else(|| {
        EtlError::Transform(format!(
            "record for partition '{}' has no field '{}'",
            record.partition, name
        ))
    })
}

pub(crate) fn text_field(record: &RawRecord, name: &str) -> Result<String> {
    field(record, name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| wrong_type(record, name, "text"))
}

pub(crate) fn real_field(record: &RawRecord, name: &str) -> Result<f64> {
    field(record, name)?
        .as_f64()
        .ok_or_else(|| wrong_type(record, name, "number"))
}

pub(crate) fn integer_field(record: &RawRecord, name: &str) -> Result<i64> {
    field(record, name)?
        .as_i64()
        .ok_or_else(|| wrong_type(record, name, "integer"))
}

pub(crate) fn timestamp_field(record: &RawRecord, name: &str) -> Result<DateTime<Utc>> {
    field(record, name)?
        .as_timestamp()
        .ok_or_else(|| wrong_type(record, name, "timestamp"))
}

fn wrong_type(record: &RawRecord, name: &str, expected: &str) -> EtlError {
    EtlError::Transform(format!(
        "field '{}' of partition '{}' is not a {}",
        name, record.partition, expected
    ))
}

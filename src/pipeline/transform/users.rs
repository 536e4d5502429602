use super::{integer_field, text_field, Transformer};
use crate::error::Result;
use crate::types::{Column, ColumnType, RawRecord, Value};
use chrono::{DateTime, Utc};

/// User directory rows: trimmed name, lower-cased email and website,
/// a composed `full_address` and the run's `etl_timestamp`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UsersTransformer;

impl Transformer for UsersTransformer {
    fn name(&self) -> &'static str {
        "users"
    }

    fn columns(&self) -> Vec<Column> {
        vec![
            // `id` belongs to the destination table
            Column::new("user_id", ColumnType::Integer),
            Column::new("name", ColumnType::Text),
            Column::new("username", ColumnType::Text),
            Column::new("email", ColumnType::Text),
            Column::new("phone", ColumnType::Text),
            Column::new("website", ColumnType::Text),
            Column::new("company_name", ColumnType::Text),
            Column::new("address_city", ColumnType::Text),
            Column::new("address_street", ColumnType::Text),
            Column::new("address_suite", ColumnType::Text),
            Column::new("address_zipcode", ColumnType::Text),
            Column::new("full_address", ColumnType::Text),
            Column::new("etl_timestamp", ColumnType::Timestamp),
        ]
    }

    fn transform_record(&self, record: &RawRecord, now: DateTime<Utc>) -> Result<Vec<Value>> {
        let street = text_field(record, "address_street")?;
        let suite = text_field(record, "address_suite")?;
        let city = text_field(record, "address_city")?;
        let zipcode = text_field(record, "address_zipcode")?;
        let full_address = format!("{street}, {suite}, {city} {zipcode}");

        Ok(vec![
            Value::Integer(integer_field(record, "id")?),
            Value::Text(text_field(record, "name")?.trim().to_string()),
            Value::Text(text_field(record, "username")?),
            Value::Text(text_field(record, "email")?.to_lowercase()),
            Value::Text(text_field(record, "phone")?),
            Value::Text(text_field(record, "website")?.to_lowercase()),
            Value::Text(text_field(record, "company_name")?),
            Value::Text(city),
            Value::Text(street),
            Value::Text(suite),
            Value::Text(zipcode),
            Value::Text(full_address),
            Value::Timestamp(now),
        ])
    }
}

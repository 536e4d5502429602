use super::{hours_between, integer_field, real_field, text_field, timestamp_field, title_case, Transformer};
use crate::error::Result;
use crate::types::{Column, ColumnType, RawRecord, Value};
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempCategory {
    Cold,
    Mild,
    Warm,
    Hot,
}

impl TempCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TempCategory::Cold => "Cold",
            TempCategory::Mild => "Mild",
            TempCategory::Warm => "Warm",
            TempCategory::Hot => "Hot",
        }
    }
}

impl fmt::Display for TempCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open buckets, inclusive on the lower edge: `< 10`, `[10, 20)`, `[20, 30)`, `>= 30`.
pub fn categorize_temperature(celsius: f64) -> TempCategory {
    if celsius < 10.0 {
        TempCategory::Cold
    } else if celsius < 20.0 {
        TempCategory::Mild
    } else if celsius < 30.0 {
        TempCategory::Warm
    } else {
        TempCategory::Hot
    }
}

/// Weather observations: passes the extracted fields through and adds
/// `day_length` (hours), `is_night` and `temp_category`. `description` is title-cased.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeatherTransformer;

impl Transformer for WeatherTransformer {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn columns(&self) -> Vec<Column> {
        vec![
            Column::new("city_name", ColumnType::Text),
            Column::new("temperature", ColumnType::Real),
            Column::new("feels_like", ColumnType::Real),
            Column::new("humidity", ColumnType::Integer),
            Column::new("pressure", ColumnType::Integer),
            Column::new("wind_speed", ColumnType::Real),
            Column::new("description", ColumnType::Text),
            Column::new("timestamp", ColumnType::Timestamp),
            Column::new("sunrise", ColumnType::Timestamp),
            Column::new("sunset", ColumnType::Timestamp),
            Column::new("day_length", ColumnType::Real),
            Column::new("is_night", ColumnType::Boolean),
            Column::new("temp_category", ColumnType::Text),
        ]
    }

    fn transform_record(&self, record: &RawRecord, now: DateTime<Utc>) -> Result<Vec<Value>> {
        let temperature = real_field(record, "temperature")?;
        let sunrise = timestamp_field(record, "sunrise")?;
        let sunset = timestamp_field(record, "sunset")?;

        Ok(vec![
            Value::Text(text_field(record, "city_name")?),
            Value::Real(temperature),
            Value::Real(real_field(record, "feels_like")?),
            Value::Integer(integer_field(record, "humidity")?),
            Value::Integer(integer_field(record, "pressure")?),
            Value::Real(real_field(record, "wind_speed")?),
            Value::Text(title_case(&text_field(record, "description")?)),
            Value::Timestamp(timestamp_field(record, "timestamp")?),
            Value::Timestamp(sunrise),
            Value::Timestamp(sunset),
            Value::Real(hours_between(sunrise, sunset)),
            // clock-dependent
            Value::Boolean(now > sunset),
            Value::Text(categorize_temperature(temperature).to_string()),
        ])
    }
}

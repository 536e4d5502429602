pub mod openweather;
pub mod users;

use crate::app::ports::SourceRequest;
use crate::config::SourceConfig;
use crate::constants;
use crate::error::{EtlError, Result};
use crate::types::{PartitionKey, RawRecord};
use chrono::{DateTime, Utc};
use serde_json::Value;

pub use openweather::OpenWeatherApi;
pub use users::UsersApi;

/// A remote source that yields one record per partition.
pub trait SourceApi: Send + Sync {
    /// Unique identifier for this source
    fn api_name(&self) -> &'static str;

    /// The GET request for one partition.
    fn build_request(&self, partition: &PartitionKey) -> Result<SourceRequest>;

    /// Validate a decoded response body and flatten it into a record.
    /// A missing or mistyped required field is `EtlError::MalformedResponse`.
    fn parse_record(&self, partition: &PartitionKey, body: &Value) -> Result<RawRecord>;
}

pub fn create_api(config: &SourceConfig) -> Result<Box<dyn SourceApi>> {
    match config.kind.as_str() {
        constants::OPENWEATHER_SOURCE => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                EtlError::Config(format!(
                    "the '{}' source needs an API key",
                    constants::OPENWEATHER_SOURCE
                ))
            })?;
            Ok(Box::new(OpenWeatherApi::new(
                config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| constants::OPENWEATHER_BASE_URL.to_string()),
                api_key,
                config.units.clone(),
            )))
        }
        constants::USERS_SOURCE => Ok(Box::new(UsersApi::new(
            config
                .base_url
                .clone()
                .unwrap_or_else(|| constants::USERS_BASE_URL.to_string()),
        ))),
        other => Err(EtlError::Config(format!("unknown source kind '{other}'"))),
    }
}

/// Every partition carries the parameters `api` needs to build its request.
pub fn validate_partitions(api: &dyn SourceApi, partitions: &[PartitionKey]) -> Result<()> {
    for partition in partitions {
        api.build_request(partition)?;
    }
    Ok(())
}

/// Resolve a dotted path such as `weather.0.description`; numeric segments index arrays.
pub(crate) fn lookup<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(body, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub(crate) fn require_f64(partition: &PartitionKey, body: &Value, path: &str) -> Result<f64> {
    lookup(body, path)
        .and_then(Value::as_f64)
        .ok_or_else(|| missing(partition, path, "a number"))
}

pub(crate) fn require_i64(partition: &PartitionKey, body: &Value, path: &str) -> Result<i64> {
    let value = lookup(body, path).ok_or_else(|| missing(partition, path, "an integer"))?;
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        .ok_or_else(|| missing(partition, path, "an integer"))
}

pub(crate) fn require_str(partition: &PartitionKey, body: &Value, path: &str) -> Result<String> {
    lookup(body, path)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(partition, path, "a string"))
}

/// Unix seconds to a UTC timestamp.
pub(crate) fn require_unix_ts(
    partition: &PartitionKey,
    body: &Value,
    path: &str,
) -> Result<DateTime<Utc>> {
    let secs = require_i64(partition, body, path)?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| missing(partition, path, "a unix timestamp"))
}

fn missing(partition: &PartitionKey, path: &str, expected: &str) -> EtlError {
    EtlError::malformed(
        &partition.name,
        format!("field '{path}' is missing or not {expected}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_walks_objects_and_arrays() {
        let body = json!({"weather": [{"description": "light rain"}], "main": {"temp": 12.5}});
        assert_eq!(
            lookup(&body, "weather.0.description"),
            Some(&json!("light rain"))
        );
        assert_eq!(lookup(&body, "main.temp"), Some(&json!(12.5)));
        assert_eq!(lookup(&body, "weather.1.description"), None);
        assert_eq!(lookup(&body, "main.temp.x"), None);
    }

    #[test]
    fn test_require_helpers_report_malformed() {
        let partition = PartitionKey::new("Madrid");
        let body = json!({"main": {"humidity": 40.0, "label": "x"}});
        assert_eq!(require_i64(&partition, &body, "main.humidity").unwrap(), 40);
        let err = require_f64(&partition, &body, "main.label").unwrap_err();
        assert!(matches!(err, EtlError::MalformedResponse { .. }));
        assert!(err.to_string().contains("main.label"));
    }

    #[test]
    fn test_validate_partitions_names_the_incomplete_one() {
        let api = OpenWeatherApi::new("http://weather.test".into(), "k".into(), "metric".into());
        let good = PartitionKey::new("Madrid")
            .with_param("lat", 40.4)
            .with_param("lon", -3.7);
        let no_lon = PartitionKey::new("Bilbao").with_param("lat", 43.3);

        assert!(validate_partitions(&api, &[good.clone()]).is_ok());
        let err = validate_partitions(&api, &[good, no_lon]).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
        assert!(err.to_string().contains("Bilbao"));
        assert!(err.to_string().contains("lon"));
    }

    #[test]
    fn test_create_api_requires_key_for_weather() {
        let config = SourceConfig {
            kind: constants::OPENWEATHER_SOURCE.into(),
            base_url: None,
            api_key: None,
            units: "metric".into(),
        };
        assert!(matches!(create_api(&config), Err(EtlError::Config(_))));

        let users = SourceConfig {
            kind: constants::USERS_SOURCE.into(),
            ..config
        };
        assert_eq!(create_api(&users).unwrap().api_name(), constants::USERS_SOURCE);
    }
}

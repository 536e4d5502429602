use super::{require_f64, require_i64, require_str, require_unix_ts, SourceApi};
use crate::app::ports::SourceRequest;
use crate::constants::OPENWEATHER_SOURCE;
use crate::error::Result;
use crate::types::{PartitionKey, RawRecord, Value};
use serde_json::Value as Json;
use std::fmt;

/// OpenWeatherMap "current weather" by coordinates. Partitions carry `lat` and `lon`.
pub struct OpenWeatherApi {
    base_url: String,
    api_key: String,
    units: String,
}

impl fmt::Debug for OpenWeatherApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenWeatherApi")
            .field("base_url", &self.base_url)
            .field("units", &self.units)
            .finish_non_exhaustive()
    }
}

impl OpenWeatherApi {
    pub fn new(base_url: String, api_key: String, units: String) -> Self {
        Self {
            base_url,
            api_key,
            units,
        }
    }
}

impl SourceApi for OpenWeatherApi {
    fn api_name(&self) -> &'static str {
        OPENWEATHER_SOURCE
    }

    fn build_request(&self, partition: &PartitionKey) -> Result<SourceRequest> {
        Ok(SourceRequest::new(self.base_url.clone())
            .query("lat", partition.require_param("lat")?)
            .query("lon", partition.require_param("lon")?)
            .query("appid", self.api_key.clone())
            .query("units", self.units.clone()))
    }

    fn parse_record(&self, partition: &PartitionKey, body: &Json) -> Result<RawRecord> {
        let mut record = RawRecord::new(partition.name.clone());
        record.insert("city_name", Value::Text(partition.name.clone()));
        record.insert("temperature", Value::Real(require_f64(partition, body, "main.temp")?));
        record.insert("feels_like", Value::Real(require_f64(partition, body, "main.feels_like")?));
        record.insert("humidity", Value::Integer(require_i64(partition, body, "main.humidity")?));
        record.insert("pressure", Value::Integer(require_i64(partition, body, "main.pressure")?));
        record.insert("wind_speed", Value::Real(require_f64(partition, body, "wind.speed")?));
        record.insert(
            "description",
            Value::Text(require_str(partition, body, "weather.0.description")?),
        );
        record.insert("timestamp", Value::Timestamp(require_unix_ts(partition, body, "dt")?));
        record.insert("sunrise", Value::Timestamp(require_unix_ts(partition, body, "sys.sunrise")?));
        record.insert("sunset", Value::Timestamp(require_unix_ts(partition, body, "sys.sunset")?));
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use serde_json::json;

    fn api() -> OpenWeatherApi {
        OpenWeatherApi::new("http://weather.test/data".into(), "k3y".into(), "metric".into())
    }

    fn madrid() -> PartitionKey {
        PartitionKey::new("Madrid")
            .with_param("lat", 40.4168)
            .with_param("lon", -3.7038)
    }

    #[test]
    fn test_build_request_carries_coordinates_and_key() {
        let req = api().build_request(&madrid()).unwrap();
        assert_eq!(req.url, "http://weather.test/data");
        assert_eq!(req.query_value("lat"), Some("40.4168"));
        assert_eq!(req.query_value("lon"), Some("-3.7038"));
        assert_eq!(req.query_value("appid"), Some("k3y"));
        assert_eq!(req.query_value("units"), Some("metric"));
        assert!(!format!("{:?}", api()).contains("k3y"));
    }

    #[test]
    fn test_parse_record() {
        let body = json!({
            "main": {"temp": 21.4, "feels_like": 20.9, "humidity": 38, "pressure": 1016},
            "wind": {"speed": 3.6},
            "weather": [{"description": "scattered clouds"}],
            "dt": 1_700_000_000,
            "sys": {"sunrise": 1_699_944_000, "sunset": 1_699_980_000}
        });
        let record = api().parse_record(&madrid(), &body).unwrap();
        assert_eq!(record.partition, "Madrid");
        assert_eq!(record.get("city_name"), Some(&Value::Text("Madrid".into())));
        assert_eq!(record.get("humidity"), Some(&Value::Integer(38)));
        assert_eq!(
            record.get("sunset").and_then(Value::as_timestamp).map(|t| t.timestamp()),
            Some(1_699_980_000)
        );
    }

    #[test]
    fn test_parse_record_missing_field_is_malformed() {
        let body = json!({"main": {"temp": 21.4}});
        let err = api().parse_record(&madrid(), &body).unwrap_err();
        assert!(matches!(err, EtlError::MalformedResponse { ref partition, .. } if partition == "Madrid"));
    }
}

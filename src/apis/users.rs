use super::{require_i64, require_str, SourceApi};
use crate::app::ports::SourceRequest;
use crate::constants::USERS_SOURCE;
use crate::error::Result;
use crate::types::{PartitionKey, RawRecord, Value};
use serde_json::Value as Json;

/// JSONPlaceholder-style user directory: one `GET {base_url}/{id}` per partition.
#[derive(Debug)]
pub struct UsersApi {
    base_url: String,
}

impl UsersApi {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

const TEXT_FIELDS: [(&str, &str); 10] = [
    ("name", "name"),
    ("username", "username"),
    ("email", "email"),
    ("phone", "phone"),
    ("website", "website"),
    ("company_name", "company.name"),
    ("address_city", "address.city"),
    ("address_street", "address.street"),
    ("address_suite", "address.suite"),
    ("address_zipcode", "address.zipcode"),
];

impl SourceApi for UsersApi {
    fn api_name(&self) -> &'static str {
        USERS_SOURCE
    }

    fn build_request(&self, partition: &PartitionKey) -> Result<SourceRequest> {
        let id = partition.require_param("id")?;
        Ok(SourceRequest::new(format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            id
        )))
    }

    fn parse_record(&self, partition: &PartitionKey, body: &Json) -> Result<RawRecord> {
        let mut record = RawRecord::new(partition.name.clone());
        record.insert("id", Value::Integer(require_i64(partition, body, "id")?));
        for (field, path) in TEXT_FIELDS {
            record.insert(field, Value::Text(require_str(partition, body, path)?));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use serde_json::json;

    #[test]
    fn test_build_request_uses_id_path() {
        let api = UsersApi::new("http://users.test/users/".into());
        let req = api
            .build_request(&PartitionKey::new("user-3").with_param("id", 3))
            .unwrap();
        assert_eq!(req.url, "http://users.test/users/3");
        assert!(req.query.is_empty());
    }

    #[test]
    fn test_parse_record_flattens_nested_fields() {
        let body = json!({
            "id": 1, "name": "Leanne Graham", "username": "Bret",
            "email": "Sincere@april.biz", "phone": "1-770-736-8031", "website": "hildegard.org",
            "company": {"name": "Romaguera-Crona"},
            "address": {"street": "Kulas Light", "suite": "Apt. 556", "city": "Gwenborough", "zipcode": "92998-3874"}
        });
        let record = UsersApi::new("http://users.test".into())
            .parse_record(&PartitionKey::new("user-1"), &body)
            .unwrap();
        assert_eq!(record.get("id"), Some(&Value::Integer(1)));
        assert_eq!(record.get("company_name"), Some(&Value::Text("Romaguera-Crona".into())));
        assert_eq!(record.get("address_zipcode"), Some(&Value::Text("92998-3874".into())));
    }

    #[test]
    fn test_missing_address_is_malformed() {
        let body = json!({"id": 1, "name": "x"});
        let err = UsersApi::new("http://users.test".into())
            .parse_record(&PartitionKey::new("user-1"), &body)
            .unwrap_err();
        assert!(matches!(err, EtlError::MalformedResponse { .. }));
    }
}

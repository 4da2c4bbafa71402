//! Entity envelope for replicated remote records
//!
//! The remote payload is kept verbatim. Only the handful of fields the sync
//! engine and the indexes need are lifted out of it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::ObjectType;

/// A remote entity (customer or invoice) scoped to one account
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Remote-assigned identifier (primary key)
    pub id: String,
    /// Account (realm) that owns the record
    pub realm_id: String,
    pub object_type: ObjectType,
    /// `MetaData.LastUpdatedTime`, verbatim, when the remote supplied one
    pub last_updated_time: Option<String>,
    /// `CustomerRef.value` for invoices
    pub customer_ref: Option<String>,
    /// Full remote payload
    pub payload: Value,
    /// When the record was last written locally
    pub synced_at: DateTime<Utc>,
}

impl EntityRecord {
    /// Build an envelope from a raw remote payload
    ///
    /// Fails only when the payload carries no `Id`. A missing modification
    /// timestamp or customer reference is tolerated.
    pub fn from_remote(object_type: ObjectType, realm_id: &str, payload: Value) -> Result<Self> {
        let id = extract_id(&payload)
            .with_context(|| format!("{} record is missing an Id", object_type.remote_name()))?;

        let last_updated_time = payload
            .pointer("/MetaData/LastUpdatedTime")
            .and_then(Value::as_str)
            .map(str::to_string);

        let customer_ref = match object_type {
            ObjectType::Invoice => payload
                .pointer("/CustomerRef/value")
                .and_then(value_as_string),
            ObjectType::Customer => None,
        };

        Ok(Self {
            id,
            realm_id: realm_id.to_string(),
            object_type,
            last_updated_time,
            customer_ref,
            payload,
            synced_at: Utc::now(),
        })
    }

    /// Display name from the payload, if the entity has one
    pub fn display_name(&self) -> Option<&str> {
        self.payload
            .get("DisplayName")
            .or_else(|| self.payload.get("DocNumber"))
            .and_then(Value::as_str)
    }
}

fn extract_id(payload: &Value) -> Option<String> {
    payload.get("Id").and_then(value_as_string)
}

// Ids are strings in the API but tolerate numbers
fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_customer_envelope() {
        let payload = json!({
            "Id": "58",
            "DisplayName": "Amy's Bird Sanctuary",
            "MetaData": {
                "CreateTime": "2024-01-02T10:00:00-08:00",
                "LastUpdatedTime": "2024-03-04T09:30:00-08:00"
            }
        });

        let record = EntityRecord::from_remote(ObjectType::Customer, "realm-1", payload).unwrap();
        assert_eq!(record.id, "58");
        assert_eq!(record.realm_id, "realm-1");
        assert_eq!(
            record.last_updated_time.as_deref(),
            Some("2024-03-04T09:30:00-08:00")
        );
        assert!(record.customer_ref.is_none());
        assert_eq!(record.display_name(), Some("Amy's Bird Sanctuary"));
    }

    #[test]
    fn test_invoice_extracts_customer_ref() {
        let payload = json!({
            "Id": "130",
            "DocNumber": "1037",
            "CustomerRef": { "value": "58", "name": "Amy's Bird Sanctuary" },
            "MetaData": { "LastUpdatedTime": "2024-03-05T11:00:00-08:00" }
        });

        let record = EntityRecord::from_remote(ObjectType::Invoice, "realm-1", payload).unwrap();
        assert_eq!(record.customer_ref.as_deref(), Some("58"));
    }

    #[test]
    fn test_invoice_without_customer_ref() {
        let payload = json!({ "Id": "131" });

        let record = EntityRecord::from_remote(ObjectType::Invoice, "realm-1", payload).unwrap();
        assert!(record.customer_ref.is_none());
        assert!(record.last_updated_time.is_none());
    }

    #[test]
    fn test_numeric_id_is_accepted() {
        let record =
            EntityRecord::from_remote(ObjectType::Customer, "realm-1", json!({ "Id": 7 })).unwrap();
        assert_eq!(record.id, "7");
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let err = EntityRecord::from_remote(ObjectType::Customer, "realm-1", json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("missing an Id"));
    }
}

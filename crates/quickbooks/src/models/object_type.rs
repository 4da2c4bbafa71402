//! Remote object types replicated by the sync engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An entity collection replicated from QuickBooks Online
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectType {
    Customer,
    Invoice,
}

impl ObjectType {
    /// Every object type the scheduler syncs, in a stable order
    pub const ALL: [ObjectType; 2] = [ObjectType::Customer, ObjectType::Invoice];

    /// Remote entity name, used in queries and as the `QueryResponse` key
    pub fn remote_name(&self) -> &'static str {
        match self {
            ObjectType::Customer => "Customer",
            ObjectType::Invoice => "Invoice",
        }
    }

    /// Path segment for point reads (`/v3/company/{realm}/{segment}/{id}`)
    pub fn path_segment(&self) -> &'static str {
        match self {
            ObjectType::Customer => "customer",
            ObjectType::Invoice => "invoice",
        }
    }

    /// Local table holding entities of this type
    pub fn table(&self) -> &'static str {
        match self {
            ObjectType::Customer => "customers",
            ObjectType::Invoice => "invoices",
        }
    }

    /// Key stored in `sync_state.object_type` and `sync_history.object_type`
    pub fn as_str(&self) -> &'static str {
        self.path_segment()
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown object type
#[derive(Debug, thiserror::Error)]
#[error("Unknown object type: {0} (expected customer or invoice)")]
pub struct UnknownObjectType(pub String);

impl FromStr for ObjectType {
    type Err = UnknownObjectType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" | "customers" => Ok(ObjectType::Customer),
            "invoice" | "invoices" => Ok(ObjectType::Invoice),
            _ => Err(UnknownObjectType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_type() {
        assert_eq!("customer".parse::<ObjectType>().unwrap(), ObjectType::Customer);
        assert_eq!("Invoices".parse::<ObjectType>().unwrap(), ObjectType::Invoice);
        assert!("vendor".parse::<ObjectType>().is_err());
    }

    #[test]
    fn test_round_trip_through_storage_key() {
        for object_type in ObjectType::ALL {
            assert_eq!(object_type.as_str().parse::<ObjectType>().unwrap(), object_type);
        }
    }

    #[test]
    fn test_remote_names() {
        assert_eq!(ObjectType::Customer.remote_name(), "Customer");
        assert_eq!(ObjectType::Invoice.table(), "invoices");
    }
}

//! Input and output structures for the client-facing operations.
//!
//! Member names follow the DynamoDB service model (PascalCase members,
//! with the handful of lowerCamel exceptions the streams API carries), so
//! these types serialize straight into wire-compatible JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Item operation shapes: PutItem, GetItem, UpdateItem, DeleteItem,
/// Query, Scan, batches, and transactions.
pub mod item;

/// Stream operation shapes: ListStreams, DescribeStream,
/// GetShardIterator, GetRecords.
pub mod stream;

/// Table operation shapes: CreateTable, DescribeTable, ListTables,
/// DeleteTable, UpdateTable, UpdateTimeToLive.
pub mod table;

/// Which attributes a mutating operation echoes back.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnValues {
    #[default]
    None,
    AllOld,
    UpdatedOld,
    AllNew,
    UpdatedNew,
}

impl fmt::Display for ReturnValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let val = match self {
            ReturnValues::None => "NONE",
            ReturnValues::AllOld => "ALL_OLD",
            ReturnValues::UpdatedOld => "UPDATED_OLD",
            ReturnValues::AllNew => "ALL_NEW",
            ReturnValues::UpdatedNew => "UPDATED_NEW",
        };
        write!(f, "{}", val)
    }
}

/// Whether a response reports the capacity the request consumed.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnConsumedCapacity {
    #[default]
    None,
    Total,
    Indexes,
}

/// The capacity units consumed by an operation.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsumedCapacity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    pub capacity_units: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_capacity_units: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_capacity_units: Option<f64>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_return_values_wire_form() {
        assert_eq!(
            serde_json::json!("UPDATED_NEW"),
            serde_json::to_value(ReturnValues::UpdatedNew).unwrap()
        );
        assert_eq!(ReturnValues::None, ReturnValues::default());
    }

    #[test]
    fn test_consumed_capacity_omits_empty_members() {
        let capacity = ConsumedCapacity {
            table_name: Some("Users".into()),
            capacity_units: 1.0,
            read_capacity_units: None,
            write_capacity_units: None,
        };
        let value = serde_json::to_value(&capacity).unwrap();
        assert_eq!(serde_json::json!({"TableName": "Users", "CapacityUnits": 1.0}), value);
    }
}

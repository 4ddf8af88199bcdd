use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::attr::Item;
use crate::custom_serde::{deserialize_epoch_seconds, serialize_epoch_seconds};
use crate::table::StreamViewType;

/// The type of data modification recorded by a stream record.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Insert,
    Modify,
    Remove,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let val = match self {
            OperationType::Insert => "INSERT",
            OperationType::Modify => "MODIFY",
            OperationType::Remove => "REMOVE",
        };
        write!(f, "{}", val)
    }
}

/// Where in the shard a new iterator starts reading.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardIteratorType {
    TrimHorizon,
    Latest,
    AtSequenceNumber,
    AfterSequenceNumber,
}

impl fmt::Display for ShardIteratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let val = match self {
            ShardIteratorType::TrimHorizon => "TRIM_HORIZON",
            ShardIteratorType::Latest => "LATEST",
            ShardIteratorType::AtSequenceNumber => "AT_SEQUENCE_NUMBER",
            ShardIteratorType::AfterSequenceNumber => "AFTER_SEQUENCE_NUMBER",
        };
        write!(f, "{}", val)
    }
}

/// Lifecycle state of a stream.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    Enabling,
    Enabled,
    Disabling,
    Disabled,
}

/// One record returned by GetRecords.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    /// A globally unique identifier for the event.
    #[serde(rename = "eventID")]
    pub event_id: String,
    /// The kind of modification: INSERT, MODIFY, or REMOVE.
    pub event_name: OperationType,
    #[serde(default)]
    pub event_version: Option<String>,
    /// Always `aws:dynamodb` for records produced here.
    #[serde(default)]
    pub event_source: Option<String>,
    #[serde(rename = "eventSourceARN")]
    #[serde(default)]
    pub event_source_arn: Option<String>,
    pub aws_region: String,
    /// The DynamoDB-specific body of the record.
    #[serde(rename = "dynamodb")]
    pub change: StreamRecordDetail,
}

/// The DynamoDB-specific fields of a stream record.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StreamRecordDetail {
    /// The approximate time the record was created, as fractional epoch
    /// seconds on the wire.
    #[serde(rename = "ApproximateCreationDateTime")]
    #[serde(
        serialize_with = "serialize_epoch_seconds",
        deserialize_with = "deserialize_epoch_seconds"
    )]
    pub approximate_creation_date_time: DateTime<Utc>,
    /// The primary key attributes of the modified item.
    #[serde(rename = "Keys")]
    pub keys: Item,
    /// The item as it appeared after the change, when the view type
    /// captures it.
    #[serde(rename = "NewImage")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<Item>,
    /// The item as it appeared before the change, when the view type
    /// captures it.
    #[serde(rename = "OldImage")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<Item>,
    #[serde(rename = "SequenceNumber")]
    pub sequence_number: String,
    #[serde(rename = "SizeBytes")]
    pub size_bytes: i64,
    #[serde(rename = "StreamViewType")]
    pub stream_view_type: StreamViewType,
}

/// A shard of a stream. Pretender exposes exactly one shard per stream.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Shard {
    pub shard_id: String,
    pub sequence_number_range: SequenceNumberRange,
}

/// The range of sequence numbers currently readable from a shard.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SequenceNumberRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_sequence_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ending_sequence_number: Option<String>,
}

/// A stream as reported by ListStreams.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamSummary {
    pub stream_arn: String,
    pub table_name: String,
    pub stream_label: String,
}

/// The full stream description reported by DescribeStream.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamDescription {
    pub stream_arn: String,
    pub table_name: String,
    pub stream_label: String,
    pub stream_status: StreamStatus,
    pub stream_view_type: StreamViewType,
    pub key_schema: Vec<crate::ops::table::KeySchemaElement>,
    pub shards: Vec<Shard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluated_shard_id: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::attr::AttributeValue;
    use chrono::TimeZone;

    #[test]
    fn test_stream_record_wire_member_names() {
        let mut keys = Item::new();
        keys.insert("id".into(), AttributeValue::S("o1".into()));
        let record = StreamRecord {
            event_id: "7b6bc71e-b035-4a33-9e4e-79f0f4d3e4a5".into(),
            event_name: OperationType::Insert,
            event_version: Some("1.1".into()),
            event_source: Some("aws:dynamodb".into()),
            event_source_arn: None,
            aws_region: "local".into(),
            change: StreamRecordDetail {
                approximate_creation_date_time: Utc.timestamp_opt(1480555620, 0).unwrap(),
                keys,
                new_image: None,
                old_image: None,
                sequence_number: "1".into(),
                size_bytes: 26,
                stream_view_type: StreamViewType::KeysOnly,
            },
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!("INSERT", value["eventName"]);
        assert_eq!("1", value["dynamodb"]["SequenceNumber"]);
        assert!(value["dynamodb"].get("NewImage").is_none());
        assert_eq!("o1", value["dynamodb"]["Keys"]["id"]["S"]);

        let reparsed: StreamRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record, reparsed);
    }

    #[test]
    fn test_iterator_type_wire_form() {
        assert_eq!(
            serde_json::json!("TRIM_HORIZON"),
            serde_json::to_value(ShardIteratorType::TrimHorizon).unwrap()
        );
    }
}

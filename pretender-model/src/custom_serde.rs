use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::Serializer;
use std::collections::HashMap;

pub(crate) fn deserialize_base64<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(DeError::custom)
}

pub(crate) fn serialize_base64<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(value))
}

pub(crate) fn deserialize_base64_vec<'de, D>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    let strings: Vec<String> = Vec::deserialize(deserializer)?;
    strings
        .into_iter()
        .map(|s| {
            base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(DeError::custom)
        })
        .collect()
}

pub(crate) fn serialize_base64_vec<S>(values: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let encoded: Vec<String> = values
        .iter()
        .map(|v| base64::engine::general_purpose::STANDARD.encode(v))
        .collect();
    serde::Serialize::serialize(&encoded, serializer)
}

/// Serialize a UTC datetime as fractional epoch seconds, the rendering
/// DynamoDB Streams uses for `ApproximateCreationDateTime`.
pub(crate) fn serialize_epoch_seconds<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(date.timestamp_millis() as f64 / 1000.0)
}

pub(crate) fn deserialize_epoch_seconds<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds: f64 = f64::deserialize(deserializer)?;
    let millis = (seconds * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis)
        .latest()
        .ok_or_else(|| DeError::custom("value is not a legal timestamp"))
}

/// Deserializes `HashMap<_>`, mapping JSON `null` to an empty map.
pub(crate) fn deserialize_null_map<'de, D, V>(deserializer: D) -> Result<HashMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: serde::Deserialize<'de>,
{
    let opt = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct BinHolder {
        #[serde(serialize_with = "serialize_base64", deserialize_with = "deserialize_base64")]
        data: Vec<u8>,
    }

    #[test]
    fn test_base64_round_trip() {
        let value = serde_json::json!({ "data": "dGVzdA==" });
        let holder: BinHolder = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(b"test".to_vec(), holder.data);
        assert_eq!(value, serde_json::to_value(&holder).unwrap());
    }

    #[derive(Serialize, Deserialize)]
    struct TsHolder {
        #[serde(
            serialize_with = "serialize_epoch_seconds",
            deserialize_with = "deserialize_epoch_seconds"
        )]
        at: DateTime<Utc>,
    }

    #[test]
    fn test_epoch_seconds_round_trip() {
        let value = serde_json::json!({ "at": 1480555620.5 });
        let holder: TsHolder = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(1480555620500, holder.at.timestamp_millis());
        assert_eq!(value, serde_json::to_value(&holder).unwrap());
    }
}

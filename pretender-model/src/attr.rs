use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::custom_serde::{
    deserialize_base64, deserialize_base64_vec, serialize_base64, serialize_base64_vec,
};

/// Maximum serialized item size accepted by the engine, in bytes.
pub const MAX_ITEM_SIZE: usize = 400 * 1024;

/// Maximum length of an attribute name.
pub const MAX_ATTRIBUTE_NAME_LEN: usize = 255;

/// An item is a mapping from attribute names to attribute values.
///
/// Insertion order is material on the wire but not persisted, so a plain
/// `HashMap` is the right carrier.
pub type Item = HashMap<String, AttributeValue>;

/// A DynamoDB attribute value.
///
/// The serde representation is exactly the canonical JSON form: one object
/// with a single entry whose key is the type tag. Binary payloads are
/// base64 strings in the JSON form and raw bytes in memory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// A string.
    #[serde(rename = "S")]
    S(String),
    /// A number, kept in its lexical decimal form.
    #[serde(rename = "N")]
    N(String),
    /// Binary bytes.
    #[serde(rename = "B")]
    B(
        #[serde(serialize_with = "serialize_base64", deserialize_with = "deserialize_base64")]
        Vec<u8>,
    ),
    /// A boolean.
    #[serde(rename = "BOOL")]
    Bool(bool),
    /// The null marker.
    #[serde(rename = "NULL")]
    Null(bool),
    /// A set of strings.
    #[serde(rename = "SS")]
    Ss(Vec<String>),
    /// A set of numbers in lexical form.
    #[serde(rename = "NS")]
    Ns(Vec<String>),
    /// A set of binary values.
    #[serde(rename = "BS")]
    Bs(
        #[serde(
            serialize_with = "serialize_base64_vec",
            deserialize_with = "deserialize_base64_vec"
        )]
        Vec<Vec<u8>>,
    ),
    /// An ordered list of attribute values.
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
    /// A string-keyed map of attribute values.
    #[serde(rename = "M")]
    M(HashMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Whether this value may be used as a key attribute (S, N, or B).
    pub fn is_scalar_key(&self) -> bool {
        matches!(self, AttributeValue::S(_) | AttributeValue::N(_) | AttributeValue::B(_))
    }

    /// The one-letter type tag of this value in the canonical JSON form.
    pub fn type_tag(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::B(_) => "B",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null(_) => "NULL",
            AttributeValue::Ss(_) => "SS",
            AttributeValue::Ns(_) => "NS",
            AttributeValue::Bs(_) => "BS",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
        }
    }

    /// Render a scalar key value in the stored lexical form.
    ///
    /// S and N keys use their lexical form directly; B keys use the UTF-8
    /// rendering of the bytes.
    pub fn key_string(&self) -> Option<String> {
        match self {
            AttributeValue::S(s) => Some(s.clone()),
            AttributeValue::N(n) => Some(n.clone()),
            AttributeValue::B(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }
}

/// Errors raised by the attribute codec.
#[derive(Debug, thiserror::Error)]
pub enum AttributeError {
    /// A key attribute named by the table schema is missing from the item.
    #[error("missing key attribute {0}")]
    MissingKey(String),
    /// A key attribute is present but is not of a scalar key type.
    #[error("key attribute {0} must be of type S, N or B")]
    NonScalarKey(String),
    /// An attribute name is longer than the service accepts.
    #[error("attribute name exceeds {MAX_ATTRIBUTE_NAME_LEN} characters")]
    NameTooLong,
    /// A set value contains a duplicate member.
    #[error("set attribute {0} contains duplicate members")]
    DuplicateSetMember(String),
    /// The serialized item exceeds the maximum size.
    #[error("item size {0} exceeds the {MAX_ITEM_SIZE} byte limit")]
    ItemTooLarge(usize),
    /// The canonical JSON payload could not be encoded or decoded.
    #[error("malformed attribute payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode an item into its canonical JSON rendering.
pub fn to_json(item: &Item) -> Result<String, AttributeError> {
    Ok(serde_json::to_string(item)?)
}

/// Decode an item from its canonical JSON rendering.
///
/// Strict on unknown type tags: a blob carrying a tag this version does
/// not know fails to decode rather than passing through.
pub fn from_json(json: &str) -> Result<Item, AttributeError> {
    Ok(serde_json::from_str(json)?)
}

/// The length of the canonical JSON rendering in UTF-8 bytes.
pub fn encoded_size(item: &Item) -> Result<usize, AttributeError> {
    Ok(to_json(item)?.len())
}

/// Pull the named key attribute out of an item.
///
/// Fails when the attribute is missing or not a scalar key type.
pub fn extract_key_value<'a>(item: &'a Item, key_name: &str) -> Result<&'a AttributeValue, AttributeError> {
    let value = item
        .get(key_name)
        .ok_or_else(|| AttributeError::MissingKey(key_name.to_string()))?;
    if !value.is_scalar_key() {
        return Err(AttributeError::NonScalarKey(key_name.to_string()));
    }
    Ok(value)
}

/// Structural validation applied to every incoming item: attribute name
/// lengths, set uniqueness, and the total serialized size.
pub fn validate_item(item: &Item) -> Result<(), AttributeError> {
    for (name, value) in item {
        if name.len() > MAX_ATTRIBUTE_NAME_LEN {
            return Err(AttributeError::NameTooLong);
        }
        validate_value(name, value)?;
    }
    let size = encoded_size(item)?;
    if size > MAX_ITEM_SIZE {
        return Err(AttributeError::ItemTooLarge(size));
    }
    Ok(())
}

fn validate_value(name: &str, value: &AttributeValue) -> Result<(), AttributeError> {
    match value {
        AttributeValue::Ss(members) => check_unique(name, members.iter())?,
        AttributeValue::Ns(members) => check_unique(name, members.iter())?,
        AttributeValue::Bs(members) => check_unique(name, members.iter())?,
        AttributeValue::L(values) => {
            for v in values {
                validate_value(name, v)?;
            }
        }
        AttributeValue::M(map) => {
            for (k, v) in map {
                if k.len() > MAX_ATTRIBUTE_NAME_LEN {
                    return Err(AttributeError::NameTooLong);
                }
                validate_value(name, v)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_unique<'a, T, I>(name: &str, members: I) -> Result<(), AttributeError>
where
    T: std::hash::Hash + Eq + 'a,
    I: Iterator<Item = &'a T>,
{
    let mut seen = HashSet::new();
    for member in members {
        if !seen.insert(member) {
            return Err(AttributeError::DuplicateSetMember(name.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_string_attribute() {
        let value = serde_json::json!({ "S": "value" });
        let attr: AttributeValue = serde_json::from_value(value.clone()).unwrap();
        match attr {
            AttributeValue::S(ref s) => assert_eq!("value", s.as_str()),
            other => panic!("unexpected value {:?}", other),
        }
        assert_eq!(value, serde_json::to_value(attr).unwrap());
    }

    #[test]
    fn test_number_attribute() {
        let value = serde_json::json!({ "N": "123.45" });
        let attr: AttributeValue = serde_json::from_value(value.clone()).unwrap();
        match attr {
            AttributeValue::N(ref n) => assert_eq!("123.45", n.as_str()),
            other => panic!("unexpected value {:?}", other),
        }
        assert_eq!(value, serde_json::to_value(attr).unwrap());
    }

    #[test]
    fn test_binary_attribute_is_base64_in_json() {
        let value = serde_json::json!({ "B": "dGhpcyB0ZXh0IGlzIGJhc2U2NC1lbmNvZGVk" });
        let attr: AttributeValue = serde_json::from_value(value.clone()).unwrap();
        match attr {
            AttributeValue::B(ref b) => assert_eq!(b"this text is base64-encoded".to_vec(), *b),
            other => panic!("unexpected value {:?}", other),
        }
        assert_eq!(value, serde_json::to_value(attr).unwrap());
    }

    #[test]
    fn test_null_and_bool_attributes() {
        let null: AttributeValue = serde_json::from_value(serde_json::json!({ "NULL": true })).unwrap();
        assert_eq!(AttributeValue::Null(true), null);
        let flag: AttributeValue = serde_json::from_value(serde_json::json!({ "BOOL": false })).unwrap();
        assert_eq!(AttributeValue::Bool(false), flag);
    }

    #[test]
    fn test_nested_list_and_map_round_trip() {
        let value = serde_json::json!({
            "M": {
                "scores": { "L": [ { "N": "1" }, { "N": "2" } ] },
                "name": { "S": "Joe" }
            }
        });
        let attr: AttributeValue = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(value, serde_json::to_value(attr).unwrap());
    }

    #[test]
    fn test_unknown_type_tag_is_rejected() {
        let result: Result<AttributeValue, _> = serde_json::from_value(serde_json::json!({ "Q": "nope" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_item_round_trip_is_stable() {
        let mut item = Item::new();
        item.insert("id".into(), AttributeValue::S("u1".into()));
        item.insert("age".into(), AttributeValue::N("30".into()));
        item.insert(
            "tags".into(),
            AttributeValue::Ss(vec!["a".into(), "b".into()]),
        );
        let json = to_json(&item).unwrap();
        let decoded = from_json(&json).unwrap();
        assert_eq!(item, decoded);
        assert_eq!(to_json(&decoded).unwrap().len(), encoded_size(&item).unwrap());
    }

    #[test]
    fn test_extract_key_value() {
        let mut item = Item::new();
        item.insert("id".into(), AttributeValue::S("u1".into()));
        item.insert("meta".into(), AttributeValue::Bool(true));

        let key = extract_key_value(&item, "id").unwrap();
        assert_eq!(Some("u1".to_string()), key.key_string());

        assert!(matches!(
            extract_key_value(&item, "missing"),
            Err(AttributeError::MissingKey(_))
        ));
        assert!(matches!(
            extract_key_value(&item, "meta"),
            Err(AttributeError::NonScalarKey(_))
        ));
    }

    #[test]
    fn test_duplicate_set_members_rejected() {
        let mut item = Item::new();
        item.insert(
            "tags".into(),
            AttributeValue::Ss(vec!["a".into(), "a".into()]),
        );
        assert!(matches!(
            validate_item(&item),
            Err(AttributeError::DuplicateSetMember(_))
        ));
    }
}

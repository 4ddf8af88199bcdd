use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a stream emits for each change on a stream-enabled table.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamViewType {
    NewImage,
    OldImage,
    NewAndOldImages,
    KeysOnly,
}

impl StreamViewType {
    /// Whether records for this view carry the post-change image.
    pub fn wants_new_image(&self) -> bool {
        matches!(self, StreamViewType::NewImage | StreamViewType::NewAndOldImages)
    }

    /// Whether records for this view carry the pre-change image.
    pub fn wants_old_image(&self) -> bool {
        matches!(self, StreamViewType::OldImage | StreamViewType::NewAndOldImages)
    }
}

impl fmt::Display for StreamViewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let val = match self {
            StreamViewType::NewImage => "NEW_IMAGE",
            StreamViewType::OldImage => "OLD_IMAGE",
            StreamViewType::NewAndOldImages => "NEW_AND_OLD_IMAGES",
            StreamViewType::KeysOnly => "KEYS_ONLY",
        };
        write!(f, "{}", val)
    }
}

/// How much of the base item a secondary index copies.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectionType {
    All,
    KeysOnly,
    Include,
}

impl fmt::Display for ProjectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let val = match self {
            ProjectionType::All => "ALL",
            ProjectionType::KeysOnly => "KEYS_ONLY",
            ProjectionType::Include => "INCLUDE",
        };
        write!(f, "{}", val)
    }
}

/// The role of an attribute in a key schema.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    Hash,
    Range,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let val = match self {
            KeyType::Hash => "HASH",
            KeyType::Range => "RANGE",
        };
        write!(f, "{}", val)
    }
}

/// The declared type of a key attribute.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ScalarAttributeType {
    /// String.
    S,
    /// Number.
    N,
    /// Binary.
    B,
}

/// Lifecycle state of a table as reported by the control plane.
///
/// Locally-provisioned tables become ACTIVE before CreateTable returns;
/// the transient states exist for description fidelity only.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    Creating,
    Active,
    Updating,
    Deleting,
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let val = match self {
            TableStatus::Creating => "CREATING",
            TableStatus::Active => "ACTIVE",
            TableStatus::Updating => "UPDATING",
            TableStatus::Deleting => "DELETING",
        };
        write!(f, "{}", val)
    }
}

/// Metadata for one global secondary index, as stored in the metadata
/// relation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub index_name: String,
    pub hash_key: String,
    #[serde(default)]
    pub sort_key: Option<String>,
    pub projection_type: ProjectionType,
    /// Non-key attributes copied into the index. Only meaningful with
    /// [`ProjectionType::Include`].
    #[serde(default)]
    pub non_key_attributes: Vec<String>,
}

/// The persisted descriptor for one table.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    pub table_name: String,
    pub hash_key: String,
    pub hash_key_type: ScalarAttributeType,
    #[serde(default)]
    pub sort_key: Option<String>,
    #[serde(default)]
    pub sort_key_type: Option<ScalarAttributeType>,
    #[serde(default)]
    pub global_secondary_indexes: Vec<IndexMetadata>,
    #[serde(default)]
    pub ttl_attribute: Option<String>,
    #[serde(default)]
    pub ttl_enabled: bool,
    #[serde(default)]
    pub stream_enabled: bool,
    #[serde(default)]
    pub stream_view_type: Option<StreamViewType>,
    pub created_at: DateTime<Utc>,
}

/// Errors raised by metadata validation.
#[derive(Debug, thiserror::Error)]
pub enum TableMetadataError {
    #[error("table name must be 3-255 characters from [A-Za-z0-9_.-]: {0}")]
    InvalidName(String),
    #[error("hash key and sort key must name different attributes")]
    DuplicateKeyAttribute,
    #[error("index name {0} is declared more than once")]
    DuplicateIndexName(String),
    #[error("the time-to-live attribute may not be a key attribute")]
    TtlOnKeyAttribute,
    #[error("index {0} declares non-key attributes without an INCLUDE projection")]
    NonKeyAttributesWithoutInclude(String),
}

/// Whether a name is a legal table name.
pub fn valid_table_name(name: &str) -> bool {
    (3..=255).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

impl TableMetadata {
    /// Check the §3 invariants: legal name, distinct key attributes,
    /// unique index names, and a TTL attribute that is not a key.
    pub fn validate(&self) -> Result<(), TableMetadataError> {
        if !valid_table_name(&self.table_name) {
            return Err(TableMetadataError::InvalidName(self.table_name.clone()));
        }
        if Some(&self.hash_key) == self.sort_key.as_ref() {
            return Err(TableMetadataError::DuplicateKeyAttribute);
        }
        let mut names = std::collections::HashSet::new();
        for index in &self.global_secondary_indexes {
            if !names.insert(&index.index_name) {
                return Err(TableMetadataError::DuplicateIndexName(index.index_name.clone()));
            }
            if index.projection_type != ProjectionType::Include && !index.non_key_attributes.is_empty() {
                return Err(TableMetadataError::NonKeyAttributesWithoutInclude(
                    index.index_name.clone(),
                ));
            }
        }
        if let Some(ttl) = &self.ttl_attribute {
            if ttl == &self.hash_key || Some(ttl) == self.sort_key.as_ref() {
                return Err(TableMetadataError::TtlOnKeyAttribute);
            }
        }
        Ok(())
    }

    /// Whether the named attribute is one of the table's key attributes.
    pub fn is_key_attribute(&self, name: &str) -> bool {
        name == self.hash_key || Some(name) == self.sort_key.as_deref()
    }

    /// Look up a secondary index by name.
    pub fn index(&self, index_name: &str) -> Option<&IndexMetadata> {
        self.global_secondary_indexes
            .iter()
            .find(|i| i.index_name == index_name)
    }

    /// The stream label used in this table's stream ARN, derived from the
    /// creation timestamp the way the service derives it.
    pub fn stream_label(&self) -> String {
        self.created_at.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
    }

    /// The ARN of this table's stream, when streams are enabled.
    pub fn stream_arn(&self) -> Option<String> {
        if self.stream_enabled {
            Some(format!(
                "arn:aws:dynamodb:local:000000000000:table/{}/stream/{}",
                self.table_name,
                self.stream_label()
            ))
        } else {
            None
        }
    }
}

/// Parse the table name out of a stream ARN produced by
/// [`TableMetadata::stream_arn`].
pub fn table_name_from_stream_arn(arn: &str) -> Option<&str> {
    let rest = arn.split(":table/").nth(1)?;
    rest.split("/stream/").next().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn meta() -> TableMetadata {
        TableMetadata {
            table_name: "Users".into(),
            hash_key: "id".into(),
            hash_key_type: ScalarAttributeType::S,
            sort_key: None,
            sort_key_type: None,
            global_secondary_indexes: Vec::new(),
            ttl_attribute: None,
            ttl_enabled: false,
            stream_enabled: false,
            stream_view_type: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_stream_view_type_wire_form() {
        assert_eq!(
            serde_json::json!("NEW_AND_OLD_IMAGES"),
            serde_json::to_value(StreamViewType::NewAndOldImages).unwrap()
        );
        assert_eq!("KEYS_ONLY", StreamViewType::KeysOnly.to_string());
    }

    #[test]
    fn test_table_name_charset() {
        assert!(valid_table_name("orders-2024.archive_1"));
        assert!(!valid_table_name("ab"));
        assert!(!valid_table_name("bad name"));
    }

    #[test]
    fn test_validate_rejects_ttl_on_key() {
        let mut m = meta();
        m.ttl_attribute = Some("id".into());
        assert!(matches!(m.validate(), Err(TableMetadataError::TtlOnKeyAttribute)));
    }

    #[test]
    fn test_validate_rejects_duplicate_index_names() {
        let mut m = meta();
        let index = IndexMetadata {
            index_name: "by-email".into(),
            hash_key: "email".into(),
            sort_key: None,
            projection_type: ProjectionType::All,
            non_key_attributes: Vec::new(),
        };
        m.global_secondary_indexes = vec![index.clone(), index];
        assert!(matches!(m.validate(), Err(TableMetadataError::DuplicateIndexName(_))));
    }

    #[test]
    fn test_stream_arn_round_trip() {
        let mut m = meta();
        m.stream_enabled = true;
        let arn = m.stream_arn().unwrap();
        assert_eq!(Some("Users"), table_name_from_stream_arn(&arn));
    }
}

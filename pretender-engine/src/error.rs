use pretender_model::attr::AttributeError;
use pretender_model::table::TableMetadataError;
use serde::Serialize;

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Why one leg of a write transaction was cancelled.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CancellationReason {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CancellationReason {
    /// The reason attached to legs that did not fail.
    pub fn none() -> Self {
        CancellationReason {
            code: "None".to_string(),
            message: None,
        }
    }
}

/// The engine error taxonomy, mapped one-to-one onto the DynamoDB
/// exception names a client sees.
///
/// Cryptographic failures deliberately fold into
/// [`EngineError::Internal`]: surfacing them as anything recoverable
/// could mask tampering.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A malformed expression, missing key attribute, illegal attribute
    /// type, oversized item, or any other rejected input.
    #[error("{0}")]
    Validation(String),
    /// CreateTable on a name that already exists.
    #[error("Table already exists: {0}")]
    ResourceInUse(String),
    /// An operation on an unknown table or stream.
    #[error("Requested resource not found: {0}")]
    ResourceNotFound(String),
    /// A ConditionExpression rejected the mutation.
    #[error("The conditional request failed")]
    ConditionalCheckFailed,
    /// One leg of a transaction failed; carries a reason per leg.
    #[error("Transaction cancelled, please refer cancellation reasons for specific reasons")]
    TransactionCanceled(Vec<CancellationReason>),
    /// The iterator was issued before the shard was last trimmed.
    #[error("Iterator expired")]
    ExpiredIterator,
    /// The requested sequence number is below the trim horizon.
    #[error("Requested sequence number is below the trim horizon")]
    TrimmedDataAccess,
    /// Reserved for API compatibility; this implementation never emits it.
    #[error("The level of configured provisioned throughput for the table was exceeded")]
    ProvisionedThroughputExceeded,
    /// The per-request deadline elapsed before the operation finished.
    #[error("The request took longer than its configured deadline")]
    RequestTimeout,
    /// Any unclassified failure.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// The wire rendering of an error, matching the AWS JSON error envelope.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorShape {
    #[serde(rename = "__type")]
    pub error_type: String,
    pub message: String,
    #[serde(rename = "CancellationReasons", skip_serializing_if = "Option::is_none")]
    pub cancellation_reasons: Option<Vec<CancellationReason>>,
}

impl EngineError {
    /// The exception name a DynamoDB client expects for this error.
    pub fn error_name(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "ValidationException",
            EngineError::ResourceInUse(_) => "ResourceInUseException",
            EngineError::ResourceNotFound(_) => "ResourceNotFoundException",
            EngineError::ConditionalCheckFailed => "ConditionalCheckFailedException",
            EngineError::TransactionCanceled(_) => "TransactionCanceledException",
            EngineError::ExpiredIterator => "ExpiredIteratorException",
            EngineError::TrimmedDataAccess => "TrimmedDataAccessException",
            EngineError::ProvisionedThroughputExceeded => "ProvisionedThroughputExceededException",
            EngineError::RequestTimeout => "RequestTimeout",
            EngineError::Internal(_) => "InternalServerError",
        }
    }

    /// Render this error into the AWS JSON error envelope.
    pub fn wire_shape(&self) -> ErrorShape {
        ErrorShape {
            error_type: format!("com.amazonaws.dynamodb.v20120810#{}", self.error_name()),
            message: self.to_string(),
            cancellation_reasons: match self {
                EngineError::TransactionCanceled(reasons) => Some(reasons.clone()),
                _ => None,
            },
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<AttributeError> for EngineError {
    fn from(err: AttributeError) -> Self {
        match err {
            AttributeError::Malformed(inner) => EngineError::Internal(inner.to_string()),
            other => EngineError::Validation(other.to_string()),
        }
    }
}

impl From<TableMetadataError> for EngineError {
    fn from(err: TableMetadataError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_names_match_the_service_model() {
        assert_eq!(
            "ConditionalCheckFailedException",
            EngineError::ConditionalCheckFailed.error_name()
        );
        assert_eq!(
            "ResourceInUseException",
            EngineError::ResourceInUse("Users".into()).error_name()
        );
    }

    #[test]
    fn wire_shape_carries_cancellation_reasons() {
        let err = EngineError::TransactionCanceled(vec![
            CancellationReason::none(),
            CancellationReason {
                code: "ConditionalCheckFailed".into(),
                message: Some("The conditional request failed".into()),
            },
        ]);
        let shape = serde_json::to_value(err.wire_shape()).unwrap();
        assert_eq!(
            "com.amazonaws.dynamodb.v20120810#TransactionCanceledException",
            shape["__type"]
        );
        assert_eq!("None", shape["CancellationReasons"][0]["Code"]);
        assert_eq!("ConditionalCheckFailed", shape["CancellationReasons"][1]["Code"]);
    }

    #[test]
    fn attribute_errors_map_to_validation() {
        let err: EngineError = AttributeError::MissingKey("id".into()).into();
        assert_eq!("ValidationException", err.error_name());
    }
}

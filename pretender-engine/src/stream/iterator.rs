use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::Mac;
use serde::{Deserialize, Serialize};

use pretender_model::stream::ShardIteratorType;

use crate::crypto::{EncryptionCore, HmacSha256};
use crate::error::{EngineError, Result};

/// The single shard every stream exposes.
pub const SHARD_ID: &str = "shard-00000";

/// The decoded contents of an opaque shard iterator.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IteratorPayload {
    pub table_name: String,
    pub shard_id: String,
    pub iterator_type: ShardIteratorType,
    pub sequence_number: Option<i64>,
    /// When the iterator was handed out; iterators issued before the last
    /// trim are expired.
    pub issued_at: i64,
}

/// Encodes iterators as Base64URL JSON with an HMAC tag, so a tampered
/// or forged iterator is rejected instead of decoded.
#[derive(Clone)]
pub(crate) struct IteratorCodec {
    mac_key: [u8; 32],
}

impl std::fmt::Debug for IteratorCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IteratorCodec").finish_non_exhaustive()
    }
}

impl IteratorCodec {
    pub(crate) fn new(core: &EncryptionCore) -> Self {
        IteratorCodec {
            mac_key: core.derive_key("pretender:shard-iterator"),
        }
    }

    pub(crate) fn encode(&self, payload: &IteratorPayload) -> Result<String> {
        let body = serde_json::to_vec(payload)?;
        let mut mac = HmacSha256::new_from_slice(&self.mac_key)
            .expect("HMAC accepts keys of any length");
        mac.update(&body);
        let tag = mac.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&body),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    pub(crate) fn decode(&self, iterator: &str) -> Result<IteratorPayload> {
        let invalid = || EngineError::Validation("Invalid ShardIterator".to_string());
        let (body, tag) = iterator.split_once('.').ok_or_else(invalid)?;
        let body = URL_SAFE_NO_PAD.decode(body).map_err(|_| invalid())?;
        let tag = URL_SAFE_NO_PAD.decode(tag).map_err(|_| invalid())?;
        let mut mac = HmacSha256::new_from_slice(&self.mac_key)
            .expect("HMAC accepts keys of any length");
        mac.update(&body);
        mac.verify_slice(&tag).map_err(|_| invalid())?;
        serde_json::from_slice(&body).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> IteratorCodec {
        IteratorCodec::new(&EncryptionCore::new(&[3u8; 32]).unwrap())
    }

    fn payload() -> IteratorPayload {
        IteratorPayload {
            table_name: "Orders".into(),
            shard_id: SHARD_ID.into(),
            iterator_type: ShardIteratorType::AfterSequenceNumber,
            sequence_number: Some(7),
            issued_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn round_trip() {
        let codec = codec();
        let encoded = codec.encode(&payload()).unwrap();
        assert_eq!(payload(), codec.decode(&encoded).unwrap());
    }

    #[test]
    fn tampered_iterators_are_rejected() {
        let codec = codec();
        let encoded = codec.encode(&payload()).unwrap();
        let mut bytes = encoded.into_bytes();
        bytes[10] = if bytes[10] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert!(codec.decode(&tampered).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(codec().decode("not-an-iterator").is_err());
    }

    #[test]
    fn iterators_are_bound_to_the_master_key() {
        let encoded = codec().encode(&payload()).unwrap();
        let other = IteratorCodec::new(&EncryptionCore::new(&[4u8; 32]).unwrap());
        assert!(other.decode(&encoded).is_err());
    }
}

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Legal master-key sizes in bytes (128, 192, and 256 bits).
pub const KEY_SIZES: [usize; 3] = [16, 24, 32];

/// The envelope a keys service may wrap raw key material in.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionEnvelope {
    pub key_id: String,
    pub encrypted_data: String,
    pub encrypted_key: String,
    pub iv: String,
    pub algorithm: String,
    pub auth_tag: String,
}

/// Key material issued by the external keys service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMaterial {
    pub uuid: String,
    /// Hex-encoded key bytes.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_envelope: Option<EncryptionEnvelope>,
}

impl KeyMaterial {
    /// Decode and size-check the raw key bytes.
    pub fn key_bytes(&self) -> Result<Vec<u8>> {
        let bytes = hex::decode(&self.key)
            .map_err(|_| EngineError::Validation("key material must be hex-encoded".to_string()))?;
        if !KEY_SIZES.contains(&bytes.len()) {
            return Err(EngineError::Validation(
                "key material must be 128, 192 or 256 bits".to_string(),
            ));
        }
        Ok(bytes)
    }
}

/// Where the engine master key comes from when the deployment delegates
/// issuance to a keys service. The bootstrap implements this over
/// whatever transport it uses and hands the engine the result.
pub trait MasterKeySource {
    /// Fetch the current master key material.
    fn master_key(&self) -> Result<KeyMaterial>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_material_parses_the_service_response() {
        let material: KeyMaterial = serde_json::from_value(serde_json::json!({
            "uuid": "5c4f3a09-1c43-4b62-9d8e-3e2f4d1a9b10",
            "key": "00".repeat(32),
            "encryptionEnvelope": {
                "keyId": "k1",
                "encryptedData": "",
                "encryptedKey": "",
                "iv": "",
                "algorithm": "AES/GCM/NoPadding",
                "authTag": ""
            }
        }))
        .unwrap();
        assert_eq!(32, material.key_bytes().unwrap().len());
    }

    #[test]
    fn odd_key_sizes_are_rejected() {
        let material = KeyMaterial {
            uuid: "u".into(),
            key: "00".repeat(20),
            encryption_envelope: None,
        };
        assert!(material.key_bytes().is_err());
    }
}

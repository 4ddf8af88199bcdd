//! Attribute-level envelope encryption.
//!
//! Each selected attribute is sealed with AES-256-GCM under a key derived
//! from the process master key with HMAC-SHA-256 over `table:attribute`.
//! The same `table:attribute` string is the additional authenticated
//! data, so a ciphertext moved to another table or attribute fails to
//! open.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use pretender_model::attr::AttributeValue;

mod attrs;

pub use attrs::AttributeEncryptor;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Size of the root key in bytes.
pub const MASTER_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Errors raised by the encryption core.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The master key is not exactly [`MASTER_KEY_LEN`] bytes.
    #[error("master key must be {MASTER_KEY_LEN} bytes")]
    InvalidKeySize,
    /// List and map values cannot be encrypted.
    #[error("attribute values of type {0} cannot be encrypted")]
    UnsupportedType(&'static str),
    /// The ciphertext is malformed or failed authentication.
    #[error("ciphertext is malformed or has been tampered with")]
    Failure,
}

impl From<CryptoError> for crate::error::EngineError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKeySize | CryptoError::UnsupportedType(_) => {
                crate::error::EngineError::Validation(err.to_string())
            }
            // Never surfaced as a recoverable condition: that could mask
            // tampering.
            CryptoError::Failure => crate::error::EngineError::Internal(err.to_string()),
        }
    }
}

/// Authenticated encryption over individual attribute values.
#[derive(Clone)]
pub struct EncryptionCore {
    master_key: [u8; MASTER_KEY_LEN],
}

impl std::fmt::Debug for EncryptionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionCore").finish_non_exhaustive()
    }
}

impl EncryptionCore {
    /// Build a core over the given master key.
    pub fn new(master_key: &[u8]) -> Result<Self, CryptoError> {
        let master_key: [u8; MASTER_KEY_LEN] =
            master_key.try_into().map_err(|_| CryptoError::InvalidKeySize)?;
        Ok(EncryptionCore { master_key })
    }

    /// Build a core over a freshly drawn random key.
    pub fn generate() -> Self {
        let mut master_key = [0u8; MASTER_KEY_LEN];
        OsRng.fill_bytes(&mut master_key);
        EncryptionCore { master_key }
    }

    /// Derive the key for one `table:attribute` pair, or for any other
    /// engine-internal purpose string.
    pub(crate) fn derive_key(&self, context: &str) -> [u8; 32] {
        let mut mac = <HmacSha256 as KeyInit>::new_from_slice(&self.master_key)
            .expect("HMAC accepts keys of any length");
        mac.update(context.as_bytes());
        mac.finalize().into_bytes().into()
    }

    /// Seal one attribute value. The output layout is
    /// `IV(12) || ciphertext || tag(16)`.
    pub fn encrypt_value(
        &self,
        table: &str,
        attribute: &str,
        value: &AttributeValue,
    ) -> Result<Vec<u8>, CryptoError> {
        match value {
            AttributeValue::L(_) | AttributeValue::M(_) => {
                return Err(CryptoError::UnsupportedType(value.type_tag()))
            }
            _ => {}
        }
        // The plaintext keeps the type tag so decryption can restore the
        // original variant.
        let plaintext = serde_json::to_vec(value).map_err(|_| CryptoError::Failure)?;
        let context = format!("{}:{}", table, attribute);
        let key = self.derive_key(&context);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: context.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Failure)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a sealed attribute value and restore its original variant.
    pub fn decrypt_value(
        &self,
        table: &str,
        attribute: &str,
        blob: &[u8],
    ) -> Result<AttributeValue, CryptoError> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Failure);
        }
        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let context = format!("{}:{}", table, attribute);
        let key = self.derive_key(&context);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: context.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Failure)?;
        serde_json::from_slice(&plaintext).map_err(|_| CryptoError::Failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> EncryptionCore {
        EncryptionCore::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn construction_checks_the_key_size() {
        assert!(matches!(
            EncryptionCore::new(&[0u8; 16]),
            Err(CryptoError::InvalidKeySize)
        ));
        assert!(EncryptionCore::new(&[0u8; 32]).is_ok());
    }

    #[test]
    fn round_trip_restores_the_variant() {
        let core = core();
        for value in [
            AttributeValue::S("111-22-3333".into()),
            AttributeValue::N("42.5".into()),
            AttributeValue::B(vec![0, 1, 2, 255]),
            AttributeValue::Bool(true),
            AttributeValue::Ss(vec!["a".into(), "b".into()]),
        ] {
            let sealed = core.encrypt_value("Users", "ssn", &value).unwrap();
            assert!(sealed.len() >= NONCE_LEN + TAG_LEN);
            let opened = core.decrypt_value("Users", "ssn", &sealed).unwrap();
            assert_eq!(value, opened);
        }
    }

    #[test]
    fn ciphertext_is_bound_to_table_and_attribute() {
        let core = core();
        let sealed = core
            .encrypt_value("Users", "ssn", &AttributeValue::S("s".into()))
            .unwrap();
        assert!(core.decrypt_value("Accounts", "ssn", &sealed).is_err());
        assert!(core.decrypt_value("Users", "email", &sealed).is_err());
    }

    #[test]
    fn tampering_is_detected() {
        let core = core();
        let mut sealed = core
            .encrypt_value("Users", "ssn", &AttributeValue::S("s".into()))
            .unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            core.decrypt_value("Users", "ssn", &sealed),
            Err(CryptoError::Failure)
        ));
    }

    #[test]
    fn lists_and_maps_are_refused() {
        let core = core();
        let err = core
            .encrypt_value("Users", "profile", &AttributeValue::L(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedType("L")));
    }

    #[test]
    fn different_master_keys_do_not_interoperate() {
        let sealed = core()
            .encrypt_value("Users", "ssn", &AttributeValue::S("s".into()))
            .unwrap();
        let other = EncryptionCore::new(&[8u8; 32]).unwrap();
        assert!(other.decrypt_value("Users", "ssn", &sealed).is_err());
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use pretender_model::attr::{AttributeValue, Item};
use pretender_model::table::TableMetadata;

use crate::config::TableEncryptionConfig;
use crate::error::{EngineError, Result};

use super::EncryptionCore;

/// Applies the per-table encryption config to items on their way in and
/// out of storage.
///
/// The config map is read on every data-plane operation and written only
/// when a table's config changes, so it sits behind a read-write lock.
#[derive(Debug)]
pub struct AttributeEncryptor {
    core: EncryptionCore,
    tables: RwLock<HashMap<String, HashSet<String>>>,
}

impl AttributeEncryptor {
    /// Build an encryptor and install the startup config. Disabled table
    /// entries are skipped.
    pub fn new(core: EncryptionCore, configs: &[TableEncryptionConfig]) -> Self {
        let mut tables = HashMap::new();
        for config in configs.iter().filter(|c| c.enabled) {
            tables.insert(
                config.table_name.clone(),
                config.encrypted_attributes.iter().cloned().collect(),
            );
        }
        AttributeEncryptor {
            core,
            tables: RwLock::new(tables),
        }
    }

    /// Install or replace the config for one table, validating it against
    /// the table's key schema. A disabled config removes the entry.
    pub fn configure(&self, meta: &TableMetadata, config: &TableEncryptionConfig) -> Result<()> {
        for attribute in &config.encrypted_attributes {
            if meta.is_key_attribute(attribute) {
                return Err(EngineError::Validation(format!(
                    "key attribute {} cannot be encrypted",
                    attribute
                )));
            }
        }
        let mut tables = self.tables.write().expect("encryption config lock poisoned");
        if config.enabled {
            tables.insert(
                config.table_name.clone(),
                config.encrypted_attributes.iter().cloned().collect(),
            );
        } else {
            tables.remove(&config.table_name);
        }
        Ok(())
    }

    fn attributes_for(&self, table: &str) -> Option<HashSet<String>> {
        self.tables
            .read()
            .expect("encryption config lock poisoned")
            .get(table)
            .cloned()
    }

    /// Seal the configured attributes of an outgoing item. Key attributes
    /// are never touched: they are used for indexed lookup.
    pub fn encrypt_on_write(&self, meta: &TableMetadata, item: &Item) -> Result<Item> {
        let Some(attributes) = self.attributes_for(&meta.table_name) else {
            return Ok(item.clone());
        };
        let mut sealed = item.clone();
        for attribute in &attributes {
            if meta.is_key_attribute(attribute) {
                continue;
            }
            if let Some(value) = sealed.get(attribute) {
                let blob = self
                    .core
                    .encrypt_value(&meta.table_name, attribute, value)?;
                sealed.insert(attribute.clone(), AttributeValue::B(blob));
            }
        }
        Ok(sealed)
    }

    /// Open the configured attributes of an item read back from storage.
    /// Configured attributes that are not Binary are left alone; they
    /// were written before encryption was enabled.
    pub fn decrypt_on_read(&self, meta: &TableMetadata, mut item: Item) -> Result<Item> {
        let Some(attributes) = self.attributes_for(&meta.table_name) else {
            return Ok(item);
        };
        for attribute in &attributes {
            if let Some(AttributeValue::B(blob)) = item.get(attribute) {
                let value = self.core.decrypt_value(&meta.table_name, attribute, blob)?;
                item.insert(attribute.clone(), value);
            }
        }
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretender_model::table::ScalarAttributeType;

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
            created_at: Utc::now(),
        }
    }

    fn encryptor(attributes: &[&str]) -> AttributeEncryptor {
        let config = TableEncryptionConfig {
            table_name: "Users".into(),
            encrypted_attributes: attributes.iter().map(|s| s.to_string()).collect(),
            enabled: true,
        };
        AttributeEncryptor::new(EncryptionCore::new(&[9u8; 32]).unwrap(), &[config])
    }

    #[test]
    fn configured_attributes_round_trip() {
        let encryptor = encryptor(&["ssn"]);
        let mut item = Item::new();
        item.insert("id".into(), AttributeValue::S("u3".into()));
        item.insert("ssn".into(), AttributeValue::S("111-22-3333".into()));

        let sealed = encryptor.encrypt_on_write(&meta(), &item).unwrap();
        match sealed.get("ssn") {
            Some(AttributeValue::B(blob)) => assert!(blob.len() >= 28),
            other => panic!("ssn was not sealed: {:?}", other),
        }
        assert_eq!(Some(&AttributeValue::S("u3".into())), sealed.get("id"));

        let opened = encryptor.decrypt_on_read(&meta(), sealed).unwrap();
        assert_eq!(item, opened);
    }

    #[test]
    fn key_attributes_are_never_sealed() {
        let encryptor = encryptor(&["id", "ssn"]);
        let mut item = Item::new();
        item.insert("id".into(), AttributeValue::S("u3".into()));
        let sealed = encryptor.encrypt_on_write(&meta(), &item).unwrap();
        assert_eq!(Some(&AttributeValue::S("u3".into())), sealed.get("id"));
    }

    #[test]
    fn configure_rejects_key_attributes() {
        let encryptor = encryptor(&[]);
        let config = TableEncryptionConfig {
            table_name: "Users".into(),
            encrypted_attributes: vec!["id".into()],
            enabled: true,
        };
        assert!(encryptor.configure(&meta(), &config).is_err());
    }

    #[test]
    fn absent_attributes_are_skipped() {
        let encryptor = encryptor(&["ssn"]);
        let mut item = Item::new();
        item.insert("id".into(), AttributeValue::S("u4".into()));
        let sealed = encryptor.encrypt_on_write(&meta(), &item).unwrap();
        assert!(!sealed.contains_key("ssn"));
    }

    #[test]
    fn tampered_ciphertext_surfaces_as_internal_error() {
        let encryptor = encryptor(&["ssn"]);
        let mut item = Item::new();
        item.insert("ssn".into(), AttributeValue::S("111-22-3333".into()));
        let mut sealed = encryptor.encrypt_on_write(&meta(), &item).unwrap();
        if let Some(AttributeValue::B(blob)) = sealed.get_mut("ssn") {
            blob[14] ^= 0x01;
        }
        let err = encryptor.decrypt_on_read(&meta(), sealed).unwrap_err();
        assert_eq!("InternalServerError", err.error_name());
    }
}

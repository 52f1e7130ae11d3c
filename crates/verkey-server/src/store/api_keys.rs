use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use super::db::{decode, encode, Store};
use crate::error::Result;

pub(crate) const API_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("api_keys");

pub const API_KEY_PREFIX: &str = "vk_key_";

/// A non-admin credential. Only the SHA-256 of the raw key is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiKeyRecord {
    pub id: String,
    pub key_hash: Vec<u8>,
    pub label: String,
    pub created_at: i64,
}

impl ApiKeyRecord {
    /// Identity subject for requests made with this key; also the owner of
    /// apps it creates.
    pub fn subject(&self) -> String {
        format!("key:{}", self.id)
    }
}

/// Generate a new API key in the format `vk_key_<32 hex chars>`.
pub fn generate_api_key() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    format!("{API_KEY_PREFIX}{}", hex::encode(bytes))
}

/// Generate a short random ID for an API key record.
pub fn generate_key_id() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Hash a key with SHA-256 for storage lookup.
pub fn hash_key(key: &str) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    Sha256::digest(key.as_bytes()).to_vec()
}

impl Store {
    /// Insert an API key record.
    pub fn put_api_key(&self, record: &ApiKeyRecord) -> Result<()> {
        let bytes = encode(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(API_KEYS)?;
            table.insert(record.id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// List all API key records.
    pub fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(API_KEYS)?;

        let mut records = Vec::new();
        for item in table.iter()? {
            let (_k, v) = item?;
            records.push(decode(v.value())?);
        }
        Ok(records)
    }

    /// Delete an API key by ID. Returns true if it existed.
    pub fn delete_api_key(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(API_KEYS)?;
            let existed = table.remove(id)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// Find an API key record by its SHA-256 hash. Scans all records.
    pub fn find_api_key_by_hash(&self, hash: &[u8]) -> Result<Option<ApiKeyRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(API_KEYS)?;

        for item in table.iter()? {
            let (_k, v) = item?;
            let record: ApiKeyRecord = decode(v.value())?;
            if constant_time_eq::constant_time_eq(&record.key_hash, hash) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

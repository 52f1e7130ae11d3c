use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
};
use serde::{de::DeserializeOwned, Serialize};

use super::model::VersionRecord;
use crate::error::Result;

pub(crate) const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");
pub(crate) const VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("versions");
/// AKey -> VKey index over `VERSIONS`.
pub(crate) const APP_VERSIONS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("app_versions");
pub(crate) const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
const VERSION_SEQ_KEY: &str = "version_seq";

/// Thread-safe handle to the redb store.
///
/// Every mutating operation runs in a single write transaction. redb admits one
/// writer at a time and readers only see committed snapshots, so multi-row
/// changes (moving the latest flag, cascading deletes) are never observed half
/// applied.
#[derive(Clone)]
pub struct Store {
    pub(crate) db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure all tables exist.
        let write_txn = db.begin_write()?;
        write_txn.open_table(APPS)?;
        write_txn.open_table(VERSIONS)?;
        write_txn.open_multimap_table(APP_VERSIONS)?;
        write_txn.open_table(COUNTERS)?;
        write_txn.open_table(super::admin::ADMIN)?;
        write_txn.open_table(super::api_keys::API_KEYS)?;
        write_txn.open_table(super::announcements::ANNOUNCEMENTS)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    pub(crate) fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::standard(),
    )?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

/// Read and decode a single record.
pub(crate) fn read<T, R>(table: &T, key: &str) -> Result<Option<R>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
    R: DeserializeOwned,
{
    match table.get(key)? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// VKeys registered under `akey` in the index.
pub(crate) fn vkeys_of<M>(index: &M, akey: &str) -> Result<Vec<String>>
where
    M: ReadableMultimapTable<&'static str, &'static str>,
{
    let mut out = Vec::new();
    for item in index.get(akey)? {
        out.push(item?.value().to_owned());
    }
    Ok(out)
}

/// All versions of `akey`, most recently created first.
pub(crate) fn version_set<T, M>(
    versions: &T,
    index: &M,
    akey: &str,
) -> Result<Vec<(String, VersionRecord)>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
    M: ReadableMultimapTable<&'static str, &'static str>,
{
    let mut set = Vec::new();
    for vkey in vkeys_of(index, akey)? {
        let record: VersionRecord = read(versions, &vkey)?
            .with_context(|| format!("index points at missing version {vkey}"))?;
        set.push((vkey, record));
    }
    set.sort_by(|a, b| b.1.seq.cmp(&a.1.seq));
    Ok(set)
}

/// Allocate the next version sequence number.
pub(crate) fn next_version_seq(counters: &mut redb::Table<'_, &'static str, u64>) -> Result<u64> {
    let seq = counters
        .get(VERSION_SEQ_KEY)?
        .map(|g| g.value())
        .unwrap_or(0)
        + 1;
    counters.insert(VERSION_SEQ_KEY, seq)?;
    Ok(seq)
}

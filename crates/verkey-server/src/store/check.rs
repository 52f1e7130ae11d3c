//! Read-only answers for client checks on an (AKey, VKey) pair.
//!
//! Every check runs against one read snapshot, so it never sees a latest flag
//! half-way through being moved. "Not legal" is a normal result; only storage
//! failures are errors.

use chrono::{DateTime, Utc};
use redb::ReadableMultimapTable;
use serde::Serialize;

use super::db::{read, version_set, Store, APPS, APP_VERSIONS, VERSIONS};
use super::model::{AppRecord, VersionRecord};
use crate::error::Result;

/// Why a pair was rejected. Evaluated in declaration order; the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IllegalReason {
    /// The VKey exists but belongs to another app.
    AkeyMismatch,
    /// The AKey has no versions at all.
    AkeyNotFound,
    VkeyNotFound,
}

impl IllegalReason {
    pub fn message(&self) -> &'static str {
        match self {
            Self::AkeyMismatch => "AKey/VKey mismatch",
            Self::AkeyNotFound => "AKey not found",
            Self::VkeyNotFound => "VKey not found",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Legality {
    Legal {
        /// `None` only if the owning app record is missing.
        app_name: Option<String>,
        version: String,
    },
    Illegal(IllegalReason),
}

impl Legality {
    pub fn is_legal(&self) -> bool {
        matches!(self, Self::Legal { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateCheck {
    /// The pair is not legal. Deliberately carries no reason.
    Illegal,
    /// The given version is the latest one.
    UpToDate,
    /// The app has no version flagged latest.
    NoRelease,
    Available {
        latest_version: String,
        release_time: DateTime<Utc>,
        is_forced_update: bool,
    },
}

impl UpdateCheck {
    pub fn has_update(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

impl Store {
    /// Is `vkey` a version of `akey`?
    pub fn check_legality(&self, akey: &str, vkey: &str) -> Result<Legality> {
        let read_txn = self.db.begin_read()?;
        let apps = read_txn.open_table(APPS)?;
        let versions = read_txn.open_table(VERSIONS)?;
        let index = read_txn.open_multimap_table(APP_VERSIONS)?;

        let legality = match read::<_, VersionRecord>(&versions, vkey)? {
            Some(record) if record.akey == akey => {
                let app: Option<AppRecord> = read(&apps, akey)?;
                Legality::Legal {
                    app_name: app.map(|a| a.name),
                    version: record.version,
                }
            }
            Some(_) => Legality::Illegal(IllegalReason::AkeyMismatch),
            None if index.get(akey)?.next().is_none() => {
                Legality::Illegal(IllegalReason::AkeyNotFound)
            }
            None => Legality::Illegal(IllegalReason::VkeyNotFound),
        };
        Ok(legality)
    }

    /// Is there a newer version than `vkey` for `akey`?
    pub fn check_update(&self, akey: &str, vkey: &str) -> Result<UpdateCheck> {
        let read_txn = self.db.begin_read()?;
        let versions = read_txn.open_table(VERSIONS)?;
        let index = read_txn.open_multimap_table(APP_VERSIONS)?;

        let current = match read::<_, VersionRecord>(&versions, vkey)? {
            Some(record) if record.akey == akey => record,
            _ => return Ok(UpdateCheck::Illegal),
        };
        if current.is_latest {
            return Ok(UpdateCheck::UpToDate);
        }

        let latest = version_set(&versions, &index, akey)?
            .into_iter()
            .map(|(_, r)| r)
            .find(|r| r.is_latest);

        Ok(match latest {
            Some(latest) => UpdateCheck::Available {
                latest_version: latest.version,
                release_time: super::model::timestamp(latest.created_at),
                is_forced_update: latest.is_forced_update,
            },
            None => UpdateCheck::NoRelease,
        })
    }
}

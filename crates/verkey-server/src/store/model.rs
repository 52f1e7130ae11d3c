use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored in redb (keyed by AKey) as bincode-encoded bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppRecord {
    /// Subject of the identity that created the app.
    pub owner: String,
    pub name: String,
    pub description: String,
    pub is_paid: bool,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
    /// Unix timestamp (milliseconds).
    pub created_at: i64,
}

impl AppRecord {
    pub fn into_app(self, akey: String, version_count: u64) -> App {
        App {
            akey,
            owner: self.owner,
            name: self.name,
            description: self.description,
            is_paid: self.is_paid,
            is_banned: self.is_banned,
            ban_reason: self.ban_reason,
            created_at: timestamp(self.created_at),
            version_count,
        }
    }
}

/// Stored in redb (keyed by VKey) as bincode-encoded bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionRecord {
    pub akey: String,
    pub version: String,
    pub description: String,
    pub is_latest: bool,
    pub is_forced_update: bool,
    /// Unix timestamp (milliseconds).
    pub created_at: i64,
    /// Store-wide creation sequence; orders versions without timestamp ties.
    pub seq: u64,
}

impl VersionRecord {
    pub fn into_version(self, vkey: String) -> Version {
        Version {
            vkey,
            akey: self.akey,
            version: self.version,
            description: self.description,
            is_latest: self.is_latest,
            is_forced_update: self.is_forced_update,
            created_at: timestamp(self.created_at),
        }
    }
}

/// App as returned by the API, with its derived version count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub akey: String,
    pub owner: String,
    pub name: String,
    pub description: String,
    pub is_paid: bool,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub version_count: u64,
}

/// Version as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Version {
    pub vkey: String,
    pub akey: String,
    pub version: String,
    pub description: String,
    pub is_latest: bool,
    pub is_forced_update: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields for a version about to be created.
#[derive(Debug, Clone, Default)]
pub struct NewVersion {
    pub version: String,
    pub description: String,
    pub is_latest: bool,
    pub is_forced_update: bool,
}

/// Requested changes to a version. Empty strings leave the field untouched.
#[derive(Debug, Clone, Default)]
pub struct VersionUpdate {
    pub version: String,
    pub description: String,
    pub is_latest: bool,
    pub is_forced_update: bool,
}

/// Requested changes to an app. `None` and empty strings leave the field untouched.
#[derive(Debug, Clone, Default)]
pub struct AppUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_paid: Option<bool>,
}

/// Normalised pagination: page is 1-based, size is 1..=100 (default 10).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Page {
    pub page: usize,
    pub size: usize,
}

impl Page {
    pub const DEFAULT_SIZE: usize = 10;
    pub const MAX_SIZE: usize = 100;

    pub fn new(page: Option<i64>, size: Option<i64>) -> Self {
        let page = match page {
            Some(p) if p > 0 => p as usize,
            _ => 1,
        };
        let size = match size {
            Some(s) if s > 0 && s as usize <= Self::MAX_SIZE => s as usize,
            _ => Self::DEFAULT_SIZE,
        };
        Self { page, size }
    }

    /// Rows to skip. Saturates, so an absurd page number yields an empty page.
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Dashboard summary.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_apps: u64,
    pub total_versions: u64,
    pub recent_apps: Vec<App>,
    pub recent_versions: Vec<Version>,
}

pub(crate) fn timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

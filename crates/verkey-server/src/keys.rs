//! Public identifiers handed out for apps and versions.
//!
//! Both are a cosmetic prefix plus a random UUID. Uniqueness is enforced again
//! at insert time; a clash surfaces as a `Conflict` from the store.

use uuid::Uuid;

pub const AKEY_PREFIX: &str = "app_";
pub const VKEY_PREFIX: &str = "ver_";

/// Generate a new application key, e.g. `app_3f2b...`.
pub fn new_akey() -> String {
    format!("{AKEY_PREFIX}{}", Uuid::new_v4())
}

/// Generate a new version key, e.g. `ver_9c41...`.
pub fn new_vkey() -> String {
    format!("{VKEY_PREFIX}{}", Uuid::new_v4())
}

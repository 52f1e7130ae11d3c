//! Input checks for request payloads. All failures are `Error::Validation`.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 50;
const DESCRIPTION_MAX: usize = 500;
const PASSWORD_MIN: usize = 6;
const PASSWORD_MAX: usize = 64;

static APP_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{L}\p{N}_\-\s\.\(\)]{2,50}$").expect("app name regex is valid")
});

static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+\.\d+(-[a-zA-Z0-9\-]+)?(\+[a-zA-Z0-9\-]+)?$")
        .expect("version regex is valid")
});

static USERNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]{3,20}$").expect("username regex is valid"));

/// App names: 2 to 50 characters of letters (any script), digits, spaces and `_-.()`.
pub fn app_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("app name must not be empty"));
    }
    let len = name.chars().count();
    if !(NAME_MIN..=NAME_MAX).contains(&len) {
        return Err(Error::validation(format!(
            "app name must be {NAME_MIN} to {NAME_MAX} characters"
        )));
    }
    if !APP_NAME_REGEX.is_match(name) {
        return Err(Error::validation("app name contains invalid characters"));
    }
    Ok(())
}

pub fn description(desc: &str) -> Result<()> {
    if desc.chars().count() > DESCRIPTION_MAX {
        return Err(Error::validation(format!(
            "description must not exceed {DESCRIPTION_MAX} characters"
        )));
    }
    Ok(())
}

/// Semantic version: `MAJOR.MINOR.PATCH[-pre][+build]`.
pub fn version(v: &str) -> Result<()> {
    let v = v.trim();
    if v.is_empty() {
        return Err(Error::validation("version must not be empty"));
    }
    if !VERSION_REGEX.is_match(v) {
        return Err(Error::validation(
            "version must use semantic versioning, e.g. 1.0.0",
        ));
    }
    Ok(())
}

pub fn username(name: &str) -> Result<()> {
    if !USERNAME_REGEX.is_match(name.trim()) {
        return Err(Error::validation(
            "username must be 3 to 20 letters, digits or underscores",
        ));
    }
    Ok(())
}

pub fn password(pw: &str) -> Result<()> {
    let len = pw.chars().count();
    if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&len) {
        return Err(Error::validation(format!(
            "password must be {PASSWORD_MIN} to {PASSWORD_MAX} characters"
        )));
    }
    Ok(())
}

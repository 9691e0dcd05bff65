//! Typed environment variable lookups.
//!
//! Configuration structs across the workspace read `KEY=value` pairs the same
//! way: absent or blank means "use the default", present-but-unparsable is an
//! error naming the variable.

use anyhow::{anyhow, Result};
use std::str::FromStr;

/// Returns the trimmed value of `key`, or `None` when unset or blank.
pub fn var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses `key` into `T`, falling back to `default` when unset.
pub fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("{key} has invalid value '{raw}': {e}")),
        None => Ok(default),
    }
}

/// Boolean flag accepting `true/false`, `1/0`, `yes/no`, `on/off`.
pub fn flag(key: &str, default: bool) -> Result<bool> {
    match var(key) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("{key} is not a boolean: '{raw}'")),
        },
        None => Ok(default),
    }
}

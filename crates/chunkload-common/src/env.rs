//! Environment variable helpers
//!
//! Every setting in the workspace is read from the environment (after
//! `dotenvy` has populated it). Unset variables fall back to a default;
//! set-but-unparsable variables are an error instead of being ignored, so a
//! typo in `MAX_EVENT_AGE_SECS` does not silently widen the retry horizon.

use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Read a string variable, treating empty values as unset
pub fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read a string variable or fall back to `default`
pub fn var_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

/// Read a variable that must be present
pub fn require_var(key: &str) -> Result<String> {
    var(key).ok_or_else(|| CommonError::MissingVar(key.to_string()))
}

/// Parse an optional variable
pub fn parse_var<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| CommonError::InvalidVar {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

/// Parse a variable or fall back to `default` when unset
pub fn parse_var_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_var(key)?.unwrap_or(default))
}

//! Boolean-like environment values.
//!
//! Older deployments set flags as `1`, `true` or `on` depending on who wrote
//! the `.env`. All of them (plus `yes`) are accepted, case-insensitively and
//! ignoring surrounding whitespace. Anything else, including an unset
//! variable, is false.

const TRUTHY: &[&str] = &["1", "true", "on", "yes"];

pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    TRUTHY.iter().any(|t| value.eq_ignore_ascii_case(t))
}

/// Read a flag from the environment, falling back to `default` when unset.
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => parse_flag(&v),
        Err(_) => default,
    }
}

//! Query-string value parsing for request builders.
//!
//! Values are validated against the exact textual forms accepted by the
//! backend API before any envelope is built.

use tidegate_core::error::{Result, TideError};

/// `-?[0-9]+`
pub fn parse_integer(name: &str, raw: &str) -> Result<i64> {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(name, raw, "integer"));
    }
    raw.parse::<i64>().map_err(|_| invalid(name, raw, "integer"))
}

/// Comma-separated list, kept verbatim (empty items included).
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::to_string).collect()
}

fn invalid(name: &str, raw: &str, what: &str) -> TideError {
    TideError::BadRequest(format!("{name}: {raw} is invalid {what}"))
}

//! Timestamp utilities
//!
//! Timestamps are persisted as fixed-width RFC 3339 text in UTC with
//! microsecond precision, so stored values order lexicographically.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Get current UTC timestamp, truncated to storage precision
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Format a timestamp for storage
pub fn to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn from_db(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Invalid timestamp '{}': {}", s, e)))
}

/// Parse an optional stored timestamp
pub fn from_db_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(from_db).transpose()
}

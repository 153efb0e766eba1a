//! Timestamp formatting.
//!
//! All persisted timestamps use a file-safe UTC format with dashes in the
//! time part (`2024-01-01T12-30-00Z`), so the same string can appear in
//! JSON documents and in file or directory names.

use chrono::{DateTime, Utc};

/// Format used everywhere a timestamp is persisted or embedded in a path.
pub const STAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

/// Current UTC time in the file-safe stamp format.
pub fn now_stamp() -> String {
    format_stamp(Utc::now())
}

/// Format an arbitrary instant in the file-safe stamp format.
pub fn format_stamp(t: DateTime<Utc>) -> String {
    t.format(STAMP_FORMAT).to_string()
}

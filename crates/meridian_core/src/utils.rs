//! # Utility Functions
//!
//! Timestamp helpers used for message stamping and event payloads. All
//! timestamps in Meridian come from these two functions so that sent/received
//! times are comparable across services.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in seconds.
///
/// A clock set before the Unix epoch yields `0` rather than panicking.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Returns the current Unix timestamp in milliseconds.
///
/// This is the resolution used on the wire for `sent_at` and `received_at`.
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

//! Domain model for records, their action history and drafts.
//!
//! # Responsibility
//! - Define canonical data structures used by the ledger and its views.
//! - Own per-action payload schemas and their validation.
//!
//! # Invariants
//! - Every record is identified by a stable `RecordId`.
//! - Records are never deleted; voiding happens through terminal actions.
//! - Actions are immutable once appended.

pub mod action;
pub mod draft;
pub mod record;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds.
///
/// Only storage layers stamp time; views read timestamps from stored rows.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

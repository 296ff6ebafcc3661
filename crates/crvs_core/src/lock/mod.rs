//! Assignment lock.
//!
//! # Responsibility
//! - Admit or reject an action against the lock state derived from history.
//!
//! # Invariants
//! - The lock is never stored; it is recomputed from the history the caller
//!   read, and the caller appends with that history's last sequence so the
//!   check and the append are atomic per record.

pub mod assignment;

pub use assignment::{
    check_assignment, latest_assignment_action, LockDecision, LockError, LockRequest,
};

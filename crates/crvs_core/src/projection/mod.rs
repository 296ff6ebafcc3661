//! State projector: derives record views from action history.
//!
//! # Responsibility
//! - Fold an ordered history into a `RecordSnapshot`.
//! - Own the status admission table used before appends.
//!
//! # Invariants
//! - Projection is pure: no clock, no randomness, no I/O. The same history
//!   and policy always produce the same snapshot.
//! - Actions with status `Rejected` stay in history but never affect the
//!   snapshot.

pub mod state;
pub mod status;

pub use state::{
    project, AssignmentPolicy, AssignmentState, PendingCorrection, ProjectionError, Projector,
    RecordFlag, RecordSnapshot,
};
pub use status::RecordStatus;

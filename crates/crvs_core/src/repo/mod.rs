//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for the ledger, drafts and
//!   the committed-action outbox.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository writes must enforce `ActionPayload::validate()` before
//!   persistence.
//! - Ledger appends are the only writers of `actions` and `action_outbox`,
//!   and always write both in one transaction.
//! - Repository APIs return semantic errors (`RecordNotFound`,
//!   `SequenceConflict`) in addition to DB transport errors.

pub mod action_repo;
pub mod draft_repo;
pub mod outbox_repo;

pub use action_repo::{
    ActionRepository, AppendOutcome, RepoError, RepoResult, SqliteActionRepository,
};
pub use draft_repo::{DraftRepository, SqliteDraftRepository};
pub use outbox_repo::{OutboxEntry, OutboxRepository, SqliteOutboxRepository};

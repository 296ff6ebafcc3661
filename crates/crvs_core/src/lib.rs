//! Core domain logic for the civil-registration action ledger.
//! This crate is the single source of truth for workflow invariants.

pub mod auth;
pub mod config;
pub mod db;
pub mod dedup;
pub mod lock;
pub mod logging;
pub mod model;
pub mod projection;
pub mod repo;
pub mod service;

pub use auth::{Actor, AuthorizationGate, IdentityError, IdentityProvider, StaticIdentityProvider};
pub use config::{ConfigError, ProcessSettings, RegistryConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::action::{
    Action, ActionPayload, ActionStatus, ActionType, Declaration, NewAction, TransactionId,
};
pub use model::draft::{Draft, DraftId};
pub use model::record::{ActorId, RecordId, RecordType};
pub use projection::{project, RecordSnapshot, RecordStatus};
pub use repo::{
    ActionRepository, DraftRepository, OutboxRepository, RepoError, RepoResult,
    SqliteActionRepository, SqliteDraftRepository, SqliteOutboxRepository,
};
pub use service::{
    ActionService, DraftError, DraftService, OutboxRelay, RecordIndexer, RegistryContext,
    SubmitError, SubmitOutcome, Submission,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}

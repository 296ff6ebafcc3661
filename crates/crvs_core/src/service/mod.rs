//! Use-case services over the ledger.
//!
//! # Responsibility
//! - Orchestrate submissions: gate, lock, status admission, dedup, append,
//!   draft cleanup.
//! - Reconcile drafts against the ledger.
//! - Relay committed-action events to downstream sinks.
//!
//! # Invariants
//! - Services never write `actions` except through `ActionRepository::append`.
//! - Every lock and status decision is made against the history whose last
//!   sequence is pinned on the following append.

pub mod action_service;
pub mod draft_service;
pub mod indexer;
pub mod outbox_relay;

pub use action_service::{ActionService, SubmitError, SubmitOutcome, Submission};
pub use draft_service::{DraftError, DraftService};
pub use indexer::RecordIndexer;
pub use outbox_relay::{CommittedActionEvent, DrainReport, NotificationSink, OutboxRelay, SinkError};

use crate::auth::AuthorizationGate;
use crate::config::{ConfigError, RegistryConfig};
use crate::dedup::DedupEngine;
use crate::projection::Projector;

/// Immutable per-process workflow state, shared by every request.
#[derive(Debug, Clone)]
pub struct RegistryContext {
    pub gate: AuthorizationGate,
    pub engine: DedupEngine,
    pub projector: Projector,
    pub append_retry_budget: u32,
}

impl RegistryContext {
    /// Validates `config` and compiles it into a context.
    pub fn from_config(config: &RegistryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            gate: AuthorizationGate::with_defaults(),
            engine: config.build_engine()?,
            projector: Projector::new(config.assignment.clone()),
            append_retry_budget: config.append_retry_budget,
        })
    }
}

impl Default for RegistryContext {
    fn default() -> Self {
        Self {
            gate: AuthorizationGate::with_defaults(),
            engine: DedupEngine::default(),
            projector: Projector::default(),
            append_retry_budget: RegistryConfig::default().append_retry_budget,
        }
    }
}

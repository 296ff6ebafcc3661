//! Use-case endpoints over the action ledger.
//!
//! # Responsibility
//! - Resolve the caller, open a request-scoped connection and run one
//!   core use-case per call.
//! - Translate core results into status-coded envelopes.
//!
//! # Invariants
//! - Endpoints never panic; every failure is an `ApiError`.
//! - Each call opens its own connection; nothing is shared between calls
//!   except the immutable `RegistryContext`.

use crate::error::ApiError;
use crvs_core::dedup::{DedupOutcome, SqliteSearchIndex};
use crvs_core::model::action::DuplicateCandidate;
use crvs_core::{
    open_db, Action, ActionPayload, ActionService, ActionType, Draft, DraftId, DraftService,
    IdentityProvider, RecordId, RecordSnapshot, RegistryContext, SqliteActionRepository,
    SqliteDraftRepository, SubmitOutcome, Submission, TransactionId,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const STATUS_OK: u16 = 200;
pub const STATUS_ACCEPTED: u16 = 202;
pub const STATUS_NO_CONTENT: u16 = 204;

/// Successful response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub body: T,
}

pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

/// Body of `post_action`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub record_id: RecordId,
    /// Wire action type, e.g. `DECLARE`.
    pub action_type: String,
    #[serde(default)]
    pub payload: Value,
    pub transaction_id: String,
    #[serde(default)]
    pub expected_prior_sequence: Option<u64>,
}

/// Body of `put_draft`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRequest {
    pub record_id: RecordId,
    pub action_type: String,
    #[serde(default)]
    pub payload: Value,
    pub transaction_id: String,
}

/// Body of a `202` answer to a submission or draft commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAccepted {
    pub record_id: RecordId,
    pub sequence: u64,
    /// Action status: `accepted` or `requested`.
    pub status: &'static str,
    /// `true` when the answer came from an earlier commit.
    pub replayed: bool,
    /// Candidates appended with the action, if screening found any.
    pub duplicates: Vec<DuplicateCandidate>,
    /// Screening was skipped because the index was unavailable.
    pub dedup_deferred: bool,
}

impl ActionAccepted {
    fn from_outcome(record_id: RecordId, outcome: &SubmitOutcome) -> Result<Self, ApiError> {
        let primary = outcome
            .primary()
            .ok_or_else(|| ApiError::storage("ledger returned an empty batch"))?;
        let duplicates = match &outcome.dedup {
            DedupOutcome::DuplicatesFound(candidates) => candidates.clone(),
            _ => Vec::new(),
        };
        Ok(Self {
            record_id,
            sequence: primary.sequence,
            status: primary.status.as_str(),
            replayed: outcome.replayed,
            duplicates,
            dedup_deferred: outcome.dedup == DedupOutcome::Deferred,
        })
    }
}

type Services<'a> = ActionService<
    'a,
    SqliteActionRepository<'a>,
    SqliteDraftRepository<'a>,
    SqliteSearchIndex<'a>,
>;

/// Process-wide API state: database location, identity provider and the
/// compiled workflow configuration.
pub struct ApiContext<P: IdentityProvider> {
    db_path: PathBuf,
    identity: P,
    registry: RegistryContext,
}

impl<P: IdentityProvider> ApiContext<P> {
    pub fn new(db_path: impl Into<PathBuf>, identity: P, registry: RegistryContext) -> Self {
        Self {
            db_path: db_path.into(),
            identity,
            registry,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn registry(&self) -> &RegistryContext {
        &self.registry
    }

    /// Submits one action.
    ///
    /// Answers `202 {sequence, status}`; a replayed transaction answers with
    /// the originally committed action.
    pub fn post_action(&self, token: &str, request: &ActionRequest) -> ApiResult<ActionAccepted> {
        self.observe("post_action", STATUS_ACCEPTED, || {
            let actor = self.identity.resolve(token)?;
            let submission = Submission {
                record_id: request.record_id,
                payload: parse_payload(&request.action_type, &request.payload)?,
                transaction_id: TransactionId::new(request.transaction_id.as_str()),
                expected_prior: request.expected_prior_sequence,
                draft_id: None,
            };
            self.with_services(|services| {
                let outcome = services.submit(&actor, &submission)?;
                ActionAccepted::from_outcome(request.record_id, &outcome)
            })
        })
    }

    /// Ordered history of one record; requires `record.read`.
    pub fn get_history(&self, token: &str, record_id: RecordId) -> ApiResult<Vec<Action>> {
        self.observe("get_history", STATUS_OK, || {
            let actor = self.identity.resolve(token)?;
            self.with_services(|services| Ok(services.history(&actor, record_id)?))
        })
    }

    /// Current snapshot of one record; requires `record.read`.
    pub fn get_record(&self, token: &str, record_id: RecordId) -> ApiResult<RecordSnapshot> {
        self.observe("get_record", STATUS_OK, || {
            let actor = self.identity.resolve(token)?;
            self.with_services(|services| Ok(services.snapshot(&actor, record_id)?))
        })
    }

    /// Creates or replaces the caller's draft for one action type.
    pub fn put_draft(&self, token: &str, request: &DraftRequest) -> ApiResult<Draft> {
        self.observe("put_draft", STATUS_OK, || {
            let actor = self.identity.resolve(token)?;
            let payload = parse_payload(&request.action_type, &request.payload)?;
            let transaction_id = TransactionId::new(request.transaction_id.as_str());
            self.with_services(|services| {
                Ok(DraftService::new(services).save(
                    &actor,
                    request.record_id,
                    &payload,
                    &transaction_id,
                )?)
            })
        })
    }

    /// Drafts owned by the caller.
    pub fn list_drafts(&self, token: &str) -> ApiResult<Vec<Draft>> {
        self.observe("list_drafts", STATUS_OK, || {
            let actor = self.identity.resolve(token)?;
            self.with_services(|services| Ok(DraftService::new(services).list_for_actor(&actor)?))
        })
    }

    pub fn delete_draft(&self, token: &str, draft_id: DraftId) -> ApiResult<()> {
        self.observe("delete_draft", STATUS_NO_CONTENT, || {
            let actor = self.identity.resolve(token)?;
            self.with_services(|services| Ok(DraftService::new(services).discard(&actor, draft_id)?))
        })
    }

    /// Submits a saved draft. A `409 Conflict` leaves the draft in place.
    pub fn post_draft_commit(
        &self,
        token: &str,
        draft_id: DraftId,
        expected_prior_sequence: Option<u64>,
    ) -> ApiResult<ActionAccepted> {
        self.observe("post_draft_commit", STATUS_ACCEPTED, || {
            let actor = self.identity.resolve(token)?;
            self.with_services(|services| {
                let outcome =
                    DraftService::new(services).commit(&actor, draft_id, expected_prior_sequence)?;
                let record_id = outcome
                    .primary()
                    .map(|action| action.record_id)
                    .ok_or_else(|| ApiError::storage("ledger returned an empty batch"))?;
                ActionAccepted::from_outcome(record_id, &outcome)
            })
        })
    }

    fn with_services<T>(
        &self,
        f: impl FnOnce(&Services<'_>) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let conn = open_db(&self.db_path)?;
        let services = ActionService::new(
            SqliteActionRepository::new(&conn),
            SqliteDraftRepository::new(&conn),
            SqliteSearchIndex::new(&conn),
            &self.registry,
        );
        f(&services)
    }

    fn observe<T>(
        &self,
        endpoint: &'static str,
        status: u16,
        f: impl FnOnce() -> Result<T, ApiError>,
    ) -> ApiResult<T> {
        let started_at = Instant::now();
        match f() {
            Ok(body) => {
                info!(
                    "event=api_request module=api endpoint={} status={} duration_ms={}",
                    endpoint,
                    status,
                    started_at.elapsed().as_millis()
                );
                Ok(ApiResponse { status, body })
            }
            Err(err) => {
                warn!(
                    "event=api_request module=api endpoint={} status={} error_code={} retryable={} duration_ms={}",
                    endpoint,
                    err.status,
                    err.code,
                    err.retryable,
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }
}

fn parse_payload(action_type: &str, data: &Value) -> Result<ActionPayload, ApiError> {
    let action_type = ActionType::parse(action_type.trim())
        .ok_or_else(|| ApiError::validation(format!("unknown action type `{action_type}`")))?;
    ActionPayload::from_parts(action_type, data.clone())
        .map_err(|err| ApiError::validation(err.to_string()))
}

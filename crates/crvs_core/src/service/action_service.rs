//! Action submission use-case.
//!
//! # Responsibility
//! - Admit one submitted action: gate, assignment lock, status transition,
//!   correction references.
//! - Screen declaration-carrying actions for duplicates and append the
//!   DETECT_DUPLICATE finding in the same batch.
//! - Retry unpinned submissions after a sequence conflict.
//! - Drop the submitter's superseded draft, and every draft of a record that
//!   just reached a terminal status.
//!
//! # Invariants
//! - Admission is evaluated against one read of the history and the append
//!   pins that history's last sequence.
//! - A transaction id that already committed is answered from the ledger
//!   without re-running admission.
//! - Draft cleanup failures never fail a committed submission.

use crate::auth::{Actor, ScopeContext};
use crate::dedup::{DedupOutcome, SearchBackend, SearchError, Subject};
use crate::lock::{check_assignment, latest_assignment_action, LockDecision, LockError, LockRequest};
use crate::model::action::{
    merge_declaration, Action, ActionId, ActionPayload, ActionType, ActionValidationError,
    Declaration, DuplicatesDetectedPayload, NewAction, TransactionId,
};
use crate::model::draft::DraftId;
use crate::model::record::{ActorId, RecordId, RecordType};
use crate::projection::{ProjectionError, RecordSnapshot, RecordStatus};
use crate::repo::{ActionRepository, DraftRepository, RepoError};
use crate::service::RegistryContext;
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// One action as submitted by a client.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub record_id: RecordId,
    pub payload: ActionPayload,
    pub transaction_id: TransactionId,
    /// Client-pinned last sequence; a mismatch is a `Conflict` with no retry.
    pub expected_prior: Option<u64>,
    pub draft_id: Option<DraftId>,
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    /// Actions of the batch, submitted action first.
    pub actions: Vec<Action>,
    /// `true` when nothing new was written: a transaction replay, or an
    /// ASSIGN re-asserted by the current holder.
    pub replayed: bool,
    pub dedup: DedupOutcome,
}

impl SubmitOutcome {
    /// The submitted action (or the one answering for it).
    pub fn primary(&self) -> Option<&Action> {
        self.actions.first()
    }
}

#[derive(Debug)]
pub enum SubmitError {
    /// Actor scopes do not admit the action type.
    Unauthorized {
        actor_id: ActorId,
        action_type: ActionType,
    },
    /// ASSIGN naming someone else without the override scope.
    AssignOthersForbidden {
        actor_id: ActorId,
        assignee: ActorId,
    },
    Lock(LockError),
    InvalidTransition {
        record_id: RecordId,
        status: RecordStatus,
        action_type: ActionType,
    },
    /// Correction decision naming a request that is not pending.
    UnknownCorrectionRequest {
        record_id: RecordId,
        request_id: ActionId,
    },
    Validation(ActionValidationError),
    RecordNotFound(RecordId),
    RecordAlreadyExists(RecordId),
    CreateOutOfOrder(RecordId),
    Conflict {
        record_id: RecordId,
        expected: u64,
        actual: u64,
    },
    TransactionReused {
        record_id: RecordId,
        transaction_id: TransactionId,
    },
    DependencyUnavailable {
        dependency: &'static str,
        message: String,
    },
    Projection(ProjectionError),
    Storage(RepoError),
}

impl SubmitError {
    /// Whether the client may retry, possibly after re-reading the record.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Lock(_) | Self::Conflict { .. } | Self::DependencyUnavailable { .. }
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } | Self::AssignOthersForbidden { .. } => "unauthorized",
            Self::Lock(_) => "lock",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::UnknownCorrectionRequest { .. } | Self::Validation(_) => "validation",
            Self::RecordNotFound(_) => "record_not_found",
            Self::RecordAlreadyExists(_) | Self::CreateOutOfOrder(_) => "create_order",
            Self::Conflict { .. } => "conflict",
            Self::TransactionReused { .. } => "transaction_reused",
            Self::DependencyUnavailable { .. } => "dependency_unavailable",
            Self::Projection(_) | Self::Storage(_) => "storage",
        }
    }
}

impl Display for SubmitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized {
                actor_id,
                action_type,
            } => write!(f, "actor {actor_id} is not allowed to submit {action_type}"),
            Self::AssignOthersForbidden { actor_id, assignee } => write!(
                f,
                "actor {actor_id} may only assign records to themselves, not to {assignee}"
            ),
            Self::Lock(err) => write!(f, "{err}"),
            Self::InvalidTransition {
                record_id,
                status,
                action_type,
            } => write!(
                f,
                "{action_type} is not allowed on record {record_id} in status {status}"
            ),
            Self::UnknownCorrectionRequest {
                record_id,
                request_id,
            } => write!(
                f,
                "correction request {request_id} is not pending on record {record_id}"
            ),
            Self::Validation(err) => write!(f, "{err}"),
            Self::RecordNotFound(id) => write!(f, "record not found: {id}"),
            Self::RecordAlreadyExists(id) => write!(f, "record already exists: {id}"),
            Self::CreateOutOfOrder(id) => {
                write!(f, "CREATE must be the first action of record {id}")
            }
            Self::Conflict {
                record_id,
                expected,
                actual,
            } => write!(
                f,
                "record {record_id} is at sequence {actual}, expected {expected}"
            ),
            Self::TransactionReused {
                record_id,
                transaction_id,
            } => write!(
                f,
                "transaction `{transaction_id}` was already used on record {record_id} with a different action"
            ),
            Self::DependencyUnavailable {
                dependency,
                message,
            } => write!(f, "{dependency} unavailable: {message}"),
            Self::Projection(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SubmitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Lock(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Projection(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for SubmitError {
    fn from(value: RepoError) -> Self {
        if value.is_busy() {
            return Self::DependencyUnavailable {
                dependency: "ledger",
                message: value.to_string(),
            };
        }
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            RepoError::RecordNotFound(id) => Self::RecordNotFound(id),
            RepoError::RecordAlreadyExists(id) => Self::RecordAlreadyExists(id),
            RepoError::CreateOutOfOrder(id) => Self::CreateOutOfOrder(id),
            RepoError::SequenceConflict {
                record_id,
                expected,
                actual,
            } => Self::Conflict {
                record_id,
                expected,
                actual,
            },
            RepoError::TransactionReused {
                record_id,
                transaction_id,
            } => Self::TransactionReused {
                record_id,
                transaction_id,
            },
            other => Self::Storage(other),
        }
    }
}

impl From<ActionValidationError> for SubmitError {
    fn from(value: ActionValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<ProjectionError> for SubmitError {
    fn from(value: ProjectionError) -> Self {
        Self::Projection(value)
    }
}

impl From<LockError> for SubmitError {
    fn from(value: LockError) -> Self {
        Self::Lock(value)
    }
}

impl From<SearchError> for SubmitError {
    fn from(value: SearchError) -> Self {
        Self::DependencyUnavailable {
            dependency: "search",
            message: value.to_string(),
        }
    }
}

/// Submission service over ledger, draft and search implementations.
pub struct ActionService<'ctx, R, D, B>
where
    R: ActionRepository,
    D: DraftRepository,
    B: SearchBackend,
{
    ledger: R,
    drafts: D,
    search: B,
    context: &'ctx RegistryContext,
}

impl<'ctx, R, D, B> ActionService<'ctx, R, D, B>
where
    R: ActionRepository,
    D: DraftRepository,
    B: SearchBackend,
{
    pub fn new(ledger: R, drafts: D, search: B, context: &'ctx RegistryContext) -> Self {
        Self {
            ledger,
            drafts,
            search,
            context,
        }
    }

    pub fn context(&self) -> &'ctx RegistryContext {
        self.context
    }

    pub fn ledger(&self) -> &R {
        &self.ledger
    }

    pub(crate) fn drafts(&self) -> &D {
        &self.drafts
    }

    /// Admits and appends `submission` on behalf of `actor`.
    ///
    /// # Errors
    /// - `Conflict` when a pinned `expected_prior` is stale, or when the
    ///   retry budget runs out for an unpinned submission.
    /// - `DependencyUnavailable` when duplicate screening cannot run and the
    ///   rule does not allow deferral.
    pub fn submit(
        &self,
        actor: &Actor,
        submission: &Submission,
    ) -> Result<SubmitOutcome, SubmitError> {
        let started_at = Instant::now();
        let action_type = submission.payload.action_type();
        submission.payload.validate()?;
        submission.transaction_id.validate()?;

        if let Some(outcome) = self.replay(actor, submission)? {
            info!(
                "event=action_submit module=service status=replayed record_id={} action_type={} duration_ms={}",
                submission.record_id,
                action_type,
                started_at.elapsed().as_millis()
            );
            self.cleanup_drafts(actor, submission.record_id, action_type);
            return Ok(outcome);
        }

        let mut attempt: u32 = 0;
        loop {
            match self.admit_and_append(actor, submission) {
                Ok(outcome) => {
                    info!(
                        "event=action_submit module=service status=ok record_id={} action_type={} sequence={} batch={} replayed={} attempts={} duration_ms={}",
                        submission.record_id,
                        action_type,
                        outcome.primary().map_or(0, |action| action.sequence),
                        outcome.actions.len(),
                        outcome.replayed,
                        attempt + 1,
                        started_at.elapsed().as_millis()
                    );
                    self.cleanup_drafts(actor, submission.record_id, action_type);
                    return Ok(outcome);
                }
                Err(SubmitError::Conflict { actual, .. })
                    if submission.expected_prior.is_none()
                        && attempt < self.context.append_retry_budget =>
                {
                    attempt += 1;
                    debug!(
                        "event=action_submit module=service status=retry record_id={} action_type={} attempt={} actual_sequence={}",
                        submission.record_id, action_type, attempt, actual
                    );
                }
                Err(err) => {
                    warn!(
                        "event=action_submit module=service status=error record_id={} action_type={} error_kind={} retryable={} duration_ms={} error={}",
                        submission.record_id,
                        action_type,
                        err.kind(),
                        err.is_retryable(),
                        started_at.elapsed().as_millis(),
                        err
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Ordered history of `record_id`; requires `record.read`.
    pub fn history(&self, actor: &Actor, record_id: RecordId) -> Result<Vec<Action>, SubmitError> {
        let header = self
            .ledger
            .record(record_id)?
            .ok_or(SubmitError::RecordNotFound(record_id))?;
        self.authorize(actor, ActionType::Read, header.record_type)?;
        Ok(self.ledger.list_actions(record_id)?)
    }

    /// Current snapshot of `record_id`; requires `record.read`.
    pub fn snapshot(
        &self,
        actor: &Actor,
        record_id: RecordId,
    ) -> Result<RecordSnapshot, SubmitError> {
        let history = self.history(actor, record_id)?;
        self.context
            .projector
            .project(&history)?
            .ok_or(SubmitError::RecordNotFound(record_id))
    }

    /// Earlier commit of the same transaction. The replaying actor must pass
    /// the gate for the action type like a fresh submission would.
    fn replay(
        &self,
        actor: &Actor,
        submission: &Submission,
    ) -> Result<Option<SubmitOutcome>, SubmitError> {
        let existing = self
            .ledger
            .find_by_transaction(submission.record_id, &submission.transaction_id)?;
        let Some(primary) = existing.first() else {
            return Ok(None);
        };
        let header = self
            .ledger
            .record(submission.record_id)?
            .ok_or(SubmitError::RecordNotFound(submission.record_id))?;
        self.authorize(actor, submission.payload.action_type(), header.record_type)?;
        if primary.payload != submission.payload {
            return Err(SubmitError::TransactionReused {
                record_id: submission.record_id,
                transaction_id: submission.transaction_id.clone(),
            });
        }
        Ok(Some(SubmitOutcome {
            dedup: committed_dedup_outcome(&existing),
            actions: existing,
            replayed: true,
        }))
    }

    fn admit_and_append(
        &self,
        actor: &Actor,
        submission: &Submission,
    ) -> Result<SubmitOutcome, SubmitError> {
        let record_id = submission.record_id;
        let action_type = submission.payload.action_type();
        let history = self.ledger.list_actions(record_id)?;
        let snapshot = self.context.projector.project(&history)?;

        let record_type = match (&submission.payload, &snapshot) {
            (ActionPayload::Create(_), Some(_)) => {
                return Err(SubmitError::RecordAlreadyExists(record_id))
            }
            (ActionPayload::Create(create), None) => create.record_type,
            (_, Some(snapshot)) => snapshot.record_type,
            (_, None) => return Err(SubmitError::RecordNotFound(record_id)),
        };

        let last_sequence = snapshot.as_ref().map_or(0, |snapshot| snapshot.last_sequence);
        if let Some(expected) = submission.expected_prior {
            if expected != last_sequence {
                return Err(SubmitError::Conflict {
                    record_id,
                    expected,
                    actual: last_sequence,
                });
            }
        }

        self.authorize(actor, action_type, record_type)?;
        if let ActionPayload::Assign(assign) = &submission.payload {
            if assign.assignee != actor.id && !actor.can_override() {
                return Err(SubmitError::AssignOthersForbidden {
                    actor_id: actor.id.clone(),
                    assignee: assign.assignee.clone(),
                });
            }
        }

        let mut batch = vec![self.new_action(actor, submission, submission.payload.clone())];
        let mut dedup = DedupOutcome::NotApplicable;

        if let Some(snapshot) = &snapshot {
            let request = LockRequest {
                actor_id: &actor.id,
                can_override: actor.can_override(),
            };
            if check_assignment(&snapshot.assignment, request, &submission.payload)?
                == LockDecision::AlreadyHeld
            {
                return Ok(SubmitOutcome {
                    actions: latest_assignment_action(&history).cloned().into_iter().collect(),
                    replayed: true,
                    dedup,
                });
            }

            if !snapshot.status.allows(action_type) {
                return Err(SubmitError::InvalidTransition {
                    record_id,
                    status: snapshot.status,
                    action_type,
                });
            }
            check_correction_reference(snapshot, &submission.payload)?;

            if let Some(edits) = submission.payload.declaration_edits() {
                dedup = self.screen(snapshot, edits, action_type)?;
                if let DedupOutcome::DuplicatesFound(candidates) = &dedup {
                    batch.push(self.new_action(
                        actor,
                        submission,
                        ActionPayload::DetectDuplicate(DuplicatesDetectedPayload {
                            candidates: candidates.clone(),
                        }),
                    ));
                }
            }
        }

        let appended = self.ledger.append(record_id, &batch, Some(last_sequence))?;
        if appended.replayed {
            dedup = committed_dedup_outcome(&appended.actions);
        }
        Ok(SubmitOutcome {
            actions: appended.actions,
            replayed: appended.replayed,
            dedup,
        })
    }

    fn authorize(
        &self,
        actor: &Actor,
        action_type: ActionType,
        record_type: RecordType,
    ) -> Result<(), SubmitError> {
        let context = ScopeContext { record_type };
        if self
            .context
            .gate
            .can_perform(&actor.scopes, action_type, Some(&context))
        {
            Ok(())
        } else {
            Err(SubmitError::Unauthorized {
                actor_id: actor.id.clone(),
                action_type,
            })
        }
    }

    fn screen(
        &self,
        snapshot: &RecordSnapshot,
        edits: &Declaration,
        action_type: ActionType,
    ) -> Result<DedupOutcome, SubmitError> {
        let mut declaration = snapshot.declaration.clone();
        merge_declaration(&mut declaration, edits);
        let subject = Subject {
            record_id: snapshot.record_id,
            record_type: snapshot.record_type,
            declaration: &declaration,
        };
        Ok(self.context.engine.screen(&self.search, subject, action_type)?)
    }

    fn new_action(
        &self,
        actor: &Actor,
        submission: &Submission,
        payload: ActionPayload,
    ) -> NewAction {
        NewAction {
            actor_id: actor.id.clone(),
            actor_role: actor.role.clone(),
            payload,
            transaction_id: submission.transaction_id.clone(),
            draft_id: submission.draft_id,
        }
    }

    fn cleanup_drafts(&self, actor: &Actor, record_id: RecordId, action_type: ActionType) {
        if let Err(err) = self.drafts.delete_for(record_id, &actor.id, action_type) {
            warn!(
                "event=draft_cleanup module=service status=error record_id={} action_type={} error={}",
                record_id, action_type, err
            );
        }
        if !action_type.is_terminal() {
            return;
        }
        match self.drafts.delete_all_for_record(record_id) {
            Ok(removed) => debug!(
                "event=draft_cleanup module=service status=ok record_id={} reason=terminal removed={}",
                record_id, removed
            ),
            Err(err) => warn!(
                "event=draft_cleanup module=service status=error record_id={} reason=terminal error={}",
                record_id, err
            ),
        }
    }
}

fn check_correction_reference(
    snapshot: &RecordSnapshot,
    payload: &ActionPayload,
) -> Result<(), SubmitError> {
    let (ActionPayload::ApproveCorrection(decision) | ActionPayload::RejectCorrection(decision)) =
        payload
    else {
        return Ok(());
    };
    let pending = snapshot
        .pending_correction
        .as_ref()
        .is_some_and(|pending| pending.request_id == decision.request_id);
    if pending {
        Ok(())
    } else {
        Err(SubmitError::UnknownCorrectionRequest {
            record_id: snapshot.record_id,
            request_id: decision.request_id,
        })
    }
}

fn committed_dedup_outcome(actions: &[Action]) -> DedupOutcome {
    actions
        .iter()
        .find_map(|action| match &action.payload {
            ActionPayload::DetectDuplicate(found) => {
                Some(DedupOutcome::DuplicatesFound(found.candidates.clone()))
            }
            _ => None,
        })
        .unwrap_or(DedupOutcome::NotApplicable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ScopeSet;
    use crate::db::open_db_in_memory;
    use crate::model::action::{
        AssignPayload, CorrectionDecisionPayload, CreatePayload, DeclarationPayload,
        DuplicateCandidate, RegisterPayload,
    };
    use crate::projection::AssignmentState;
    use crate::dedup::SqliteSearchIndex;
    use crate::repo::{SqliteActionRepository, SqliteDraftRepository};
    use rusqlite::Connection;
    use serde_json::json;
    use uuid::Uuid;

    type Service<'a> =
        ActionService<'a, SqliteActionRepository<'a>, SqliteDraftRepository<'a>, SqliteSearchIndex<'a>>;

    fn service<'a>(conn: &'a Connection, context: &'a RegistryContext) -> Service<'a> {
        ActionService::new(
            SqliteActionRepository::new(conn),
            SqliteDraftRepository::new(conn),
            SqliteSearchIndex::new(conn),
            context,
        )
    }

    fn actor(id: &str, scopes: &[&str]) -> Actor {
        Actor {
            id: ActorId::from(id),
            role: "REGISTRATION_AGENT".to_string(),
            scopes: ScopeSet::parse(scopes.iter().copied()).unwrap(),
        }
    }

    fn submission(record_id: RecordId, payload: ActionPayload, tx: &str) -> Submission {
        Submission {
            record_id,
            payload,
            transaction_id: TransactionId::new(tx),
            expected_prior: None,
            draft_id: None,
        }
    }

    fn create() -> ActionPayload {
        ActionPayload::Create(CreatePayload {
            record_type: RecordType::Birth,
        })
    }

    fn declare(name: &str) -> ActionPayload {
        ActionPayload::Declare(DeclarationPayload {
            declaration: [("child.name".to_string(), json!(name))].into_iter().collect(),
        })
    }

    #[test]
    fn resubmission_returns_original_actions() {
        let conn = open_db_in_memory().unwrap();
        let context = RegistryContext::default();
        let service = service(&conn, &context);
        let agent = actor("agent-a", &["record.declare"]);
        let record_id = Uuid::new_v4();

        service
            .submit(&agent, &submission(record_id, create(), "tx-create"))
            .unwrap();
        let first = service
            .submit(&agent, &submission(record_id, declare("Ada"), "tx-declare"))
            .unwrap();
        let again = service
            .submit(&agent, &submission(record_id, declare("Ada"), "tx-declare"))
            .unwrap();

        assert!(!first.replayed);
        assert!(again.replayed);
        assert_eq!(first.actions, again.actions);
        assert_eq!(service.ledger().last_sequence(record_id).unwrap(), 2);

        let err = service
            .submit(&agent, &submission(record_id, declare("Grace"), "tx-declare"))
            .unwrap_err();
        assert!(matches!(err, SubmitError::TransactionReused { .. }));
    }

    #[test]
    fn replays_pass_the_gate_like_fresh_submissions() {
        let conn = open_db_in_memory().unwrap();
        let context = RegistryContext::default();
        let service = service(&conn, &context);
        let agent = actor("agent-a", &["record.declare"]);
        let outsider = actor("outsider", &[]);
        let record_id = Uuid::new_v4();

        service
            .submit(&agent, &submission(record_id, create(), "tx-create"))
            .unwrap();
        service
            .submit(&agent, &submission(record_id, declare("Ada"), "tx-declare"))
            .unwrap();

        let err = service
            .submit(&outsider, &submission(record_id, declare("Ada"), "tx-declare"))
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Unauthorized {
                action_type: ActionType::Declare,
                ..
            }
        ));
        assert!(matches!(
            service.submit(&outsider, &submission(record_id, create(), "tx-create")),
            Err(SubmitError::Unauthorized { .. })
        ));
        assert_eq!(service.ledger().last_sequence(record_id).unwrap(), 2);
    }

    #[test]
    fn clients_cannot_submit_duplicate_findings() {
        let conn = open_db_in_memory().unwrap();
        let context = RegistryContext::default();
        let service = service(&conn, &context);
        let agent = actor(
            "agent-a",
            &["record.declare", "record.validate", "record.register", "record.read"],
        );
        let record_id = Uuid::new_v4();

        service
            .submit(&agent, &submission(record_id, create(), "tx-create"))
            .unwrap();
        service
            .submit(&agent, &submission(record_id, declare("Ada"), "tx-declare"))
            .unwrap();

        let forged = ActionPayload::DetectDuplicate(DuplicatesDetectedPayload {
            candidates: vec![DuplicateCandidate {
                record_id: Uuid::nil(),
                score: 99.0,
            }],
        });
        let err = service
            .submit(&agent, &submission(record_id, forged, "tx-forged"))
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Unauthorized {
                action_type: ActionType::DetectDuplicate,
                ..
            }
        ));

        let snapshot = service.snapshot(&agent, record_id).unwrap();
        assert!(snapshot.duplicates.is_empty());
        assert_eq!(snapshot.last_sequence, 2);
    }

    #[test]
    fn scopes_gate_submissions() {
        let conn = open_db_in_memory().unwrap();
        let context = RegistryContext::default();
        let service = service(&conn, &context);
        let reader = actor("reader", &["record.read"]);

        let err = service
            .submit(&reader, &submission(Uuid::new_v4(), create(), "tx-1"))
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Unauthorized {
                action_type: ActionType::Create,
                ..
            }
        ));

        let notifier = actor("notifier", &["record.notify[event=death]"]);
        assert!(matches!(
            service.submit(&notifier, &submission(Uuid::new_v4(), create(), "tx-2")),
            Err(SubmitError::Unauthorized { .. })
        ));
    }

    #[test]
    fn unknown_records_and_invalid_transitions_are_rejected() {
        let conn = open_db_in_memory().unwrap();
        let context = RegistryContext::default();
        let service = service(&conn, &context);
        let agent = actor("agent-a", &["record.declare", "record.register"]);
        let record_id = Uuid::new_v4();

        assert!(matches!(
            service.submit(&agent, &submission(record_id, declare("Ada"), "tx-0")),
            Err(SubmitError::RecordNotFound(id)) if id == record_id
        ));

        service
            .submit(&agent, &submission(record_id, create(), "tx-1"))
            .unwrap();
        let register = ActionPayload::Register(RegisterPayload {
            declaration: Declaration::new(),
            registration_number: "B-2026-0001".to_string(),
        });
        let err = service
            .submit(&agent, &submission(record_id, register, "tx-2"))
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::InvalidTransition {
                status: RecordStatus::InProgress,
                action_type: ActionType::Register,
                ..
            }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn assigning_others_requires_override() {
        let conn = open_db_in_memory().unwrap();
        let context = RegistryContext::default();
        let service = service(&conn, &context);
        let agent = actor("agent-a", &["record.declare", "record.assign"]);
        let admin = actor("admin", &["user.unassign-others"]);
        let record_id = Uuid::new_v4();
        service
            .submit(&agent, &submission(record_id, create(), "tx-1"))
            .unwrap();

        let to_b = ActionPayload::Assign(AssignPayload {
            assignee: ActorId::from("agent-b"),
        });
        assert!(matches!(
            service.submit(&agent, &submission(record_id, to_b.clone(), "tx-2")),
            Err(SubmitError::AssignOthersForbidden { .. })
        ));

        let moved = service
            .submit(&admin, &submission(record_id, to_b, "tx-3"))
            .unwrap();
        assert_eq!(moved.primary().unwrap().action_type, ActionType::Assign);
        assert!(matches!(
            service.snapshot(&agent, record_id),
            Err(SubmitError::Unauthorized {
                action_type: ActionType::Read,
                ..
            })
        ));
    }

    #[test]
    fn reasserting_held_assignment_appends_nothing() {
        let conn = open_db_in_memory().unwrap();
        let context = RegistryContext::default();
        let service = service(&conn, &context);
        let agent = actor("agent-a", &["record.declare", "record.assign", "record.read"]);
        let record_id = Uuid::new_v4();
        let created = service
            .submit(&agent, &submission(record_id, create(), "tx-1"))
            .unwrap();

        let outcome = service
            .submit(
                &agent,
                &submission(
                    record_id,
                    ActionPayload::Assign(AssignPayload {
                        assignee: ActorId::from("agent-a"),
                    }),
                    "tx-2",
                ),
            )
            .unwrap();
        assert!(outcome.replayed);
        assert_eq!(outcome.actions, created.actions);
        assert_eq!(service.history(&agent, record_id).unwrap().len(), 1);
        assert_eq!(
            service.snapshot(&agent, record_id).unwrap().assignment,
            AssignmentState::Assigned(ActorId::from("agent-a"))
        );
    }

    #[test]
    fn pinned_stale_sequence_is_not_retried() {
        let conn = open_db_in_memory().unwrap();
        let context = RegistryContext::default();
        let service = service(&conn, &context);
        let agent = actor("agent-a", &["record.declare"]);
        let record_id = Uuid::new_v4();
        service
            .submit(&agent, &submission(record_id, create(), "tx-1"))
            .unwrap();

        let mut pinned = submission(record_id, declare("Ada"), "tx-2");
        pinned.expected_prior = Some(0);
        let err = service.submit(&agent, &pinned).unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Conflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn correction_decisions_must_name_the_pending_request() {
        let conn = open_db_in_memory().unwrap();
        let context = RegistryContext::default();
        let service = service(&conn, &context);
        let agent = actor("agent-a", &["record.declare"]);
        let record_id = Uuid::new_v4();
        service
            .submit(&agent, &submission(record_id, create(), "tx-1"))
            .unwrap();
        let history = service.ledger().list_actions(record_id).unwrap();
        let snapshot = context.projector.project(&history).unwrap().unwrap();

        let approve = ActionPayload::ApproveCorrection(CorrectionDecisionPayload {
            request_id: Uuid::new_v4(),
            reason: None,
        });
        assert!(matches!(
            check_correction_reference(&snapshot, &approve),
            Err(SubmitError::UnknownCorrectionRequest { .. })
        ));
        assert!(check_correction_reference(&snapshot, &declare("Ada")).is_ok());
    }
}

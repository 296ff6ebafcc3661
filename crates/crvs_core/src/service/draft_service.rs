//! Draft reconciliation against the ledger.
//!
//! # Responsibility
//! - Save, read, list and discard per-actor drafts.
//! - Commit a draft through the regular submission path.
//!
//! # Invariants
//! - Drafts of different actors never block each other; only the owner may
//!   discard or commit a draft.
//! - A record in a terminal status accepts no new drafts, and committing a
//!   draft for such a record discards it.
//! - A draft survives a conflicting commit so the client can merge.

use crate::auth::{Actor, ScopeContext};
use crate::dedup::SearchBackend;
use crate::model::action::{ActionPayload, ActionType, TransactionId};
use crate::model::draft::{Draft, DraftId};
use crate::model::record::{ActorId, RecordId};
use crate::projection::{ProjectionError, RecordSnapshot, RecordStatus};
use crate::repo::{ActionRepository, DraftRepository, RepoError};
use crate::service::action_service::{ActionService, SubmitError, SubmitOutcome, Submission};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum DraftError {
    RecordNotFound(RecordId),
    /// Record reached a terminal status.
    RecordClosed {
        record_id: RecordId,
        status: RecordStatus,
    },
    DraftNotFound(DraftId),
    NotDraftOwner {
        draft_id: DraftId,
        actor_id: ActorId,
    },
    Unauthorized {
        actor_id: ActorId,
        action_type: ActionType,
    },
    /// The ledger moved on; the draft is kept for a client-side merge.
    Conflict {
        draft: Box<Draft>,
        current_sequence: u64,
    },
    Submit(SubmitError),
    Projection(ProjectionError),
    Repo(RepoError),
}

impl Display for DraftError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RecordNotFound(id) => write!(f, "record not found: {id}"),
            Self::RecordClosed { record_id, status } => {
                write!(f, "record {record_id} is {status} and accepts no drafts")
            }
            Self::DraftNotFound(id) => write!(f, "draft not found: {id}"),
            Self::NotDraftOwner { draft_id, actor_id } => {
                write!(f, "draft {draft_id} is not owned by {actor_id}")
            }
            Self::Unauthorized {
                actor_id,
                action_type,
            } => write!(f, "actor {actor_id} is not allowed to draft {action_type}"),
            Self::Conflict {
                draft,
                current_sequence,
            } => write!(
                f,
                "record {} moved to sequence {current_sequence}; draft {} was kept",
                draft.record_id, draft.draft_id
            ),
            Self::Submit(err) => write!(f, "{err}"),
            Self::Projection(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DraftError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Submit(err) => Some(err),
            Self::Projection(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for DraftError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::DraftNotFound(id) => Self::DraftNotFound(id),
            RepoError::RecordNotFound(id) => Self::RecordNotFound(id),
            other => Self::Repo(other),
        }
    }
}

impl From<ProjectionError> for DraftError {
    fn from(value: ProjectionError) -> Self {
        Self::Projection(value)
    }
}

impl From<SubmitError> for DraftError {
    fn from(value: SubmitError) -> Self {
        Self::Submit(value)
    }
}

/// Draft use-cases; commits go through the wrapped submission service.
pub struct DraftService<'svc, 'ctx, R, D, B>
where
    R: ActionRepository,
    D: DraftRepository,
    B: SearchBackend,
{
    actions: &'svc ActionService<'ctx, R, D, B>,
}

impl<'svc, 'ctx, R, D, B> DraftService<'svc, 'ctx, R, D, B>
where
    R: ActionRepository,
    D: DraftRepository,
    B: SearchBackend,
{
    pub fn new(actions: &'svc ActionService<'ctx, R, D, B>) -> Self {
        Self { actions }
    }

    /// Creates or replaces the actor's draft for the payload's action type.
    ///
    /// Requires the scope for the drafted action; the assignment lock is not
    /// checked until commit.
    pub fn save(
        &self,
        actor: &Actor,
        record_id: RecordId,
        payload: &ActionPayload,
        transaction_id: &TransactionId,
    ) -> Result<Draft, DraftError> {
        let snapshot = self.open_snapshot(record_id)?;
        let action_type = payload.action_type();
        let context = ScopeContext {
            record_type: snapshot.record_type,
        };
        if !self
            .actions
            .context()
            .gate
            .can_perform(&actor.scopes, action_type, Some(&context))
        {
            return Err(DraftError::Unauthorized {
                actor_id: actor.id.clone(),
                action_type,
            });
        }

        let draft = self
            .actions
            .drafts()
            .upsert(record_id, &actor.id, payload, transaction_id)?;
        info!(
            "event=draft_save module=service status=ok record_id={} draft_id={} action_type={}",
            record_id, draft.draft_id, action_type
        );
        Ok(draft)
    }

    pub fn get(
        &self,
        actor: &Actor,
        record_id: RecordId,
        action_type: ActionType,
    ) -> Result<Option<Draft>, DraftError> {
        Ok(self.actions.drafts().get(record_id, &actor.id, action_type)?)
    }

    /// The actor's drafts, most recently updated first.
    pub fn list_for_actor(&self, actor: &Actor) -> Result<Vec<Draft>, DraftError> {
        Ok(self.actions.drafts().list_for_actor(&actor.id)?)
    }

    pub fn discard(&self, actor: &Actor, draft_id: DraftId) -> Result<(), DraftError> {
        let draft = self.owned_draft(actor, draft_id)?;
        self.actions.drafts().delete(draft.draft_id)?;
        info!(
            "event=draft_discard module=service status=ok record_id={} draft_id={}",
            draft.record_id, draft_id
        );
        Ok(())
    }

    /// Submits the draft's payload under the draft's transaction id.
    ///
    /// A successful submission removes the draft. On `Conflict` the draft is
    /// kept and returned with the record's current sequence.
    pub fn commit(
        &self,
        actor: &Actor,
        draft_id: DraftId,
        expected_prior: Option<u64>,
    ) -> Result<SubmitOutcome, DraftError> {
        let draft = self.owned_draft(actor, draft_id)?;
        match self.open_snapshot(draft.record_id) {
            Ok(_) => {}
            Err(DraftError::RecordClosed { record_id, status }) => {
                self.actions.drafts().delete(draft.draft_id)?;
                warn!(
                    "event=draft_commit module=service status=discarded record_id={} draft_id={} record_status={}",
                    record_id, draft_id, status
                );
                return Err(DraftError::RecordClosed { record_id, status });
            }
            Err(err) => return Err(err),
        }

        let submission = Submission {
            record_id: draft.record_id,
            payload: draft.payload.clone(),
            transaction_id: draft.transaction_id.clone(),
            expected_prior,
            draft_id: Some(draft.draft_id),
        };
        match self.actions.submit(actor, &submission) {
            Ok(outcome) => {
                info!(
                    "event=draft_commit module=service status=ok record_id={} draft_id={} replayed={}",
                    draft.record_id, draft_id, outcome.replayed
                );
                Ok(outcome)
            }
            Err(SubmitError::Conflict { .. }) => {
                let current_sequence = self.actions.ledger().last_sequence(draft.record_id)?;
                Err(DraftError::Conflict {
                    draft: Box::new(draft),
                    current_sequence,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn owned_draft(&self, actor: &Actor, draft_id: DraftId) -> Result<Draft, DraftError> {
        let draft = self
            .actions
            .drafts()
            .get_by_id(draft_id)?
            .ok_or(DraftError::DraftNotFound(draft_id))?;
        if draft.actor_id != actor.id {
            return Err(DraftError::NotDraftOwner {
                draft_id,
                actor_id: actor.id.clone(),
            });
        }
        Ok(draft)
    }

    /// Snapshot of a record that still accepts drafts.
    fn open_snapshot(&self, record_id: RecordId) -> Result<RecordSnapshot, DraftError> {
        let history = self.actions.ledger().list_actions(record_id)?;
        let snapshot = self
            .actions
            .context()
            .projector
            .project(&history)?
            .ok_or(DraftError::RecordNotFound(record_id))?;
        if snapshot.status.is_terminal() {
            return Err(DraftError::RecordClosed {
                record_id,
                status: snapshot.status,
            });
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ScopeSet;
    use crate::db::open_db_in_memory;
    use crate::dedup::SqliteSearchIndex;
    use crate::model::action::{CreatePayload, DeclarationPayload, ReasonPayload};
    use crate::model::record::RecordType;
    use crate::repo::{SqliteActionRepository, SqliteDraftRepository};
    use crate::service::RegistryContext;
    use rusqlite::Connection;
    use serde_json::json;
    use uuid::Uuid;

    fn actor(id: &str) -> Actor {
        Actor {
            id: ActorId::from(id),
            role: "REGISTRATION_AGENT".to_string(),
            scopes: ScopeSet::parse(["record.declare", "record.archive", "record.read"]).unwrap(),
        }
    }

    fn declare(name: &str) -> ActionPayload {
        ActionPayload::Declare(DeclarationPayload {
            declaration: [("child.name".to_string(), json!(name))].into_iter().collect(),
        })
    }

    type Service<'a> = ActionService<
        'a,
        SqliteActionRepository<'a>,
        SqliteDraftRepository<'a>,
        SqliteSearchIndex<'a>,
    >;

    fn service<'a>(conn: &'a Connection, context: &'a RegistryContext) -> Service<'a> {
        ActionService::new(
            SqliteActionRepository::new(conn),
            SqliteDraftRepository::new(conn),
            SqliteSearchIndex::new(conn),
            context,
        )
    }

    fn create_record(service: &Service<'_>, owner: &Actor) -> RecordId {
        let record_id = Uuid::new_v4();
        service
            .submit(
                owner,
                &Submission {
                    record_id,
                    payload: ActionPayload::Create(CreatePayload {
                        record_type: RecordType::Birth,
                    }),
                    transaction_id: TransactionId::generate(),
                    expected_prior: None,
                    draft_id: None,
                },
            )
            .unwrap();
        record_id
    }

    #[test]
    fn save_upserts_and_commit_removes_the_draft() {
        let conn = open_db_in_memory().unwrap();
        let context = RegistryContext::default();
        let service = service(&conn, &context);
        let drafts = DraftService::new(&service);
        let owner = actor("agent-a");
        let record_id = create_record(&service, &owner);

        let tx = TransactionId::new("draft-tx");
        let first = drafts.save(&owner, record_id, &declare("Ad"), &tx).unwrap();
        let second = drafts.save(&owner, record_id, &declare("Ada"), &tx).unwrap();
        assert_eq!(first.draft_id, second.draft_id);
        assert_eq!(drafts.list_for_actor(&owner).unwrap().len(), 1);

        let outcome = drafts.commit(&owner, second.draft_id, Some(1)).unwrap();
        let committed = outcome.primary().unwrap();
        assert_eq!(committed.draft_id, Some(second.draft_id));
        assert_eq!(committed.transaction_id, tx);
        assert!(drafts
            .get(&owner, record_id, ActionType::Declare)
            .unwrap()
            .is_none());
    }

    #[test]
    fn conflicting_commit_keeps_the_draft() {
        let conn = open_db_in_memory().unwrap();
        let context = RegistryContext::default();
        let service = service(&conn, &context);
        let drafts = DraftService::new(&service);
        let owner = actor("agent-a");
        let record_id = create_record(&service, &owner);
        let draft = drafts
            .save(&owner, record_id, &declare("Ada"), &TransactionId::new("d-1"))
            .unwrap();

        match drafts.commit(&owner, draft.draft_id, Some(0)) {
            Err(DraftError::Conflict {
                draft: kept,
                current_sequence,
            }) => {
                assert_eq!(kept.draft_id, draft.draft_id);
                assert_eq!(current_sequence, 1);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(drafts
            .get(&owner, record_id, ActionType::Declare)
            .unwrap()
            .is_some());
    }

    #[test]
    fn only_owner_may_discard_and_closed_records_refuse_drafts() {
        let conn = open_db_in_memory().unwrap();
        let context = RegistryContext::default();
        let service = service(&conn, &context);
        let drafts = DraftService::new(&service);
        let owner = actor("agent-a");
        let other = actor("agent-b");
        let record_id = create_record(&service, &owner);

        let mine = drafts
            .save(&owner, record_id, &declare("Ada"), &TransactionId::new("a-1"))
            .unwrap();
        let theirs = drafts
            .save(&other, record_id, &declare("Grace"), &TransactionId::new("b-1"))
            .unwrap();
        assert!(matches!(
            drafts.discard(&other, mine.draft_id),
            Err(DraftError::NotDraftOwner { .. })
        ));

        service
            .submit(
                &owner,
                &Submission {
                    record_id,
                    payload: ActionPayload::Archive(ReasonPayload {
                        reason: "entered twice".to_string(),
                    }),
                    transaction_id: TransactionId::new("archive-1"),
                    expected_prior: None,
                    draft_id: None,
                },
            )
            .unwrap();

        assert!(matches!(
            drafts.get(&other, record_id, ActionType::Declare),
            Ok(None)
        ));
        assert!(matches!(
            drafts.commit(&other, theirs.draft_id, None),
            Err(DraftError::DraftNotFound(_))
        ));
        assert!(matches!(
            drafts.save(&owner, record_id, &declare("Ada"), &TransactionId::new("a-2")),
            Err(DraftError::RecordClosed {
                status: RecordStatus::Archived,
                ..
            })
        ));
    }
}

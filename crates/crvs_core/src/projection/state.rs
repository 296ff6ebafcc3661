//! Snapshot types and the history fold.

use crate::model::action::{
    merge_declaration, Action, ActionId, ActionPayload, ActionStatus, ActionType, Declaration,
    DuplicateCandidate,
};
use crate::model::record::{ActorId, RecordId, RecordType};
use crate::projection::status::RecordStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Derived holder of a record's exclusive assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "actor_id", rename_all = "snake_case")]
pub enum AssignmentState {
    Unassigned,
    Assigned(ActorId),
}

impl AssignmentState {
    pub fn holder(&self) -> Option<&ActorId> {
        match self {
            Self::Unassigned => None,
            Self::Assigned(actor_id) => Some(actor_id),
        }
    }

    pub fn is_held_by(&self, actor_id: &ActorId) -> bool {
        self.holder() == Some(actor_id)
    }
}

/// Which accepted action types release the assignment.
///
/// Terminal actions always release; `release_on` adds to them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentPolicy {
    #[serde(default)]
    pub release_on: BTreeSet<ActionType>,
}

impl AssignmentPolicy {
    pub fn releasing(action_types: impl IntoIterator<Item = ActionType>) -> Self {
        Self {
            release_on: action_types.into_iter().collect(),
        }
    }

    pub fn releases(&self, action_type: ActionType) -> bool {
        action_type.is_terminal() || self.release_on.contains(&action_type)
    }
}

/// Correction awaiting a review decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingCorrection {
    /// Action id of the REQUEST_CORRECTION.
    pub request_id: ActionId,
    pub requested_by: ActorId,
    pub declaration: Declaration,
    pub reason: String,
    /// Status restored when the request is decided.
    pub prior_status: RecordStatus,
}

/// Attention markers surfaced next to the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordFlag {
    PendingCorrection,
    PotentialDuplicate,
    Rejected,
}

/// Current view of a record, recomputed from its history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSnapshot {
    pub record_id: RecordId,
    pub record_type: RecordType,
    pub status: RecordStatus,
    pub created_at: i64,
    /// Timestamp of the last action that changed the snapshot.
    pub updated_at: i64,
    /// Last sequence in the history, including rejected actions.
    pub last_sequence: u64,
    pub declaration: Declaration,
    pub registration_number: Option<String>,
    pub certificates_printed: u32,
    pub assignment: AssignmentState,
    pub duplicates: Vec<DuplicateCandidate>,
    pub duplicate_of: Option<RecordId>,
    pub pending_correction: Option<PendingCorrection>,
    pub flags: BTreeSet<RecordFlag>,
}

impl RecordSnapshot {
    pub fn certificate_issued(&self) -> bool {
        self.certificates_printed > 0
    }

    fn compute_flags(&self) -> BTreeSet<RecordFlag> {
        let mut flags = BTreeSet::new();
        if self.pending_correction.is_some() {
            flags.insert(RecordFlag::PendingCorrection);
        }
        if !self.duplicates.is_empty() && self.status != RecordStatus::Archived {
            flags.insert(RecordFlag::PotentialDuplicate);
        }
        if self.status == RecordStatus::Rejected {
            flags.insert(RecordFlag::Rejected);
        }
        flags
    }
}

/// History could not be folded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    MissingCreate {
        record_id: RecordId,
    },
    MixedRecords {
        expected: RecordId,
        found: RecordId,
    },
    OutOfOrder {
        record_id: RecordId,
        expected: u64,
        found: u64,
    },
}

impl Display for ProjectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCreate { record_id } => {
                write!(f, "history of record {record_id} does not start with CREATE")
            }
            Self::MixedRecords { expected, found } => {
                write!(f, "history of record {expected} contains an action of {found}")
            }
            Self::OutOfOrder {
                record_id,
                expected,
                found,
            } => write!(
                f,
                "history of record {record_id} expected sequence {expected}, found {found}"
            ),
        }
    }
}

impl Error for ProjectionError {}

/// Folds histories into snapshots under a fixed assignment policy.
#[derive(Debug, Clone, Default)]
pub struct Projector {
    policy: AssignmentPolicy,
}

impl Projector {
    pub fn new(policy: AssignmentPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AssignmentPolicy {
        &self.policy
    }

    /// Folds `actions` (oldest first) into a snapshot.
    ///
    /// Returns `Ok(None)` for an empty history.
    pub fn project(&self, actions: &[Action]) -> Result<Option<RecordSnapshot>, ProjectionError> {
        let Some(first) = actions.first() else {
            return Ok(None);
        };
        let ActionPayload::Create(create) = &first.payload else {
            return Err(ProjectionError::MissingCreate {
                record_id: first.record_id,
            });
        };

        let mut snapshot = RecordSnapshot {
            record_id: first.record_id,
            record_type: create.record_type,
            status: RecordStatus::InProgress,
            created_at: first.created_at,
            updated_at: first.created_at,
            last_sequence: 0,
            declaration: Declaration::new(),
            registration_number: None,
            certificates_printed: 0,
            assignment: AssignmentState::Unassigned,
            duplicates: Vec::new(),
            duplicate_of: None,
            pending_correction: None,
            flags: BTreeSet::new(),
        };

        for action in actions {
            if action.record_id != snapshot.record_id {
                return Err(ProjectionError::MixedRecords {
                    expected: snapshot.record_id,
                    found: action.record_id,
                });
            }
            if action.sequence != snapshot.last_sequence + 1 {
                return Err(ProjectionError::OutOfOrder {
                    record_id: snapshot.record_id,
                    expected: snapshot.last_sequence + 1,
                    found: action.sequence,
                });
            }
            snapshot.last_sequence = action.sequence;

            if action.status == ActionStatus::Rejected {
                continue;
            }
            self.apply(&mut snapshot, action);
            snapshot.updated_at = action.created_at;
        }

        snapshot.flags = snapshot.compute_flags();
        Ok(Some(snapshot))
    }

    fn apply(&self, snapshot: &mut RecordSnapshot, action: &Action) {
        match &action.payload {
            ActionPayload::Create(_) => {
                snapshot.status = RecordStatus::InProgress;
                snapshot.assignment = AssignmentState::Assigned(action.actor_id.clone());
            }
            ActionPayload::Notify(payload) => {
                merge_declaration(&mut snapshot.declaration, &payload.declaration);
                snapshot.status = RecordStatus::Notified;
            }
            ActionPayload::Declare(payload) => {
                merge_declaration(&mut snapshot.declaration, &payload.declaration);
                snapshot.status = RecordStatus::Declared;
            }
            ActionPayload::Validate(payload) => {
                merge_declaration(&mut snapshot.declaration, &payload.declaration);
                snapshot.status = RecordStatus::Validated;
            }
            ActionPayload::Register(payload) => {
                merge_declaration(&mut snapshot.declaration, &payload.declaration);
                snapshot.registration_number = Some(payload.registration_number.clone());
                snapshot.status = RecordStatus::Registered;
            }
            ActionPayload::PrintCertificate(_) => {
                snapshot.certificates_printed = snapshot.certificates_printed.saturating_add(1);
            }
            ActionPayload::RequestCorrection(payload) => {
                snapshot.pending_correction = Some(PendingCorrection {
                    request_id: action.action_id,
                    requested_by: action.actor_id.clone(),
                    declaration: payload.declaration.clone(),
                    reason: payload.reason.clone(),
                    prior_status: snapshot.status,
                });
                snapshot.status = RecordStatus::CorrectionRequested;
            }
            ActionPayload::ApproveCorrection(decision) => {
                if let Some(pending) = take_pending(snapshot, decision.request_id) {
                    merge_declaration(&mut snapshot.declaration, &pending.declaration);
                    snapshot.status = pending.prior_status;
                }
            }
            ActionPayload::RejectCorrection(decision) => {
                if let Some(pending) = take_pending(snapshot, decision.request_id) {
                    snapshot.status = pending.prior_status;
                }
            }
            ActionPayload::Reject(_) => snapshot.status = RecordStatus::Rejected,
            ActionPayload::Archive(_) => snapshot.status = RecordStatus::Archived,
            ActionPayload::DetectDuplicate(payload) => {
                snapshot.duplicates = payload.candidates.clone();
            }
            ActionPayload::MarkedAsDuplicate(payload) => {
                snapshot.duplicate_of = Some(payload.duplicate_of);
                snapshot.status = RecordStatus::Duplicate;
            }
            ActionPayload::Assign(payload) => {
                snapshot.assignment = AssignmentState::Assigned(payload.assignee.clone());
            }
            ActionPayload::Unassign => snapshot.assignment = AssignmentState::Unassigned,
            ActionPayload::Read => {}
        }

        if self.policy.releases(action.action_type) {
            snapshot.assignment = AssignmentState::Unassigned;
        }
    }
}

fn take_pending(snapshot: &mut RecordSnapshot, request_id: ActionId) -> Option<PendingCorrection> {
    let decided = snapshot
        .pending_correction
        .as_ref()
        .is_some_and(|pending| pending.request_id == request_id);
    if decided {
        snapshot.pending_correction.take()
    } else {
        None
    }
}

/// Folds `actions` with the default assignment policy.
pub fn project(actions: &[Action]) -> Result<Option<RecordSnapshot>, ProjectionError> {
    Projector::default().project(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::action::{
        AssignPayload, CorrectionDecisionPayload, CorrectionRequestPayload, CreatePayload,
        DeclarationPayload, ReasonPayload, RegisterPayload, TransactionId,
    };
    use serde_json::json;
    use uuid::Uuid;

    struct History {
        record_id: RecordId,
        actions: Vec<Action>,
    }

    impl History {
        fn new() -> Self {
            let mut history = Self {
                record_id: Uuid::new_v4(),
                actions: Vec::new(),
            };
            history.push(
                "agent",
                ActionPayload::Create(CreatePayload {
                    record_type: RecordType::Birth,
                }),
            );
            history
        }

        fn push(&mut self, actor: &str, payload: ActionPayload) -> ActionId {
            let sequence = self.actions.len() as u64 + 1;
            let action_id = Uuid::new_v4();
            self.actions.push(Action {
                action_id,
                record_id: self.record_id,
                sequence,
                action_type: payload.action_type(),
                actor_id: ActorId::from(actor),
                actor_role: "ROLE".to_string(),
                status: payload.action_type().initial_status(),
                payload,
                transaction_id: TransactionId::new(format!("tx-{sequence}")),
                draft_id: None,
                created_at: 1_000 + sequence as i64,
            });
            action_id
        }
    }

    fn declaration(field: &str, value: &str) -> Declaration {
        let mut declaration = Declaration::new();
        declaration.insert(field.to_string(), json!(value));
        declaration
    }

    #[test]
    fn empty_history_has_no_snapshot() {
        assert_eq!(project(&[]).unwrap(), None);
    }

    #[test]
    fn creator_holds_the_new_record() {
        let history = History::new();
        let snapshot = project(&history.actions).unwrap().unwrap();
        assert_eq!(snapshot.status, RecordStatus::InProgress);
        assert_eq!(
            snapshot.assignment,
            AssignmentState::Assigned(ActorId::from("agent"))
        );
        assert_eq!(snapshot.last_sequence, 1);
    }

    #[test]
    fn later_registration_wins() {
        let mut history = History::new();
        history.push(
            "agent",
            ActionPayload::Declare(DeclarationPayload {
                declaration: declaration("child.name", "Ada"),
            }),
        );
        for number in ["REG-1", "REG-2"] {
            history.push(
                "agent",
                ActionPayload::Register(RegisterPayload {
                    declaration: Declaration::new(),
                    registration_number: number.to_string(),
                }),
            );
        }

        let snapshot = project(&history.actions).unwrap().unwrap();
        assert_eq!(snapshot.registration_number.as_deref(), Some("REG-2"));
        assert_eq!(snapshot.status, RecordStatus::Registered);
    }

    #[test]
    fn rejected_actions_are_skipped_but_counted() {
        let mut history = History::new();
        history.push(
            "agent",
            ActionPayload::Reject(ReasonPayload {
                reason: "incomplete".to_string(),
            }),
        );
        history.actions[1].status = ActionStatus::Rejected;

        let snapshot = project(&history.actions).unwrap().unwrap();
        assert_eq!(snapshot.status, RecordStatus::InProgress);
        assert_eq!(snapshot.last_sequence, 2);
        assert_eq!(snapshot.updated_at, history.actions[0].created_at);
    }

    #[test]
    fn approved_correction_restores_status_and_applies_fields() {
        let mut history = History::new();
        history.push(
            "agent",
            ActionPayload::Declare(DeclarationPayload {
                declaration: declaration("child.name", "Ada"),
            }),
        );
        history.push(
            "registrar",
            ActionPayload::Register(RegisterPayload {
                declaration: Declaration::new(),
                registration_number: "REG-1".to_string(),
            }),
        );
        let request_id = history.push(
            "agent",
            ActionPayload::RequestCorrection(CorrectionRequestPayload {
                declaration: declaration("child.name", "Ada Lovelace"),
                reason: "typo".to_string(),
            }),
        );

        let pending = project(&history.actions).unwrap().unwrap();
        assert_eq!(pending.status, RecordStatus::CorrectionRequested);
        assert!(pending.flags.contains(&RecordFlag::PendingCorrection));
        assert_eq!(pending.declaration.get("child.name"), Some(&json!("Ada")));

        history.push(
            "registrar",
            ActionPayload::ApproveCorrection(CorrectionDecisionPayload {
                request_id,
                reason: None,
            }),
        );
        let approved = project(&history.actions).unwrap().unwrap();
        assert_eq!(approved.status, RecordStatus::Registered);
        assert_eq!(
            approved.declaration.get("child.name"),
            Some(&json!("Ada Lovelace"))
        );
        assert!(approved.flags.is_empty());
    }

    #[test]
    fn policy_controls_release() {
        let mut history = History::new();
        history.push(
            "agent",
            ActionPayload::Declare(DeclarationPayload {
                declaration: declaration("child.name", "Ada"),
            }),
        );

        let held = project(&history.actions).unwrap().unwrap();
        assert!(held.assignment.is_held_by(&ActorId::from("agent")));

        let releasing = Projector::new(AssignmentPolicy::releasing([ActionType::Declare]));
        let released = releasing.project(&history.actions).unwrap().unwrap();
        assert_eq!(released.assignment, AssignmentState::Unassigned);
    }

    #[test]
    fn archive_releases_and_reassign_moves_holder() {
        let mut history = History::new();
        history.push(
            "admin",
            ActionPayload::Assign(AssignPayload {
                assignee: ActorId::from("registrar"),
            }),
        );
        let reassigned = project(&history.actions).unwrap().unwrap();
        assert!(reassigned.assignment.is_held_by(&ActorId::from("registrar")));

        history.push(
            "registrar",
            ActionPayload::Archive(ReasonPayload {
                reason: "test".to_string(),
            }),
        );
        let archived = project(&history.actions).unwrap().unwrap();
        assert_eq!(archived.status, RecordStatus::Archived);
        assert_eq!(archived.assignment, AssignmentState::Unassigned);
    }

    #[test]
    fn gaps_and_foreign_actions_are_rejected() {
        let mut history = History::new();
        history.push("agent", ActionPayload::Read);
        history.actions[1].sequence = 3;
        assert!(matches!(
            project(&history.actions),
            Err(ProjectionError::OutOfOrder {
                expected: 2,
                found: 3,
                ..
            })
        ));

        history.actions[1].sequence = 2;
        history.actions[1].record_id = Uuid::new_v4();
        assert!(matches!(
            project(&history.actions),
            Err(ProjectionError::MixedRecords { .. })
        ));
    }

    #[test]
    fn history_must_start_with_create() {
        let mut history = History::new();
        history.push("agent", ActionPayload::Read);
        let tail = history.actions.split_off(1);
        assert!(matches!(
            project(&tail),
            Err(ProjectionError::MissingCreate { .. })
        ));
    }
}

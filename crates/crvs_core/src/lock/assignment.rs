//! Exclusive assignment checks against a projected lock state.

use crate::model::action::{Action, ActionPayload, ActionStatus, ActionType};
use crate::model::record::ActorId;
use crate::projection::AssignmentState;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Who is asking, and whether they may act on others' assignments.
#[derive(Debug, Clone, Copy)]
pub struct LockRequest<'a> {
    pub actor_id: &'a ActorId,
    pub can_override: bool,
}

/// Admission outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockDecision {
    /// Append the action.
    Proceed,
    /// ASSIGN re-asserted by the current holder; nothing to append.
    AlreadyHeld,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The action needs the lock and someone else (or nobody) holds it.
    NotAssignedToYou { holder: Option<ActorId> },
    AlreadyAssigned { holder: ActorId },
    /// UNASSIGN on an unassigned record.
    NotAssigned,
}

impl Display for LockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAssignedToYou { holder: Some(holder) } => {
                write!(f, "record is assigned to {holder}")
            }
            Self::NotAssignedToYou { holder: None } => {
                write!(f, "record must be assigned to you first")
            }
            Self::AlreadyAssigned { holder } => write!(f, "record is already assigned to {holder}"),
            Self::NotAssigned => write!(f, "record is not assigned"),
        }
    }
}

impl Error for LockError {}

/// Checks `payload` against the current lock `state`.
///
/// CREATE and READ bypass the lock. Whether an actor may assign someone other
/// than themselves is an authorization question and is not decided here.
pub fn check_assignment(
    state: &AssignmentState,
    request: LockRequest<'_>,
    payload: &ActionPayload,
) -> Result<LockDecision, LockError> {
    match payload {
        ActionPayload::Create(_) | ActionPayload::Read => Ok(LockDecision::Proceed),
        ActionPayload::Assign(assign) => match state.holder() {
            None => Ok(LockDecision::Proceed),
            Some(holder) if *holder == assign.assignee => Ok(LockDecision::AlreadyHeld),
            Some(_) if request.can_override => Ok(LockDecision::Proceed),
            Some(holder) => Err(LockError::AlreadyAssigned {
                holder: holder.clone(),
            }),
        },
        ActionPayload::Unassign => match state.holder() {
            None => Err(LockError::NotAssigned),
            Some(holder) if holder == request.actor_id || request.can_override => {
                Ok(LockDecision::Proceed)
            }
            Some(holder) => Err(LockError::NotAssignedToYou {
                holder: Some(holder.clone()),
            }),
        },
        _ => {
            if state.is_held_by(request.actor_id) {
                Ok(LockDecision::Proceed)
            } else {
                Err(LockError::NotAssignedToYou {
                    holder: state.holder().cloned(),
                })
            }
        }
    }
}

/// Latest accepted CREATE or ASSIGN, i.e. the action that established the
/// current assignment when one is held.
pub fn latest_assignment_action(history: &[Action]) -> Option<&Action> {
    history.iter().rev().find(|action| {
        action.status != ActionStatus::Rejected
            && matches!(action.action_type, ActionType::Create | ActionType::Assign)
    })
}

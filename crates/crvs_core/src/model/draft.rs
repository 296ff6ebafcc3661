//! Draft model: per-actor work-in-progress payloads.
//!
//! # Invariants
//! - At most one draft exists per `(record_id, actor_id, action_type)`.
//! - `payload.action_type()` always equals `action_type`.
//! - Drafts are scratch data and never affect derived record state.

use crate::model::action::{ActionPayload, ActionType, TransactionId};
use crate::model::record::{ActorId, RecordId};
use serde::Serialize;
use uuid::Uuid;

/// Stable identifier of one saved draft.
pub type DraftId = Uuid;

/// Unsubmitted action payload owned by one actor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Draft {
    pub draft_id: DraftId,
    pub record_id: RecordId,
    pub actor_id: ActorId,
    pub action_type: ActionType,
    pub payload: ActionPayload,
    /// Reused as the action transaction id on commit, so a retried commit
    /// replays instead of appending twice.
    pub transaction_id: TransactionId,
    pub created_at: i64,
    pub updated_at: i64,
}

//! Outbox sink keeping the duplicate-candidate index in step with the ledger.

use crate::dedup::{IndexDocument, SearchBackend};
use crate::model::action::{field_text, ActionType};
use crate::projection::Projector;
use crate::repo::ActionRepository;
use crate::service::outbox_relay::{CommittedActionEvent, NotificationSink, SinkError};
use log::debug;
use std::collections::BTreeMap;

/// Re-projects the event's record and upserts (or removes) its document.
///
/// Indexing the current projection instead of the event makes redelivery
/// and out-of-order delivery harmless.
pub struct RecordIndexer<'p, R, B>
where
    R: ActionRepository,
    B: SearchBackend,
{
    ledger: R,
    index: B,
    projector: &'p Projector,
}

impl<'p, R, B> RecordIndexer<'p, R, B>
where
    R: ActionRepository,
    B: SearchBackend,
{
    pub fn new(ledger: R, index: B, projector: &'p Projector) -> Self {
        Self {
            ledger,
            index,
            projector,
        }
    }
}

/// Action types whose commit never changes indexed data.
fn leaves_index_unchanged(action_type: ActionType) -> bool {
    matches!(
        action_type,
        ActionType::Assign
            | ActionType::Unassign
            | ActionType::Read
            | ActionType::PrintCertificate
            | ActionType::DetectDuplicate
    )
}

impl<R, B> NotificationSink for RecordIndexer<'_, R, B>
where
    R: ActionRepository,
    B: SearchBackend,
{
    fn name(&self) -> &str {
        "record_index"
    }

    fn deliver(&self, event: &CommittedActionEvent) -> Result<(), SinkError> {
        if leaves_index_unchanged(event.action_type) {
            return Ok(());
        }

        let history = self
            .ledger
            .list_actions(event.record_id)
            .map_err(|err| SinkError::new(err.to_string()))?;
        let snapshot = self
            .projector
            .project(&history)
            .map_err(|err| SinkError::new(err.to_string()))?;
        let Some(snapshot) = snapshot else {
            return Ok(());
        };

        let fields: BTreeMap<String, String> = snapshot
            .declaration
            .iter()
            .filter_map(|(field, value)| field_text(value).map(|text| (field.clone(), text)))
            .collect();

        let result = if snapshot.status.is_terminal() || fields.is_empty() {
            self.index.remove(snapshot.record_id)
        } else {
            self.index.index(&IndexDocument {
                record_id: snapshot.record_id,
                record_type: snapshot.record_type,
                sequence: snapshot.last_sequence,
                fields,
            })
        };
        result.map_err(|err| SinkError::new(err.to_string()))?;

        debug!(
            "event=index_sync module=service status=ok record_id={} sequence={} record_status={}",
            snapshot.record_id, snapshot.last_sequence, snapshot.status
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db_in_memory;
    use crate::dedup::SqliteSearchIndex;
    use crate::model::action::{
        ActionPayload, CreatePayload, DeclarationPayload, NewAction, ReasonPayload, TransactionId,
    };
    use crate::model::record::{ActorId, RecordId, RecordType};
    use crate::repo::{SqliteActionRepository, SqliteOutboxRepository};
    use crate::service::OutboxRelay;
    use serde_json::json;
    use uuid::Uuid;

    fn append(repo: &SqliteActionRepository<'_>, record_id: RecordId, payload: ActionPayload) {
        let action = NewAction {
            actor_id: ActorId::from("agent-1"),
            actor_role: "FIELD_AGENT".to_string(),
            payload,
            transaction_id: TransactionId::generate(),
            draft_id: None,
        };
        repo.append(record_id, &[action], None).unwrap();
    }

    #[test]
    fn indexes_declared_records_and_drops_archived_ones() {
        let conn = open_db_in_memory().unwrap();
        let ledger = SqliteActionRepository::new(&conn);
        let index = SqliteSearchIndex::new(&conn);
        let projector = Projector::default();
        let indexer = RecordIndexer::new(ledger, index, &projector);
        let relay = OutboxRelay::new(SqliteOutboxRepository::new(&conn));

        let record_id = Uuid::new_v4();
        append(
            &ledger,
            record_id,
            ActionPayload::Create(CreatePayload {
                record_type: RecordType::Birth,
            }),
        );
        append(
            &ledger,
            record_id,
            ActionPayload::Declare(DeclarationPayload {
                declaration: [
                    ("child.name".to_string(), json!("Ada Lovelace")),
                    ("child.photo".to_string(), json!({ "id": "doc-1" })),
                ]
                .into_iter()
                .collect(),
            }),
        );

        relay.drain(&indexer, 10).unwrap();
        assert_eq!(index.document_count().unwrap(), 1);
        // Redelivery is harmless.
        let history = ledger.list_actions(record_id).unwrap();
        let event = CommittedActionEvent {
            record_id,
            action_type: ActionType::Declare,
            sequence: 2,
            transaction_id: history[1].transaction_id.clone(),
            timestamp: history[1].created_at,
        };
        indexer.deliver(&event).unwrap();
        assert_eq!(index.document_count().unwrap(), 1);

        append(
            &ledger,
            record_id,
            ActionPayload::Archive(ReasonPayload {
                reason: "test entry".to_string(),
            }),
        );
        relay.drain(&indexer, 10).unwrap();
        assert_eq!(index.document_count().unwrap(), 0);
    }
}

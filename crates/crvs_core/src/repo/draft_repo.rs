//! Draft repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist per-actor draft payloads with upsert semantics.
//! - Support the delete paths used by commit, discard and terminal cleanup.
//!
//! # Invariants
//! - One row per `(record_id, actor_id, action_type)`.
//! - Saved payloads are validated like ledger payloads.

use crate::model::action::{ActionPayload, ActionType, TransactionId};
use crate::model::draft::{Draft, DraftId};
use crate::model::now_epoch_ms;
use crate::model::record::{ActorId, RecordId};
use crate::repo::action_repo::{
    decode_payload, encode_payload, parse_action_type, parse_uuid, RepoError, RepoResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const DRAFT_SELECT_SQL: &str = "SELECT
    draft_id,
    record_id,
    actor_id,
    action_type,
    payload,
    transaction_id,
    created_at,
    updated_at
FROM drafts";

/// Repository interface for draft persistence.
pub trait DraftRepository {
    /// Creates or replaces the actor's draft for the payload's action type.
    fn upsert(
        &self,
        record_id: RecordId,
        actor_id: &ActorId,
        payload: &ActionPayload,
        transaction_id: &TransactionId,
    ) -> RepoResult<Draft>;
    fn get(
        &self,
        record_id: RecordId,
        actor_id: &ActorId,
        action_type: ActionType,
    ) -> RepoResult<Option<Draft>>;
    fn get_by_id(&self, draft_id: DraftId) -> RepoResult<Option<Draft>>;
    /// Drafts owned by `actor_id`, most recently updated first.
    fn list_for_actor(&self, actor_id: &ActorId) -> RepoResult<Vec<Draft>>;
    fn delete(&self, draft_id: DraftId) -> RepoResult<()>;
    /// Returns whether a draft existed.
    fn delete_for(
        &self,
        record_id: RecordId,
        actor_id: &ActorId,
        action_type: ActionType,
    ) -> RepoResult<bool>;
    /// Removes every actor's drafts for the record; returns the count.
    fn delete_all_for_record(&self, record_id: RecordId) -> RepoResult<usize>;
}

/// SQLite-backed draft repository.
#[derive(Clone, Copy)]
pub struct SqliteDraftRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDraftRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl DraftRepository for SqliteDraftRepository<'_> {
    fn upsert(
        &self,
        record_id: RecordId,
        actor_id: &ActorId,
        payload: &ActionPayload,
        transaction_id: &TransactionId,
    ) -> RepoResult<Draft> {
        payload.validate()?;
        transaction_id.validate()?;

        let action_type = payload.action_type();
        let now = now_epoch_ms();
        self.conn.execute(
            "INSERT INTO drafts (
                draft_id,
                record_id,
                actor_id,
                action_type,
                payload,
                transaction_id,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT (record_id, actor_id, action_type) DO UPDATE SET
                payload = excluded.payload,
                transaction_id = excluded.transaction_id,
                updated_at = excluded.updated_at;",
            params![
                Uuid::new_v4().to_string(),
                record_id.to_string(),
                actor_id.as_str(),
                action_type.as_str(),
                encode_payload(payload)?,
                transaction_id.as_str(),
                now,
            ],
        )?;

        self.get(record_id, actor_id, action_type)?.ok_or_else(|| {
            RepoError::InvalidData(format!(
                "draft for record {record_id} vanished right after upsert"
            ))
        })
    }

    fn get(
        &self,
        record_id: RecordId,
        actor_id: &ActorId,
        action_type: ActionType,
    ) -> RepoResult<Option<Draft>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DRAFT_SELECT_SQL}
             WHERE record_id = ?1
               AND actor_id = ?2
               AND action_type = ?3;"
        ))?;
        let draft = stmt
            .query_row(
                params![record_id.to_string(), actor_id.as_str(), action_type.as_str()],
                |row| Ok(parse_draft_row(row)),
            )
            .optional()?;
        draft.transpose()
    }

    fn get_by_id(&self, draft_id: DraftId) -> RepoResult<Option<Draft>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{DRAFT_SELECT_SQL} WHERE draft_id = ?1;"))?;
        let draft = stmt
            .query_row([draft_id.to_string()], |row| Ok(parse_draft_row(row)))
            .optional()?;
        draft.transpose()
    }

    fn list_for_actor(&self, actor_id: &ActorId) -> RepoResult<Vec<Draft>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DRAFT_SELECT_SQL}
             WHERE actor_id = ?1
             ORDER BY updated_at DESC, draft_id ASC;"
        ))?;
        let mut rows = stmt.query([actor_id.as_str()])?;
        let mut drafts = Vec::new();
        while let Some(row) = rows.next()? {
            drafts.push(parse_draft_row(row)?);
        }
        Ok(drafts)
    }

    fn delete(&self, draft_id: DraftId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM drafts WHERE draft_id = ?1;", [draft_id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::DraftNotFound(draft_id));
        }
        Ok(())
    }

    fn delete_for(
        &self,
        record_id: RecordId,
        actor_id: &ActorId,
        action_type: ActionType,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM drafts
             WHERE record_id = ?1
               AND actor_id = ?2
               AND action_type = ?3;",
            params![record_id.to_string(), actor_id.as_str(), action_type.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn delete_all_for_record(&self, record_id: RecordId) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "DELETE FROM drafts WHERE record_id = ?1;",
            [record_id.to_string()],
        )?;
        Ok(changed)
    }
}

fn parse_draft_row(row: &Row<'_>) -> RepoResult<Draft> {
    let draft_id_text: String = row.get("draft_id")?;
    let record_id_text: String = row.get("record_id")?;
    let type_text: String = row.get("action_type")?;
    let action_type = parse_action_type(&type_text, "drafts.action_type")?;
    let payload_text: String = row.get("payload")?;

    Ok(Draft {
        draft_id: parse_uuid(&draft_id_text, "drafts.draft_id")?,
        record_id: parse_uuid(&record_id_text, "drafts.record_id")?,
        actor_id: ActorId::new(row.get::<_, String>("actor_id")?),
        action_type,
        payload: decode_payload(&payload_text, action_type, "drafts.payload")?,
        transaction_id: TransactionId::new(row.get::<_, String>("transaction_id")?),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

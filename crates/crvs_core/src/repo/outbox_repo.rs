//! Committed-action outbox access.
//!
//! # Responsibility
//! - Expose pending outbox rows in commit order.
//! - Stamp delivery and failed attempts.
//!
//! # Invariants
//! - Rows are only written by ledger appends, in the append transaction.
//! - A delivered row is never handed out again.

use crate::model::action::{ActionType, TransactionId};
use crate::model::now_epoch_ms;
use crate::model::record::RecordId;
use crate::repo::action_repo::{parse_action_type, parse_uuid, RepoError, RepoResult};
use rusqlite::{Connection, Row};
use serde::Serialize;

/// One committed action awaiting delivery to downstream sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxEntry {
    pub outbox_id: i64,
    pub record_id: RecordId,
    pub sequence: u64,
    pub action_type: ActionType,
    pub transaction_id: TransactionId,
    pub created_at: i64,
    pub attempts: u32,
}

pub trait OutboxRepository {
    /// Undelivered entries, oldest first.
    fn pending(&self, limit: u32) -> RepoResult<Vec<OutboxEntry>>;
    fn pending_count(&self) -> RepoResult<u64>;
    fn mark_delivered(&self, outbox_id: i64) -> RepoResult<()>;
    fn record_failed_attempt(&self, outbox_id: i64) -> RepoResult<()>;
}

#[derive(Clone, Copy)]
pub struct SqliteOutboxRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOutboxRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl OutboxRepository for SqliteOutboxRepository<'_> {
    fn pending(&self, limit: u32) -> RepoResult<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                outbox_id,
                record_id,
                sequence,
                action_type,
                transaction_id,
                created_at,
                attempts
             FROM action_outbox
             WHERE delivered_at IS NULL
             ORDER BY outbox_id ASC
             LIMIT ?1;",
        )?;
        let mut rows = stmt.query([i64::from(limit)])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_outbox_row(row)?);
        }
        Ok(entries)
    }

    fn pending_count(&self) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM action_outbox WHERE delivered_at IS NULL;",
            [],
            |row| row.get(0),
        )?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative outbox count {count}")))
    }

    fn mark_delivered(&self, outbox_id: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE action_outbox
             SET delivered_at = ?2,
                 attempts = attempts + 1
             WHERE outbox_id = ?1
               AND delivered_at IS NULL;",
            [outbox_id, now_epoch_ms()],
        )?;
        if changed == 0 {
            return Err(RepoError::InvalidData(format!(
                "outbox entry {outbox_id} is missing or already delivered"
            )));
        }
        Ok(())
    }

    fn record_failed_attempt(&self, outbox_id: i64) -> RepoResult<()> {
        self.conn.execute(
            "UPDATE action_outbox SET attempts = attempts + 1 WHERE outbox_id = ?1;",
            [outbox_id],
        )?;
        Ok(())
    }
}

fn parse_outbox_row(row: &Row<'_>) -> RepoResult<OutboxEntry> {
    let record_id_text: String = row.get("record_id")?;
    let type_text: String = row.get("action_type")?;
    let sequence_raw: i64 = row.get("sequence")?;
    let attempts_raw: i64 = row.get("attempts")?;

    Ok(OutboxEntry {
        outbox_id: row.get("outbox_id")?,
        record_id: parse_uuid(&record_id_text, "action_outbox.record_id")?,
        sequence: u64::try_from(sequence_raw).map_err(|_| {
            RepoError::InvalidData(format!(
                "invalid sequence `{sequence_raw}` in action_outbox.sequence"
            ))
        })?,
        action_type: parse_action_type(&type_text, "action_outbox.action_type")?,
        transaction_id: TransactionId::new(row.get::<_, String>("transaction_id")?),
        created_at: row.get("created_at")?,
        attempts: u32::try_from(attempts_raw).unwrap_or(u32::MAX),
    })
}

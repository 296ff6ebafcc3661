//! Action ledger contracts and SQLite implementation.
//!
//! # Responsibility
//! - Append validated action batches atomically with per-record sequencing.
//! - Serve ordered history and transaction-id lookups.
//!
//! # Invariants
//! - Sequences start at 1 and grow by exactly 1 per action, per record.
//! - An append either writes every action of the batch (plus one outbox row
//!   per action) or nothing.
//! - A transaction id maps to exactly one committed batch per record.
//! - The first action of every record is CREATE and CREATE never appears
//!   anywhere else.

use crate::db::DbError;
use crate::model::action::{
    Action, ActionId, ActionPayload, ActionStatus, ActionType, ActionValidationError, NewAction,
    TransactionId,
};
use crate::model::draft::DraftId;
use crate::model::now_epoch_ms;
use crate::model::record::{ActorId, RecordHeader, RecordId, RecordType};
use log::{debug, warn};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const ACTION_SELECT_SQL: &str = "SELECT
    action_id,
    record_id,
    sequence,
    action_type,
    actor_id,
    actor_role,
    status,
    payload,
    transaction_id,
    draft_id,
    created_at
FROM actions";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for ledger, draft and outbox persistence.
#[derive(Debug)]
pub enum RepoError {
    Validation(ActionValidationError),
    Db(DbError),
    RecordNotFound(RecordId),
    RecordAlreadyExists(RecordId),
    /// CREATE submitted anywhere but as the first action of a new record.
    CreateOutOfOrder(RecordId),
    /// Compare-and-swap on the record's last sequence failed.
    SequenceConflict {
        record_id: RecordId,
        expected: u64,
        actual: u64,
    },
    /// Transaction id already committed with a different action.
    TransactionReused {
        record_id: RecordId,
        transaction_id: TransactionId,
    },
    EmptyBatch,
    /// Batch actions must share one transaction id.
    MixedTransactions,
    DraftNotFound(DraftId),
    InvalidData(String),
}

impl RepoError {
    /// Whether SQLite gave up waiting for a competing writer.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _))) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::RecordNotFound(id) => write!(f, "record not found: {id}"),
            Self::RecordAlreadyExists(id) => write!(f, "record already exists: {id}"),
            Self::CreateOutOfOrder(id) => {
                write!(f, "CREATE must be the first action of record {id}")
            }
            Self::SequenceConflict {
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
            Self::EmptyBatch => write!(f, "append batch must contain at least one action"),
            Self::MixedTransactions => {
                write!(f, "all actions of one append must share a transaction id")
            }
            Self::DraftNotFound(id) => write!(f, "draft not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted ledger data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ActionValidationError> for RepoError {
    fn from(value: ActionValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Result of one append call.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendOutcome {
    /// Committed actions in sequence order.
    pub actions: Vec<Action>,
    /// `true` when the transaction id was already committed and nothing new
    /// was written.
    pub replayed: bool,
}

/// Repository interface for the append-only action ledger.
pub trait ActionRepository {
    /// Appends `batch` atomically.
    ///
    /// `expected_prior` pins the record's last sequence (0 when the record
    /// has no history); `None` appends after whatever is current.
    fn append(
        &self,
        record_id: RecordId,
        batch: &[NewAction],
        expected_prior: Option<u64>,
    ) -> RepoResult<AppendOutcome>;
    /// Full history, oldest first.
    fn list_actions(&self, record_id: RecordId) -> RepoResult<Vec<Action>>;
    /// Actions committed under `transaction_id`, in sequence order.
    fn find_by_transaction(
        &self,
        record_id: RecordId,
        transaction_id: &TransactionId,
    ) -> RepoResult<Vec<Action>>;
    fn record(&self, record_id: RecordId) -> RepoResult<Option<RecordHeader>>;
    /// Last committed sequence, 0 for unknown records.
    fn last_sequence(&self, record_id: RecordId) -> RepoResult<u64>;
}

/// SQLite-backed action ledger.
#[derive(Clone, Copy)]
pub struct SqliteActionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteActionRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ActionRepository for SqliteActionRepository<'_> {
    fn append(
        &self,
        record_id: RecordId,
        batch: &[NewAction],
        expected_prior: Option<u64>,
    ) -> RepoResult<AppendOutcome> {
        let Some(primary) = batch.first() else {
            return Err(RepoError::EmptyBatch);
        };
        primary.transaction_id.validate()?;
        for action in batch {
            if action.transaction_id != primary.transaction_id {
                return Err(RepoError::MixedTransactions);
            }
            action.payload.validate()?;
        }
        let primary_payload = encode_payload(&primary.payload)?;

        // Immediate: the sequence read and the inserts happen under one
        // writer lock, so two appenders cannot both observe the same tail.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let record_text = record_id.to_string();

        let existing = select_by_transaction(&tx, &record_text, &primary.transaction_id)?;
        if !existing.is_empty() {
            let same_request = existing
                .iter()
                .find(|action| action.action_type == primary.action_type())
                .map(|action| encode_payload(&action.payload))
                .transpose()?
                .is_some_and(|stored| stored == primary_payload);
            if !same_request {
                return Err(RepoError::TransactionReused {
                    record_id,
                    transaction_id: primary.transaction_id.clone(),
                });
            }
            debug!(
                "event=ledger_append module=repo status=replay record_id={} transaction_id={} actions={}",
                record_id,
                primary.transaction_id,
                existing.len()
            );
            return Ok(AppendOutcome {
                actions: existing,
                replayed: true,
            });
        }

        let header_exists = record_exists_in_tx(&tx, &record_text)?;
        if batch
            .iter()
            .skip(1)
            .any(|action| action.action_type() == ActionType::Create)
        {
            return Err(RepoError::CreateOutOfOrder(record_id));
        }
        match (header_exists, primary.action_type() == ActionType::Create) {
            (true, true) => return Err(RepoError::RecordAlreadyExists(record_id)),
            (false, false) => return Err(RepoError::RecordNotFound(record_id)),
            _ => {}
        }

        let current = last_sequence_in_tx(&tx, &record_text)?;
        if let Some(expected) = expected_prior {
            if expected != current {
                return Err(RepoError::SequenceConflict {
                    record_id,
                    expected,
                    actual: current,
                });
            }
        }

        let created_at = now_epoch_ms();
        if let ActionPayload::Create(create) = &primary.payload {
            tx.execute(
                "INSERT INTO records (record_id, record_type, created_at) VALUES (?1, ?2, ?3);",
                params![record_text, create.record_type.as_str(), created_at],
            )?;
        }

        let mut committed = Vec::with_capacity(batch.len());
        for (offset, action) in batch.iter().enumerate() {
            let sequence = current + 1 + offset as u64;
            let stored = Action {
                action_id: Uuid::new_v4(),
                record_id,
                sequence,
                action_type: action.action_type(),
                actor_id: action.actor_id.clone(),
                actor_role: action.actor_role.clone(),
                status: action.status(),
                payload: action.payload.clone(),
                transaction_id: action.transaction_id.clone(),
                draft_id: action.draft_id,
                created_at,
            };
            insert_action(&tx, &stored).map_err(|err| {
                backstop_conflict(err, record_id, expected_prior.unwrap_or(current), current)
            })?;
            committed.push(stored);
        }

        tx.commit()?;
        debug!(
            "event=ledger_append module=repo status=ok record_id={} transaction_id={} first_sequence={} actions={}",
            record_id,
            primary.transaction_id,
            current + 1,
            committed.len()
        );

        Ok(AppendOutcome {
            actions: committed,
            replayed: false,
        })
    }

    fn list_actions(&self, record_id: RecordId) -> RepoResult<Vec<Action>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ACTION_SELECT_SQL}
             WHERE record_id = ?1
             ORDER BY sequence ASC;"
        ))?;
        let mut rows = stmt.query([record_id.to_string()])?;
        let mut actions = Vec::new();
        while let Some(row) = rows.next()? {
            actions.push(parse_action_row(row)?);
        }
        Ok(actions)
    }

    fn find_by_transaction(
        &self,
        record_id: RecordId,
        transaction_id: &TransactionId,
    ) -> RepoResult<Vec<Action>> {
        select_by_transaction(self.conn, &record_id.to_string(), transaction_id)
    }

    fn record(&self, record_id: RecordId) -> RepoResult<Option<RecordHeader>> {
        let row = self
            .conn
            .query_row(
                "SELECT record_type, created_at FROM records WHERE record_id = ?1;",
                [record_id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        let Some((type_text, created_at)) = row else {
            return Ok(None);
        };
        let record_type = RecordType::parse(&type_text).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid record type `{type_text}` in records.record_type"
            ))
        })?;

        Ok(Some(RecordHeader {
            record_id,
            record_type,
            created_at,
        }))
    }

    fn last_sequence(&self, record_id: RecordId) -> RepoResult<u64> {
        last_sequence_in_tx(self.conn, &record_id.to_string())
    }
}

fn insert_action(conn: &Connection, action: &Action) -> RepoResult<()> {
    let sequence = i64::try_from(action.sequence)
        .map_err(|_| RepoError::InvalidData(format!("sequence {} overflows", action.sequence)))?;

    conn.execute(
        "INSERT INTO actions (
            action_id,
            record_id,
            sequence,
            action_type,
            actor_id,
            actor_role,
            status,
            payload,
            transaction_id,
            draft_id,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
        params![
            action.action_id.to_string(),
            action.record_id.to_string(),
            sequence,
            action.action_type.as_str(),
            action.actor_id.as_str(),
            action.actor_role.as_str(),
            action.status.as_str(),
            encode_payload(&action.payload)?,
            action.transaction_id.as_str(),
            action.draft_id.map(|id| id.to_string()),
            action.created_at,
        ],
    )?;

    conn.execute(
        "INSERT INTO action_outbox (
            record_id,
            sequence,
            action_type,
            transaction_id,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            action.record_id.to_string(),
            sequence,
            action.action_type.as_str(),
            action.transaction_id.as_str(),
            action.created_at,
        ],
    )?;

    Ok(())
}

/// Maps a unique-constraint hit on insert to a sequence conflict. The
/// immediate transaction makes this unreachable for well-behaved writers.
fn backstop_conflict(err: RepoError, record_id: RecordId, expected: u64, actual: u64) -> RepoError {
    match &err {
        RepoError::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(failure, _)))
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            warn!(
                "event=ledger_append module=repo status=constraint_conflict record_id={} expected={} error={}",
                record_id, expected, err
            );
            RepoError::SequenceConflict {
                record_id,
                expected,
                actual,
            }
        }
        _ => err,
    }
}

fn select_by_transaction(
    conn: &Connection,
    record_text: &str,
    transaction_id: &TransactionId,
) -> RepoResult<Vec<Action>> {
    let mut stmt = conn.prepare(&format!(
        "{ACTION_SELECT_SQL}
         WHERE record_id = ?1
           AND transaction_id = ?2
         ORDER BY sequence ASC;"
    ))?;
    let mut rows = stmt.query(params![record_text, transaction_id.as_str()])?;
    let mut actions = Vec::new();
    while let Some(row) = rows.next()? {
        actions.push(parse_action_row(row)?);
    }
    Ok(actions)
}

fn record_exists_in_tx(conn: &Connection, record_text: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM records WHERE record_id = ?1);",
        [record_text],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn last_sequence_in_tx(conn: &Connection, record_text: &str) -> RepoResult<u64> {
    let last: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence), 0) FROM actions WHERE record_id = ?1;",
        [record_text],
        |row| row.get(0),
    )?;
    u64::try_from(last)
        .map_err(|_| RepoError::InvalidData(format!("negative sequence {last} in actions")))
}

pub(crate) fn encode_payload(payload: &ActionPayload) -> RepoResult<String> {
    serde_json::to_string(payload)
        .map_err(|err| RepoError::InvalidData(format!("payload serialization failed: {err}")))
}

pub(crate) fn decode_payload(
    text: &str,
    expected_type: ActionType,
    column: &str,
) -> RepoResult<ActionPayload> {
    let payload: ActionPayload = serde_json::from_str(text)
        .map_err(|err| RepoError::InvalidData(format!("invalid payload in {column}: {err}")))?;
    if payload.action_type() != expected_type {
        return Err(RepoError::InvalidData(format!(
            "payload type {} does not match {expected_type} in {column}",
            payload.action_type()
        )));
    }
    Ok(payload)
}

pub(crate) fn parse_uuid(text: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(text)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{text}` in {column}")))
}

pub(crate) fn parse_action_type(text: &str, column: &str) -> RepoResult<ActionType> {
    ActionType::parse(text)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid action type `{text}` in {column}")))
}

fn parse_action_row(row: &Row<'_>) -> RepoResult<Action> {
    let action_id_text: String = row.get("action_id")?;
    let action_id: ActionId = parse_uuid(&action_id_text, "actions.action_id")?;

    let record_id_text: String = row.get("record_id")?;
    let record_id = parse_uuid(&record_id_text, "actions.record_id")?;

    let sequence_raw: i64 = row.get("sequence")?;
    let sequence = u64::try_from(sequence_raw).map_err(|_| {
        RepoError::InvalidData(format!("invalid sequence `{sequence_raw}` in actions.sequence"))
    })?;

    let type_text: String = row.get("action_type")?;
    let action_type = parse_action_type(&type_text, "actions.action_type")?;

    let status_text: String = row.get("status")?;
    let status = ActionStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{status_text}` in actions.status"))
    })?;

    let payload_text: String = row.get("payload")?;
    let payload = decode_payload(&payload_text, action_type, "actions.payload")?;

    let draft_id = match row.get::<_, Option<String>>("draft_id")? {
        Some(text) => Some(parse_uuid(&text, "actions.draft_id")?),
        None => None,
    };

    Ok(Action {
        action_id,
        record_id,
        sequence,
        action_type,
        actor_id: ActorId::new(row.get::<_, String>("actor_id")?),
        actor_role: row.get("actor_role")?,
        status,
        payload,
        transaction_id: TransactionId::new(row.get::<_, String>("transaction_id")?),
        draft_id,
        created_at: row.get("created_at")?,
    })
}

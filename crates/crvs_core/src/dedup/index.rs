//! Candidate search backend contract and its SQLite implementation.
//!
//! # Responsibility
//! - Keep one document per live record: its normalized declaration fields.
//! - Answer lowered queries with scored hits under a deadline.
//!
//! # Invariants
//! - Indexing is an idempotent upsert; a document never regresses to an older
//!   record sequence.
//! - Hits are ordered by score descending, then record id ascending.

use crate::db::DbError;
use crate::dedup::fuzzy::normalize_text;
use crate::dedup::query::{IndexedFields, Query};
use crate::model::record::{RecordId, RecordType};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Result type for search backend APIs.
pub type SearchResult<T> = Result<T, SearchError>;

/// Search-layer error for deadlines, availability, DB interaction and
/// result decoding.
#[derive(Debug)]
pub enum SearchError {
    Timeout { elapsed_ms: u128 },
    Unavailable(String),
    Db(DbError),
    InvalidData(String),
}

impl SearchError {
    /// Whether a later retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable(_))
    }
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { elapsed_ms } => {
                write!(f, "search deadline exceeded after {elapsed_ms} ms")
            }
            Self::Unavailable(message) => write!(f, "search backend unavailable: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid search row: {message}"),
        }
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Timeout { .. } | Self::Unavailable(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for SearchError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Point in time a query must finish by.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started_at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            budget,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.started_at.elapsed() >= self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// `Err(Timeout)` once the budget is spent.
    pub fn check(&self) -> SearchResult<()> {
        if self.is_expired() {
            return Err(SearchError::Timeout {
                elapsed_ms: self.elapsed().as_millis(),
            });
        }
        Ok(())
    }
}

/// Indexable view of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub record_id: RecordId,
    pub record_type: RecordType,
    /// Record sequence the fields were projected at.
    pub sequence: u64,
    /// Raw scalar field values; the backend normalizes them.
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub record_type: RecordType,
    /// Record never returned as a hit (the subject itself).
    pub exclude: Option<RecordId>,
    pub query: Query,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record_id: RecordId,
    pub score: f64,
}

/// Text index consulted for duplicate candidates.
pub trait SearchBackend {
    fn index(&self, document: &IndexDocument) -> SearchResult<()>;
    fn remove(&self, record_id: RecordId) -> SearchResult<()>;
    fn query(&self, request: &SearchRequest, deadline: Deadline) -> SearchResult<Vec<SearchHit>>;
}

/// SQLite-backed candidate index over `record_index_docs`/`record_index`.
#[derive(Clone, Copy)]
pub struct SqliteSearchIndex<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSearchIndex<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Number of indexed documents, for diagnostics.
    pub fn document_count(&self) -> SearchResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM record_index_docs;", [], |row| row.get(0))?;
        u64::try_from(count)
            .map_err(|_| SearchError::InvalidData(format!("negative document count {count}")))
    }
}

impl SearchBackend for SqliteSearchIndex<'_> {
    fn index(&self, document: &IndexDocument) -> SearchResult<()> {
        let record_text = document.record_id.to_string();
        let sequence = i64::try_from(document.sequence).map_err(|_| {
            SearchError::InvalidData(format!("sequence {} overflows", document.sequence))
        })?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let indexed: Option<i64> = tx
            .query_row(
                "SELECT indexed_sequence FROM record_index_docs WHERE record_id = ?1;",
                [record_text.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if indexed.is_some_and(|indexed| indexed > sequence) {
            debug!(
                "event=index_upsert module=dedup status=skipped_stale record_id={} sequence={}",
                document.record_id, document.sequence
            );
            return Ok(());
        }

        tx.execute(
            "INSERT INTO record_index_docs (record_id, record_type, indexed_sequence)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (record_id) DO UPDATE SET
                record_type = excluded.record_type,
                indexed_sequence = excluded.indexed_sequence;",
            params![record_text, document.record_type.as_str(), sequence],
        )?;
        tx.execute(
            "DELETE FROM record_index WHERE record_id = ?1;",
            [record_text.as_str()],
        )?;
        for (field, value) in &document.fields {
            let normalized = normalize_text(value);
            if normalized.is_empty() {
                continue;
            }
            tx.execute(
                "INSERT INTO record_index (record_id, field_id, value, normalized)
                 VALUES (?1, ?2, ?3, ?4);",
                params![record_text, field, value, normalized],
            )?;
        }
        tx.commit()?;

        debug!(
            "event=index_upsert module=dedup status=ok record_id={} sequence={} fields={}",
            document.record_id,
            document.sequence,
            document.fields.len()
        );
        Ok(())
    }

    fn remove(&self, record_id: RecordId) -> SearchResult<()> {
        let record_text = record_id.to_string();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM record_index WHERE record_id = ?1;",
            [record_text.as_str()],
        )?;
        tx.execute(
            "DELETE FROM record_index_docs WHERE record_id = ?1;",
            [record_text.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn query(&self, request: &SearchRequest, deadline: Deadline) -> SearchResult<Vec<SearchHit>> {
        if request.limit == 0 || !request.query.can_match() {
            return Ok(Vec::new());
        }
        deadline.check()?;

        let mut sql = String::from(
            "SELECT
                d.record_id AS record_id,
                i.field_id AS field_id,
                i.normalized AS normalized
             FROM record_index_docs d
             JOIN record_index i ON i.record_id = d.record_id
             WHERE d.record_type = ?",
        );
        let mut bind_values: Vec<Value> =
            vec![Value::Text(request.record_type.as_str().to_string())];

        if let Some(exclude) = request.exclude {
            sql.push_str(" AND d.record_id <> ?");
            bind_values.push(Value::Text(exclude.to_string()));
        }

        for (field, value) in request.query.required_terms() {
            sql.push_str(
                " AND EXISTS (
                    SELECT 1
                    FROM record_index f
                    WHERE f.record_id = d.record_id
                      AND f.field_id = ?
                      AND f.normalized = ?
                )",
            );
            bind_values.push(Value::Text(field.to_string()));
            bind_values.push(Value::Text(value.to_string()));
        }
        sql.push_str(" ORDER BY d.record_id ASC, i.field_id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;

        let mut hits = Vec::new();
        let mut current: Option<(String, IndexedFields)> = None;
        while let Some(row) = rows.next()? {
            let record_text: String = row.get("record_id")?;
            let field: String = row.get("field_id")?;
            let normalized: String = row.get("normalized")?;

            if let Some((_, fields)) = current.as_mut().filter(|(id, _)| *id == record_text) {
                fields.insert(field, normalized);
                continue;
            }
            if let Some((id, fields)) = current.take() {
                deadline.check()?;
                score_document(&request.query, &id, &fields, &mut hits)?;
            }
            let mut fields = IndexedFields::new();
            fields.insert(field, normalized);
            current = Some((record_text, fields));
        }
        if let Some((id, fields)) = current.take() {
            deadline.check()?;
            score_document(&request.query, &id, &fields, &mut hits)?;
        }

        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.record_id.cmp(&right.record_id))
        });
        hits.truncate(request.limit as usize);
        Ok(hits)
    }
}

fn score_document(
    query: &Query,
    record_text: &str,
    fields: &IndexedFields,
    hits: &mut Vec<SearchHit>,
) -> SearchResult<()> {
    if let Some(score) = query.score(fields) {
        let record_id = Uuid::parse_str(record_text).map_err(|_| {
            SearchError::InvalidData(format!("invalid uuid `{record_text}` in record_index_docs"))
        })?;
        hits.push(SearchHit { record_id, score });
    }
    Ok(())
}

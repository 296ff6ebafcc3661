//! Committed-action outbox relay.
//!
//! # Responsibility
//! - Hand pending outbox rows to a sink, oldest first.
//! - Stamp rows delivered only after the sink acknowledged them.
//!
//! # Invariants
//! - Delivery is at-least-once: a failure leaves the row pending and stops the
//!   drain, so later rows are never delivered ahead of it.
//! - Sinks must tolerate redelivery of the same `(transaction_id, sequence)`.

use crate::model::action::{ActionType, TransactionId};
use crate::model::record::RecordId;
use crate::repo::{OutboxEntry, OutboxRepository, RepoResult};
use log::{info, warn};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Event handed to downstream consumers for every committed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedActionEvent {
    pub record_id: RecordId,
    pub action_type: ActionType,
    pub sequence: u64,
    pub transaction_id: TransactionId,
    /// Epoch milliseconds of the commit.
    pub timestamp: i64,
}

impl From<&OutboxEntry> for CommittedActionEvent {
    fn from(entry: &OutboxEntry) -> Self {
        Self {
            record_id: entry.record_id,
            action_type: entry.action_type,
            sequence: entry.sequence,
            transaction_id: entry.transaction_id.clone(),
            timestamp: entry.created_at,
        }
    }
}

/// Sink refusal. The event stays pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkError {
    pub message: String,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for SinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for SinkError {}

/// Downstream consumer of committed actions.
pub trait NotificationSink {
    /// Short name used in logs.
    fn name(&self) -> &str;
    fn deliver(&self, event: &CommittedActionEvent) -> Result<(), SinkError>;
}

/// Summary of one drain pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: u32,
    /// Outbox id of the row the sink refused, if any.
    pub failed: Option<i64>,
    pub remaining: u64,
}

pub struct OutboxRelay<O: OutboxRepository> {
    outbox: O,
}

impl<O: OutboxRepository> OutboxRelay<O> {
    pub fn new(outbox: O) -> Self {
        Self { outbox }
    }

    /// Delivers up to `limit` pending events to `sink`.
    pub fn drain<S>(&self, sink: &S, limit: u32) -> RepoResult<DrainReport>
    where
        S: NotificationSink + ?Sized,
    {
        let started_at = Instant::now();
        let mut delivered = 0;
        let mut failed = None;

        for entry in self.outbox.pending(limit)? {
            let event = CommittedActionEvent::from(&entry);
            match sink.deliver(&event) {
                Ok(()) => {
                    self.outbox.mark_delivered(entry.outbox_id)?;
                    delivered += 1;
                }
                Err(err) => {
                    self.outbox.record_failed_attempt(entry.outbox_id)?;
                    warn!(
                        "event=outbox_deliver module=service status=error sink={} outbox_id={} record_id={} sequence={} attempts={} error={}",
                        sink.name(),
                        entry.outbox_id,
                        entry.record_id,
                        entry.sequence,
                        entry.attempts + 1,
                        err
                    );
                    failed = Some(entry.outbox_id);
                    break;
                }
            }
        }

        let remaining = self.outbox.pending_count()?;
        info!(
            "event=outbox_drain module=service status={} sink={} delivered={} remaining={} duration_ms={}",
            if failed.is_some() { "partial" } else { "ok" },
            sink.name(),
            delivered,
            remaining,
            started_at.elapsed().as_millis()
        );
        Ok(DrainReport {
            delivered,
            failed,
            remaining,
        })
    }
}

//! Ledger schema migrations.
//!
//! # Invariants
//! - Versions start at 1 and increase by exactly one per step.
//! - The applied version is mirrored to `PRAGMA user_version`.
//! - Shipped steps are never edited; schema changes add a new step.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::{Connection, TransactionBehavior};

#[derive(Debug, Clone, Copy)]
struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "ledger",
        sql: include_str!("0001_ledger.sql"),
    },
    Step {
        version: 2,
        name: "drafts",
        sql: include_str!("0002_drafts.sql"),
    },
    Step {
        version: 3,
        name: "record_index",
        sql: include_str!("0003_record_index.sql"),
    },
];

/// Schema version this binary migrates to.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |step| step.version)
}

/// Brings `conn` to [`latest_version`] and returns how many steps ran.
///
/// Steps run inside one immediate transaction: two processes opening a fresh
/// file race for the writer lock and the loser sees the migrated version.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<u32> {
    let latest = latest_version();
    if user_version(conn)? == latest {
        return Ok(0);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let from = user_version(&tx)?;
    if from > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from,
            latest_supported: latest,
        });
    }

    let mut applied = 0;
    for step in STEPS.iter().filter(|step| step.version > from) {
        tx.execute_batch(step.sql)
            .and_then(|()| tx.pragma_update(None, "user_version", step.version))
            .map_err(|source| DbError::Migration {
                version: step.version,
                name: step.name,
                source,
            })?;
        applied += 1;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={} steps={}",
        from, latest, applied
    );
    Ok(applied)
}

fn user_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?)
}

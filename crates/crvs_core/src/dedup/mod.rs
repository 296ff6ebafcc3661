//! Duplicate detection: clause model, query lowering, candidate index and
//! the screening engine.
//!
//! # Responsibility
//! - Turn configured clause trees into backend queries for a subject record.
//! - Rank candidates deterministically and apply thresholds.
//! - Provide a SQLite candidate index maintained from committed actions.
//!
//! # Invariants
//! - Evaluation never writes to the ledger; the caller decides what to append.
//! - For an unchanged index, identical inputs produce identical candidates.

pub mod clause;
pub mod engine;
pub mod evaluator;
pub mod fuzzy;
pub mod index;
pub mod query;

pub use clause::{build_clause, Clause, ClauseConfig, ClauseError, Fuzziness, MatchKind};
pub use engine::{DedupEngine, DedupOutcome, DedupRule};
pub use evaluator::{evaluate, MatchSettings, Subject};
pub use index::{
    Deadline, IndexDocument, SearchBackend, SearchError, SearchHit, SearchRequest, SearchResult,
    SqliteSearchIndex,
};
pub use query::{lower, Query};

//! Match evaluator: clause + subject + backend -> ranked candidates.

use crate::dedup::clause::Clause;
use crate::dedup::index::{Deadline, SearchBackend, SearchRequest, SearchResult};
use crate::dedup::query::lower;
use crate::model::action::{Declaration, DuplicateCandidate};
use crate::model::record::{RecordId, RecordType};
use log::debug;
use std::collections::BTreeSet;
use std::time::Duration;

/// Per-evaluation limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSettings {
    /// Minimum score for a hit to count as a candidate.
    pub threshold: f64,
    pub timeout: Duration,
    pub limit: u32,
}

/// Record being screened.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub record_id: RecordId,
    pub record_type: RecordType,
    pub declaration: &'a Declaration,
}

/// Returns candidates scoring at least `settings.threshold`, highest score
/// first, ties by record id ascending. The subject itself is never returned.
pub fn evaluate<B>(
    clause: &Clause,
    subject: Subject<'_>,
    backend: &B,
    settings: &MatchSettings,
) -> SearchResult<Vec<DuplicateCandidate>>
where
    B: SearchBackend + ?Sized,
{
    let query = lower(clause, subject.declaration);
    if !query.can_match() {
        debug!(
            "event=dedup_evaluate module=dedup status=skipped reason=subject_fields_missing record_id={}",
            subject.record_id
        );
        return Ok(Vec::new());
    }

    let deadline = Deadline::after(settings.timeout);
    let request = SearchRequest {
        record_type: subject.record_type,
        exclude: Some(subject.record_id),
        query,
        limit: settings.limit,
    };
    let mut hits = backend.query(&request, deadline)?;

    hits.retain(|hit| hit.record_id != subject.record_id && hit.score >= settings.threshold);
    hits.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.record_id.cmp(&right.record_id))
    });
    let mut seen = BTreeSet::new();
    hits.retain(|hit| seen.insert(hit.record_id));

    debug!(
        "event=dedup_evaluate module=dedup status=ok record_id={} candidates={} duration_ms={}",
        subject.record_id,
        hits.len(),
        deadline.elapsed().as_millis()
    );

    Ok(hits
        .into_iter()
        .map(|hit| DuplicateCandidate {
            record_id: hit.record_id,
            score: hit.score,
        })
        .collect())
}

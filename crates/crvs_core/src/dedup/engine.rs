//! Per-record-type deduplication rules and the screening entry point.

use crate::dedup::clause::Clause;
use crate::dedup::evaluator::{evaluate, MatchSettings, Subject};
use crate::dedup::index::{SearchBackend, SearchError};
use crate::model::action::{ActionType, DuplicateCandidate};
use crate::model::record::RecordType;
use log::warn;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Compiled rule for one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupRule {
    pub clause: Clause,
    pub settings: MatchSettings,
    /// Commit without screening when the backend is unavailable.
    pub allow_deferred: bool,
    /// Action types that trigger screening.
    pub on_actions: BTreeSet<ActionType>,
}

/// What screening decided for one submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "candidates", rename_all = "snake_case")]
pub enum DedupOutcome {
    /// No rule applies to this record type and action.
    NotApplicable,
    Clear,
    DuplicatesFound(Vec<DuplicateCandidate>),
    /// Backend failed and the rule allows committing unscreened.
    Deferred,
}

/// Rules keyed by record type.
#[derive(Debug, Clone, Default)]
pub struct DedupEngine {
    rules: BTreeMap<RecordType, DedupRule>,
}

impl DedupEngine {
    pub fn new(rules: impl IntoIterator<Item = (RecordType, DedupRule)>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    /// Rule that applies to `action_type` on `record_type`, if any.
    pub fn rule_for(&self, record_type: RecordType, action_type: ActionType) -> Option<&DedupRule> {
        self.rules
            .get(&record_type)
            .filter(|rule| rule.on_actions.contains(&action_type))
    }

    /// Screens `subject` for `action_type`.
    ///
    /// Backend failures surface as `Err` unless the rule allows deferral.
    pub fn screen<B>(
        &self,
        backend: &B,
        subject: Subject<'_>,
        action_type: ActionType,
    ) -> Result<DedupOutcome, SearchError>
    where
        B: SearchBackend + ?Sized,
    {
        let Some(rule) = self.rule_for(subject.record_type, action_type) else {
            return Ok(DedupOutcome::NotApplicable);
        };

        match evaluate(&rule.clause, subject, backend, &rule.settings) {
            Ok(candidates) if candidates.is_empty() => Ok(DedupOutcome::Clear),
            Ok(candidates) => Ok(DedupOutcome::DuplicatesFound(candidates)),
            Err(err) if rule.allow_deferred => {
                warn!(
                    "event=dedup_screen module=dedup status=deferred record_id={} action_type={} error={}",
                    subject.record_id, action_type, err
                );
                Ok(DedupOutcome::Deferred)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::clause::Fuzziness;
    use crate::dedup::index::{Deadline, IndexDocument, SearchHit, SearchRequest, SearchResult};
    use crate::model::action::Declaration;
    use crate::model::record::RecordId;
    use std::time::Duration;
    use uuid::Uuid;

    struct DownBackend;

    impl SearchBackend for DownBackend {
        fn index(&self, _document: &IndexDocument) -> SearchResult<()> {
            Ok(())
        }

        fn remove(&self, _record_id: RecordId) -> SearchResult<()> {
            Ok(())
        }

        fn query(
            &self,
            _request: &SearchRequest,
            _deadline: Deadline,
        ) -> SearchResult<Vec<SearchHit>> {
            Err(SearchError::Unavailable("index offline".to_string()))
        }
    }

    fn rule(allow_deferred: bool) -> DedupRule {
        DedupRule {
            clause: Clause::fuzzy("child.name", Fuzziness::Auto, 1.0),
            settings: MatchSettings {
                threshold: 0.5,
                timeout: Duration::from_secs(1),
                limit: 10,
            },
            allow_deferred,
            on_actions: [ActionType::Declare].into_iter().collect(),
        }
    }

    fn subject(declaration: &Declaration) -> Subject<'_> {
        Subject {
            record_id: Uuid::new_v4(),
            record_type: RecordType::Birth,
            declaration,
        }
    }

    #[test]
    fn only_configured_actions_trigger_screening() {
        let engine = DedupEngine::new([(RecordType::Birth, rule(false))]);
        assert!(engine.rule_for(RecordType::Birth, ActionType::Declare).is_some());
        assert!(engine.rule_for(RecordType::Birth, ActionType::Validate).is_none());
        assert!(engine.rule_for(RecordType::Death, ActionType::Declare).is_none());

        let declaration: Declaration = [("child.name".to_string(), serde_json::json!("Ada"))]
            .into_iter()
            .collect();
        let outcome = engine
            .screen(&DownBackend, subject(&declaration), ActionType::Validate)
            .unwrap();
        assert_eq!(outcome, DedupOutcome::NotApplicable);
    }

    #[test]
    fn backend_failure_defers_only_when_allowed() {
        let declaration: Declaration = [("child.name".to_string(), serde_json::json!("Ada"))]
            .into_iter()
            .collect();

        let strict = DedupEngine::new([(RecordType::Birth, rule(false))]);
        assert!(matches!(
            strict.screen(&DownBackend, subject(&declaration), ActionType::Declare),
            Err(SearchError::Unavailable(_))
        ));

        let relaxed = DedupEngine::new([(RecordType::Birth, rule(true))]);
        assert_eq!(
            relaxed
                .screen(&DownBackend, subject(&declaration), ActionType::Declare)
                .unwrap(),
            DedupOutcome::Deferred
        );
    }
}

//! Backend query model and clause lowering.
//!
//! # Invariants
//! - Lowering is pure: the same clause and subject always produce the same
//!   query.
//! - Query values are normalized with [`normalize_text`]; backends must
//!   compare against values normalized the same way.

use crate::dedup::clause::{Clause, Fuzziness, LeafClause, MatchKind};
use crate::dedup::fuzzy::{auto_edits, levenshtein, normalize_text, similarity, sounds_alike};
use crate::model::action::{field_text, Declaration};
use chrono::{Days, NaiveDate};
use std::collections::BTreeMap;

const DATE_FORMAT: &str = "%Y-%m-%d";
/// Score share granted to a phonetic-only fuzzy match.
const PHONETIC_FLOOR: f64 = 0.5;

/// Normalized field values of one indexed document.
pub type IndexedFields = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Every `must` matches, and at least one `should` when `must` is empty.
    Bool { must: Vec<Query>, should: Vec<Query> },
    Match {
        field: String,
        value: String,
        max_edits: u32,
        boost: f64,
    },
    Term {
        field: String,
        value: String,
        boost: f64,
    },
    /// Inclusive date window.
    Range {
        field: String,
        from: NaiveDate,
        to: NaiveDate,
        boost: f64,
    },
    MatchNone,
}

impl Query {
    /// Whether any document could match. Lets callers skip the backend.
    pub fn can_match(&self) -> bool {
        match self {
            Self::MatchNone => false,
            Self::Bool { must, should } => {
                if must.is_empty() {
                    should.iter().any(Self::can_match)
                } else {
                    must.iter().all(Self::can_match)
                }
            }
            Self::Match { .. } | Self::Term { .. } | Self::Range { .. } => true,
        }
    }

    /// Exact-equality constraints every hit must satisfy, usable as a
    /// pre-filter by backends.
    pub fn required_terms(&self) -> Vec<(&str, &str)> {
        match self {
            Self::Term { field, value, .. } => vec![(field.as_str(), value.as_str())],
            Self::Bool { must, .. } => must
                .iter()
                .filter_map(|query| match query {
                    Self::Term { field, value, .. } => Some((field.as_str(), value.as_str())),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Scores one document; `None` when it does not match.
    pub fn score(&self, fields: &IndexedFields) -> Option<f64> {
        match self {
            Self::MatchNone => None,
            Self::Term {
                field,
                value,
                boost,
            } => (fields.get(field)? == value).then_some(*boost),
            Self::Match {
                field,
                value,
                max_edits,
                boost,
            } => {
                let candidate = fields.get(field)?;
                let distance = levenshtein(value, candidate);
                if distance <= *max_edits as usize {
                    Some(boost * similarity(value, candidate))
                } else if sounds_alike(value, candidate) {
                    Some(boost * similarity(value, candidate).max(PHONETIC_FLOOR))
                } else {
                    None
                }
            }
            Self::Range {
                field,
                from,
                to,
                boost,
            } => {
                let date = parse_date(fields.get(field)?)?;
                (*from <= date && date <= *to).then_some(*boost)
            }
            Self::Bool { must, should } => {
                if must.is_empty() && should.is_empty() {
                    return None;
                }
                let mut total = 0.0;
                for query in must {
                    total += query.score(fields)?;
                }
                let mut matched_should = false;
                for query in should {
                    if let Some(score) = query.score(fields) {
                        matched_should = true;
                        total += score;
                    }
                }
                if must.is_empty() && !matched_should {
                    return None;
                }
                Some(total)
            }
        }
    }
}

/// Lowers `clause` against the subject's declaration.
///
/// A leaf whose field is missing (or not a scalar, or not a valid date for a
/// date window) becomes [`Query::MatchNone`].
pub fn lower(clause: &Clause, subject: &Declaration) -> Query {
    match clause {
        Clause::And(children) => Query::Bool {
            must: children.iter().map(|child| lower(child, subject)).collect(),
            should: Vec::new(),
        },
        Clause::Or(children) => Query::Bool {
            must: Vec::new(),
            should: children.iter().map(|child| lower(child, subject)).collect(),
        },
        Clause::Leaf(leaf) => lower_leaf(leaf, subject),
    }
}

fn lower_leaf(leaf: &LeafClause, subject: &Declaration) -> Query {
    let Some(raw) = subject.get(&leaf.field).and_then(field_text) else {
        return Query::MatchNone;
    };
    let value = normalize_text(&raw);
    if value.is_empty() {
        return Query::MatchNone;
    }

    match leaf.kind {
        MatchKind::Strict => Query::Term {
            field: leaf.field.clone(),
            value,
            boost: leaf.boost,
        },
        MatchKind::Fuzzy(fuzziness) => {
            let max_edits = match fuzziness {
                Fuzziness::Auto => auto_edits(value.chars().count()),
                Fuzziness::Edits(edits) => edits,
            };
            Query::Match {
                field: leaf.field.clone(),
                value,
                max_edits,
                boost: leaf.boost,
            }
        }
        MatchKind::DateRange { days } => {
            let Some(date) = parse_date(&raw) else {
                return Query::MatchNone;
            };
            let window = Days::new(u64::from(days));
            match (date.checked_sub_days(window), date.checked_add_days(window)) {
                (Some(from), Some(to)) => Query::Range {
                    field: leaf.field.clone(),
                    from,
                    to,
                    boost: leaf.boost,
                },
                _ => Query::MatchNone,
            }
        }
    }
}

/// Parses `YYYY-MM-DD`, also accepting the normalized `YYYY MM DD` form.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y %m %d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subject(pairs: &[(&str, serde_json::Value)]) -> Declaration {
        pairs
            .iter()
            .map(|(field, value)| (field.to_string(), value.clone()))
            .collect()
    }

    fn fields(pairs: &[(&str, &str)]) -> IndexedFields {
        pairs
            .iter()
            .map(|(field, value)| (field.to_string(), normalize_text(value)))
            .collect()
    }

    #[test]
    fn and_lowers_to_must_and_or_to_should() {
        let clause = Clause::Or(vec![
            Clause::strict("mother.national_id", 1.0),
            Clause::And(vec![Clause::fuzzy("child.name", Fuzziness::Auto, 1.0)]),
        ]);
        let query = lower(
            &clause,
            &subject(&[
                ("mother.national_id", json!("AB-123")),
                ("child.name", json!("Ada")),
            ]),
        );
        assert_eq!(
            query,
            Query::Bool {
                must: vec![],
                should: vec![
                    Query::Term {
                        field: "mother.national_id".to_string(),
                        value: "ab 123".to_string(),
                        boost: 1.0,
                    },
                    Query::Bool {
                        must: vec![Query::Match {
                            field: "child.name".to_string(),
                            value: "ada".to_string(),
                            max_edits: 1,
                            boost: 1.0,
                        }],
                        should: vec![],
                    },
                ],
            }
        );
    }

    #[test]
    fn missing_field_lowers_to_match_none() {
        let clause = Clause::And(vec![
            Clause::strict("mother.national_id", 1.0),
            Clause::fuzzy("child.name", Fuzziness::Auto, 1.0),
        ]);
        let query = lower(&clause, &subject(&[("child.name", json!("Ada"))]));
        assert!(!query.can_match());
    }

    #[test]
    fn date_window_is_inclusive() {
        let clause = Clause::date_range("child.birth_date", 3, 2.0);
        let query = lower(&clause, &subject(&[("child.birth_date", json!("2024-02-28"))]));
        assert_eq!(
            query.score(&fields(&[("child.birth_date", "2024-03-02")])),
            Some(2.0)
        );
        assert_eq!(
            query.score(&fields(&[("child.birth_date", "2024-03-03")])),
            None
        );
    }

    #[test]
    fn fuzzy_scores_by_similarity_and_phonetics() {
        let query = lower(
            &Clause::fuzzy("child.name", Fuzziness::Auto, 2.0),
            &subject(&[("child.name", json!("Robert"))]),
        );
        assert_eq!(query.score(&fields(&[("child.name", "Robert")])), Some(2.0));
        let close = query
            .score(&fields(&[("child.name", "Robart")]))
            .expect("one edit away");
        assert!(close > 1.5 && close < 2.0);
        let phonetic = query
            .score(&fields(&[("child.name", "Rupurt")]))
            .expect("sounds alike");
        assert!(phonetic >= 1.0);
        assert_eq!(query.score(&fields(&[("child.name", "Alice")])), None);
    }

    #[test]
    fn or_requires_one_match_and_sums_scores() {
        let query = lower(
            &Clause::Or(vec![
                Clause::strict("mother.national_id", 1.0),
                Clause::strict("father.national_id", 1.0),
            ]),
            &subject(&[
                ("mother.national_id", json!("M1")),
                ("father.national_id", json!("F1")),
            ]),
        );
        assert_eq!(
            query.score(&fields(&[("mother.national_id", "M1"), ("father.national_id", "F1")])),
            Some(2.0)
        );
        assert_eq!(
            query.score(&fields(&[("mother.national_id", "M1")])),
            Some(1.0)
        );
        assert_eq!(query.score(&fields(&[("mother.national_id", "X")])), None);
    }

    #[test]
    fn required_terms_come_from_top_level_must() {
        let query = lower(
            &Clause::And(vec![
                Clause::strict("mother.national_id", 1.0),
                Clause::fuzzy("child.name", Fuzziness::Auto, 1.0),
            ]),
            &subject(&[
                ("mother.national_id", json!("M1")),
                ("child.name", json!("Ada")),
            ]),
        );
        assert_eq!(query.required_terms(), vec![("mother.national_id", "m1")]);
    }
}

//! Duplicate-detection clause model.
//!
//! `ClauseConfig` is the serialized form read from configuration;
//! [`build_clause`] validates it into a [`Clause`] tree.

use crate::model::action::is_valid_field_id;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

const MAX_FUZZY_EDITS: u32 = 2;
const MAX_DATE_WINDOW_DAYS: u32 = 3650;

fn default_boost() -> f64 {
    1.0
}

/// Edit-distance budget of a fuzzy leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "FuzzinessRepr", into = "FuzzinessRepr")]
pub enum Fuzziness {
    /// Budget chosen by term length (0, 1 or 2 edits).
    #[default]
    Auto,
    Edits(u32),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum FuzzinessRepr {
    Edits(u32),
    Keyword(String),
}

impl TryFrom<FuzzinessRepr> for Fuzziness {
    type Error = String;

    fn try_from(value: FuzzinessRepr) -> Result<Self, Self::Error> {
        match value {
            FuzzinessRepr::Edits(edits) => Ok(Self::Edits(edits)),
            FuzzinessRepr::Keyword(keyword) if keyword.eq_ignore_ascii_case("auto") => {
                Ok(Self::Auto)
            }
            FuzzinessRepr::Keyword(keyword) => {
                Err(format!("fuzziness must be AUTO or an edit count, got `{keyword}`"))
            }
        }
    }
}

impl From<Fuzziness> for FuzzinessRepr {
    fn from(value: Fuzziness) -> Self {
        match value {
            Fuzziness::Auto => Self::Keyword("AUTO".to_string()),
            Fuzziness::Edits(edits) => Self::Edits(edits),
        }
    }
}

/// Serialized clause tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClauseConfig {
    And {
        clauses: Vec<ClauseConfig>,
    },
    Or {
        clauses: Vec<ClauseConfig>,
    },
    Fuzzy {
        field: String,
        #[serde(default)]
        fuzziness: Fuzziness,
        #[serde(default = "default_boost")]
        boost: f64,
    },
    Strict {
        field: String,
        #[serde(default = "default_boost")]
        boost: f64,
    },
    DateRange {
        field: String,
        days: u32,
        #[serde(default = "default_boost")]
        boost: f64,
    },
}

/// How a leaf compares the subject's field with candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
    Fuzzy(Fuzziness),
    /// Normalized exact equality.
    Strict,
    /// Dates within `days` of the subject's date, inclusive.
    DateRange { days: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafClause {
    pub field: String,
    pub kind: MatchKind,
    pub boost: f64,
}

/// Validated clause tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Every child must match; scores add up.
    And(Vec<Clause>),
    /// At least one child must match; matching scores add up.
    Or(Vec<Clause>),
    Leaf(LeafClause),
}

impl Clause {
    pub fn fuzzy(field: &str, fuzziness: Fuzziness, boost: f64) -> Self {
        Self::leaf(field, MatchKind::Fuzzy(fuzziness), boost)
    }

    pub fn strict(field: &str, boost: f64) -> Self {
        Self::leaf(field, MatchKind::Strict, boost)
    }

    pub fn date_range(field: &str, days: u32, boost: f64) -> Self {
        Self::leaf(field, MatchKind::DateRange { days }, boost)
    }

    fn leaf(field: &str, kind: MatchKind, boost: f64) -> Self {
        Self::Leaf(LeafClause {
            field: field.to_string(),
            kind,
            boost,
        })
    }

    /// Highest score a candidate can reach.
    pub fn max_score(&self) -> f64 {
        match self {
            Self::And(children) | Self::Or(children) => children.iter().map(Self::max_score).sum(),
            Self::Leaf(leaf) => leaf.boost,
        }
    }

    /// Field ids referenced by the tree, in visit order.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, fields: &mut Vec<&'a str>) {
        match self {
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_fields(fields);
                }
            }
            Self::Leaf(leaf) => fields.push(leaf.field.as_str()),
        }
    }
}

/// Validates a serialized clause tree.
pub fn build_clause(config: &ClauseConfig) -> Result<Clause, ClauseError> {
    match config {
        ClauseConfig::And { clauses } => Ok(Clause::And(build_children("and", clauses)?)),
        ClauseConfig::Or { clauses } => Ok(Clause::Or(build_children("or", clauses)?)),
        ClauseConfig::Fuzzy {
            field,
            fuzziness,
            boost,
        } => {
            if let Fuzziness::Edits(edits) = fuzziness {
                if *edits > MAX_FUZZY_EDITS {
                    return Err(ClauseError::FuzzinessTooHigh {
                        field: field.clone(),
                        edits: *edits,
                    });
                }
            }
            build_leaf(field, MatchKind::Fuzzy(*fuzziness), *boost)
        }
        ClauseConfig::Strict { field, boost } => build_leaf(field, MatchKind::Strict, *boost),
        ClauseConfig::DateRange { field, days, boost } => {
            if *days > MAX_DATE_WINDOW_DAYS {
                return Err(ClauseError::DateWindowTooLarge {
                    field: field.clone(),
                    days: *days,
                });
            }
            build_leaf(field, MatchKind::DateRange { days: *days }, *boost)
        }
    }
}

fn build_children(
    combinator: &'static str,
    children: &[ClauseConfig],
) -> Result<Vec<Clause>, ClauseError> {
    if children.is_empty() {
        return Err(ClauseError::EmptyCombinator(combinator));
    }
    children.iter().map(build_clause).collect()
}

fn build_leaf(field: &str, kind: MatchKind, boost: f64) -> Result<Clause, ClauseError> {
    if !is_valid_field_id(field) {
        return Err(ClauseError::InvalidFieldId(field.to_string()));
    }
    if !boost.is_finite() || boost <= 0.0 {
        return Err(ClauseError::InvalidBoost {
            field: field.to_string(),
            boost,
        });
    }
    Ok(Clause::leaf(field, kind, boost))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClauseError {
    EmptyCombinator(&'static str),
    InvalidFieldId(String),
    InvalidBoost { field: String, boost: f64 },
    FuzzinessTooHigh { field: String, edits: u32 },
    DateWindowTooLarge { field: String, days: u32 },
}

impl Display for ClauseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCombinator(combinator) => {
                write!(f, "`{combinator}` clause needs at least one child")
            }
            Self::InvalidFieldId(field) => write!(f, "invalid clause field id `{field}`"),
            Self::InvalidBoost { field, boost } => {
                write!(f, "boost for `{field}` must be positive, got {boost}")
            }
            Self::FuzzinessTooHigh { field, edits } => write!(
                f,
                "fuzziness for `{field}` is {edits}, limit is {MAX_FUZZY_EDITS}"
            ),
            Self::DateWindowTooLarge { field, days } => write!(
                f,
                "date window for `{field}` is {days} days, limit is {MAX_DATE_WINDOW_DAYS}"
            ),
        }
    }
}

impl Error for ClauseError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_nested_tree_from_json() {
        let config: ClauseConfig = serde_json::from_value(json!({
            "kind": "and",
            "clauses": [
                { "kind": "strict", "field": "mother.national_id", "boost": 2.0 },
                { "kind": "fuzzy", "field": "child.name", "fuzziness": "AUTO" },
                { "kind": "date_range", "field": "child.birth_date", "days": 3 }
            ]
        }))
        .expect("clause config");

        let clause = build_clause(&config).expect("valid clause");
        assert_eq!(
            clause,
            Clause::And(vec![
                Clause::strict("mother.national_id", 2.0),
                Clause::fuzzy("child.name", Fuzziness::Auto, 1.0),
                Clause::date_range("child.birth_date", 3, 1.0),
            ])
        );
        assert_eq!(clause.max_score(), 4.0);
        assert_eq!(
            clause.fields(),
            vec!["mother.national_id", "child.name", "child.birth_date"]
        );
    }

    #[test]
    fn numeric_fuzziness_is_accepted_within_limit() {
        let config: ClauseConfig = serde_json::from_value(json!({
            "kind": "fuzzy", "field": "child.name", "fuzziness": 1
        }))
        .expect("clause config");
        assert_eq!(
            build_clause(&config),
            Ok(Clause::fuzzy("child.name", Fuzziness::Edits(1), 1.0))
        );

        let too_fuzzy = ClauseConfig::Fuzzy {
            field: "child.name".to_string(),
            fuzziness: Fuzziness::Edits(3),
            boost: 1.0,
        };
        assert!(matches!(
            build_clause(&too_fuzzy),
            Err(ClauseError::FuzzinessTooHigh { edits: 3, .. })
        ));
    }

    #[test]
    fn unknown_fuzziness_keyword_fails_to_parse() {
        let result: Result<ClauseConfig, _> = serde_json::from_value(json!({
            "kind": "fuzzy", "field": "child.name", "fuzziness": "LOTS"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_empty_combinators_and_bad_leaves() {
        assert_eq!(
            build_clause(&ClauseConfig::Or { clauses: vec![] }),
            Err(ClauseError::EmptyCombinator("or"))
        );
        assert_eq!(
            build_clause(&ClauseConfig::Strict {
                field: "Mother ID".to_string(),
                boost: 1.0
            }),
            Err(ClauseError::InvalidFieldId("Mother ID".to_string()))
        );
        assert!(matches!(
            build_clause(&ClauseConfig::Strict {
                field: "mother.id".to_string(),
                boost: 0.0
            }),
            Err(ClauseError::InvalidBoost { .. })
        ));
    }
}

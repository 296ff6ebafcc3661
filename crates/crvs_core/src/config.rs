//! Registry configuration and process settings.
//!
//! # Responsibility
//! - Load the registry workflow configuration (dedup rules, assignment
//!   policy, retry budget) from JSON.
//! - Read process settings (database path, logging, config path) from the
//!   environment.
//!
//! # Invariants
//! - A `RegistryConfig` returned by [`RegistryConfig::from_json_str`] or
//!   [`RegistryConfig::load`] has passed [`RegistryConfig::validate`].
//! - Invalid configuration fails at startup, never at submission time.

use crate::dedup::{build_clause, ClauseConfig, ClauseError, DedupEngine, DedupRule, MatchSettings};
use crate::model::action::ActionType;
use crate::model::record::RecordType;
use crate::projection::AssignmentPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DB_PATH: &str = "CRVS_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "CRVS_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "CRVS_LOG_DIR";
pub const ENV_CONFIG_PATH: &str = "CRVS_CONFIG_PATH";

const DEFAULT_DB_PATH: &str = "crvs.sqlite3";
const DEFAULT_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_MAX_CANDIDATES: u32 = 10;
const DEFAULT_APPEND_RETRY_BUDGET: u32 = 3;
const MAX_APPEND_RETRY_BUDGET: u32 = 16;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_candidates() -> u32 {
    DEFAULT_MAX_CANDIDATES
}

fn default_on_actions() -> BTreeSet<ActionType> {
    [
        ActionType::Notify,
        ActionType::Declare,
        ActionType::Validate,
        ActionType::Register,
    ]
    .into_iter()
    .collect()
}

fn default_retry_budget() -> u32 {
    DEFAULT_APPEND_RETRY_BUDGET
}

/// Deduplication rule for one record type, as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupRuleConfig {
    pub record_type: RecordType,
    pub clause: ClauseConfig,
    /// Minimum summed score for a candidate.
    pub threshold: f64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Commit unscreened declarations when the index is unavailable.
    #[serde(default)]
    pub allow_deferred: bool,
    #[serde(default = "default_on_actions")]
    pub on_actions: BTreeSet<ActionType>,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: u32,
}

/// Workflow configuration shared by every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub dedup: Vec<DedupRuleConfig>,
    #[serde(default)]
    pub assignment: AssignmentPolicy,
    /// Internal re-evaluations after a sequence conflict on unpinned appends.
    #[serde(default = "default_retry_budget")]
    pub append_retry_budget: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dedup: Vec::new(),
            assignment: AssignmentPolicy::default(),
            append_retry_budget: DEFAULT_APPEND_RETRY_BUDGET,
        }
    }
}

impl RegistryConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for rule in &self.dedup {
            if !seen.insert(rule.record_type) {
                return Err(ConfigError::DuplicateRule(rule.record_type));
            }
            compile_rule(rule)?;
        }

        for action_type in &self.assignment.release_on {
            if matches!(action_type, ActionType::Assign | ActionType::Read) {
                return Err(ConfigError::InvalidReleaseAction(*action_type));
            }
        }

        if self.append_retry_budget > MAX_APPEND_RETRY_BUDGET {
            return Err(ConfigError::RetryBudgetTooLarge(self.append_retry_budget));
        }
        Ok(())
    }

    /// Compiles the dedup rules into a screening engine.
    pub fn build_engine(&self) -> Result<DedupEngine, ConfigError> {
        let rules = self
            .dedup
            .iter()
            .map(|rule| compile_rule(rule).map(|compiled| (rule.record_type, compiled)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DedupEngine::new(rules))
    }
}

fn compile_rule(rule: &DedupRuleConfig) -> Result<DedupRule, ConfigError> {
    let record_type = rule.record_type;
    let clause = build_clause(&rule.clause)
        .map_err(|source| ConfigError::Clause { record_type, source })?;

    let max_score = clause.max_score();
    if !rule.threshold.is_finite() || rule.threshold <= 0.0 || rule.threshold > max_score {
        return Err(ConfigError::InvalidThreshold {
            record_type,
            threshold: rule.threshold,
            max_score,
        });
    }
    if rule.timeout_ms == 0 {
        return Err(ConfigError::ZeroTimeout(record_type));
    }
    if rule.max_candidates == 0 {
        return Err(ConfigError::ZeroCandidates(record_type));
    }
    if rule.on_actions.is_empty() {
        return Err(ConfigError::NoTriggers(record_type));
    }
    // Screening needs declaration data on the triggering action.
    if let Some(action_type) = rule.on_actions.iter().find(|action_type| {
        !matches!(
            action_type,
            ActionType::Notify | ActionType::Declare | ActionType::Validate | ActionType::Register
        )
    }) {
        return Err(ConfigError::UnscreenableAction {
            record_type,
            action_type: *action_type,
        });
    }

    Ok(DedupRule {
        clause,
        settings: MatchSettings {
            threshold: rule.threshold,
            timeout: Duration::from_millis(rule.timeout_ms),
            limit: rule.max_candidates,
        },
        allow_deferred: rule.allow_deferred,
        on_actions: rule.on_actions.clone(),
    })
}

/// Per-process settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSettings {
    pub db_path: PathBuf,
    pub log_level: String,
    /// Absolute log directory; file logging is off when unset.
    pub log_dir: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

impl ProcessSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable lookup. Blank values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            db_path: read(ENV_DB_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            log_level: read(ENV_LOG_LEVEL)
                .unwrap_or_else(|| crate::logging::default_log_level().to_string()),
            log_dir: read(ENV_LOG_DIR).map(PathBuf::from),
            config_path: read(ENV_CONFIG_PATH).map(PathBuf::from),
        }
    }

    /// Loads the registry config named by `config_path`, or the defaults.
    pub fn registry_config(&self) -> Result<RegistryConfig, ConfigError> {
        match &self.config_path {
            Some(path) => RegistryConfig::load(path),
            None => Ok(RegistryConfig::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Read { path: PathBuf, message: String },
    Parse(String),
    Clause {
        record_type: RecordType,
        source: ClauseError,
    },
    InvalidThreshold {
        record_type: RecordType,
        threshold: f64,
        max_score: f64,
    },
    ZeroTimeout(RecordType),
    ZeroCandidates(RecordType),
    NoTriggers(RecordType),
    UnscreenableAction {
        record_type: RecordType,
        action_type: ActionType,
    },
    DuplicateRule(RecordType),
    /// ASSIGN and READ cannot release an assignment.
    InvalidReleaseAction(ActionType),
    RetryBudgetTooLarge(u32),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, message } => {
                write!(f, "failed to read config `{}`: {message}", path.display())
            }
            Self::Parse(message) => write!(f, "invalid config json: {message}"),
            Self::Clause {
                record_type,
                source,
            } => write!(f, "dedup rule for {record_type}: {source}"),
            Self::InvalidThreshold {
                record_type,
                threshold,
                max_score,
            } => write!(
                f,
                "dedup threshold for {record_type} must be in (0, {max_score}], got {threshold}"
            ),
            Self::ZeroTimeout(record_type) => {
                write!(f, "dedup timeout for {record_type} must be positive")
            }
            Self::ZeroCandidates(record_type) => {
                write!(f, "dedup max_candidates for {record_type} must be positive")
            }
            Self::NoTriggers(record_type) => {
                write!(f, "dedup rule for {record_type} has no triggering actions")
            }
            Self::UnscreenableAction {
                record_type,
                action_type,
            } => write!(
                f,
                "dedup rule for {record_type} cannot trigger on {action_type}"
            ),
            Self::DuplicateRule(record_type) => {
                write!(f, "more than one dedup rule for {record_type}")
            }
            Self::InvalidReleaseAction(action_type) => {
                write!(f, "{action_type} cannot release an assignment")
            }
            Self::RetryBudgetTooLarge(budget) => write!(
                f,
                "append_retry_budget {budget} exceeds limit {MAX_APPEND_RETRY_BUDGET}"
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Clause { source, .. } => Some(source),
            _ => None,
        }
    }
}

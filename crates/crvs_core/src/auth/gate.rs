//! Authorization gate: which scopes admit which action types.

use crate::auth::scope::{ScopeName, ScopeSet};
use crate::model::action::ActionType;
use crate::model::record::RecordType;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Record facts the configurable scopes are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeContext {
    pub record_type: RecordType,
}

/// Coarse and configurable scope requirements per action type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeTable {
    coarse: BTreeMap<ActionType, Vec<ScopeName>>,
    configurable: BTreeMap<ActionType, Vec<ScopeName>>,
}

impl ScopeTable {
    /// Built-in table. Every action type has an entry in both maps.
    pub fn defaults() -> Self {
        Self {
            coarse: ActionType::ALL
                .into_iter()
                .map(|action_type| (action_type, default_coarse_scopes(action_type)))
                .collect(),
            configurable: ActionType::ALL
                .into_iter()
                .map(|action_type| (action_type, default_configurable_scopes(action_type)))
                .collect(),
        }
    }

    /// Table from explicit entries; completeness is checked by
    /// [`AuthorizationGate::try_new`].
    pub fn from_entries(
        coarse: impl IntoIterator<Item = (ActionType, Vec<ScopeName>)>,
        configurable: impl IntoIterator<Item = (ActionType, Vec<ScopeName>)>,
    ) -> Self {
        Self {
            coarse: coarse.into_iter().collect(),
            configurable: configurable.into_iter().collect(),
        }
    }

    pub fn coarse(&self, action_type: ActionType) -> &[ScopeName] {
        self.coarse.get(&action_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn configurable(&self, action_type: ActionType) -> &[ScopeName] {
        self.configurable.get(&action_type).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn default_coarse_scopes(action_type: ActionType) -> Vec<ScopeName> {
    use ActionType as A;
    use ScopeName as S;

    match action_type {
        A::Create => vec![S::RecordCreate, S::RecordDeclare],
        A::Notify | A::Declare => vec![S::RecordDeclare],
        A::Validate => vec![S::RecordValidate],
        A::Register => vec![S::RecordRegister],
        A::PrintCertificate => vec![S::RecordPrintCertificate],
        A::RequestCorrection => vec![S::RecordRequestCorrection],
        A::ApproveCorrection | A::RejectCorrection => vec![S::RecordReviewCorrection],
        A::Reject => vec![S::RecordReject],
        A::Archive => vec![S::RecordArchive],
        // Appended only by the service, in the batch of the screened action.
        A::DetectDuplicate => Vec::new(),
        A::MarkedAsDuplicate => vec![S::RecordReviewDuplicates],
        A::Assign | A::Unassign => vec![S::RecordAssign, S::UserUnassignOthers],
        A::Read => vec![S::RecordRead],
    }
}

fn default_configurable_scopes(action_type: ActionType) -> Vec<ScopeName> {
    use ActionType as A;

    match action_type {
        A::Create | A::Notify => vec![ScopeName::RecordNotify],
        A::Declare
        | A::Validate
        | A::Register
        | A::PrintCertificate
        | A::RequestCorrection
        | A::ApproveCorrection
        | A::RejectCorrection
        | A::Reject
        | A::Archive
        | A::DetectDuplicate
        | A::MarkedAsDuplicate
        | A::Assign
        | A::Unassign
        | A::Read => Vec::new(),
    }
}

/// Gate construction failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateConfigError {
    MissingEntry {
        table: &'static str,
        action_type: ActionType,
    },
    /// A configurable entry names a scope that takes no qualifier.
    NotConfigurable {
        action_type: ActionType,
        scope: ScopeName,
    },
}

impl Display for GateConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEntry { table, action_type } => {
                write!(f, "{table} scope table has no entry for {action_type}")
            }
            Self::NotConfigurable { action_type, scope } => write!(
                f,
                "scope `{scope}` listed as configurable for {action_type} takes no qualifier"
            ),
        }
    }
}

impl Error for GateConfigError {}

/// Stateless admission check over actor scopes.
#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    table: ScopeTable,
}

impl AuthorizationGate {
    /// Validates that `table` covers every action type.
    pub fn try_new(table: ScopeTable) -> Result<Self, GateConfigError> {
        for action_type in ActionType::ALL {
            if !table.coarse.contains_key(&action_type) {
                return Err(GateConfigError::MissingEntry {
                    table: "coarse",
                    action_type,
                });
            }
            let Some(configurable) = table.configurable.get(&action_type) else {
                return Err(GateConfigError::MissingEntry {
                    table: "configurable",
                    action_type,
                });
            };
            if let Some(scope) = configurable.iter().find(|scope| !scope.is_configurable()) {
                return Err(GateConfigError::NotConfigurable {
                    action_type,
                    scope: *scope,
                });
            }
        }
        Ok(Self { table })
    }

    pub fn with_defaults() -> Self {
        Self {
            table: ScopeTable::defaults(),
        }
    }

    /// Whether `scopes` admit `action_type`. Configurable scopes are matched
    /// against `context`; a qualified scope never matches without one.
    pub fn can_perform(
        &self,
        scopes: &ScopeSet,
        action_type: ActionType,
        context: Option<&ScopeContext>,
    ) -> bool {
        if self
            .table
            .coarse(action_type)
            .iter()
            .any(|name| scopes.has(*name))
        {
            return true;
        }

        let record_type = context.map(|context| context.record_type);
        self.table
            .configurable(action_type)
            .iter()
            .any(|name| scopes.permits(*name, record_type))
    }
}

impl Default for AuthorizationGate {
    fn default() -> Self {
        Self::with_defaults()
    }
}

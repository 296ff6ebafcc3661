//! Record workflow status and the action admission table.

use crate::model::action::ActionType;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Workflow position of a record, derived from its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    InProgress,
    Notified,
    Declared,
    Validated,
    Registered,
    CorrectionRequested,
    Rejected,
    Archived,
    Duplicate,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Notified => "NOTIFIED",
            Self::Declared => "DECLARED",
            Self::Validated => "VALIDATED",
            Self::Registered => "REGISTERED",
            Self::CorrectionRequested => "CORRECTION_REQUESTED",
            Self::Rejected => "REJECTED",
            Self::Archived => "ARCHIVED",
            Self::Duplicate => "DUPLICATE",
        }
    }

    /// Closed records take no new drafts and drop their candidate index entry.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Archived | Self::Duplicate)
    }

    /// Whether `action_type` may be appended to a record in this status.
    ///
    /// CREATE is never admitted here: it only starts new records.
    pub fn allows(self, action_type: ActionType) -> bool {
        use ActionType as A;
        use RecordStatus as S;

        match action_type {
            A::Create => false,
            A::Read => true,
            A::Assign | A::Unassign => self != S::Archived,
            A::Notify => matches!(self, S::InProgress | S::Rejected),
            A::Declare => matches!(self, S::InProgress | S::Notified | S::Rejected),
            A::Validate => matches!(self, S::Notified | S::Declared),
            A::Register => matches!(self, S::Declared | S::Validated),
            A::PrintCertificate | A::RequestCorrection => self == S::Registered,
            A::ApproveCorrection | A::RejectCorrection => self == S::CorrectionRequested,
            A::Reject => matches!(self, S::Notified | S::Declared | S::Validated),
            A::Archive => matches!(
                self,
                S::InProgress | S::Notified | S::Declared | S::Validated | S::Rejected | S::Duplicate
            ),
            A::DetectDuplicate | A::MarkedAsDuplicate => {
                matches!(self, S::Notified | S::Declared | S::Validated)
            }
        }
    }
}

impl Display for RecordStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archived_only_admits_read() {
        for action_type in ActionType::ALL {
            assert_eq!(
                RecordStatus::Archived.allows(action_type),
                action_type == ActionType::Read,
                "{action_type}"
            );
        }
    }

    #[test]
    fn duplicate_admits_read_lock_and_archive() {
        let allowed: Vec<ActionType> = ActionType::ALL
            .into_iter()
            .filter(|action_type| RecordStatus::Duplicate.allows(*action_type))
            .collect();
        assert_eq!(
            allowed,
            vec![
                ActionType::Archive,
                ActionType::Assign,
                ActionType::Unassign,
                ActionType::Read
            ]
        );
    }

    #[test]
    fn registration_requires_declaration() {
        assert!(!RecordStatus::InProgress.allows(ActionType::Register));
        assert!(RecordStatus::Declared.allows(ActionType::Register));
        assert!(RecordStatus::Validated.allows(ActionType::Register));
        assert!(!RecordStatus::Registered.allows(ActionType::Register));
    }

    #[test]
    fn corrections_follow_registration() {
        assert!(RecordStatus::Registered.allows(ActionType::RequestCorrection));
        assert!(!RecordStatus::Registered.allows(ActionType::ApproveCorrection));
        assert!(RecordStatus::CorrectionRequested.allows(ActionType::ApproveCorrection));
        assert!(!RecordStatus::CorrectionRequested.allows(ActionType::PrintCertificate));
    }

    #[test]
    fn create_is_never_admitted_on_existing_records() {
        for status in [
            RecordStatus::InProgress,
            RecordStatus::Declared,
            RecordStatus::Registered,
        ] {
            assert!(!status.allows(ActionType::Create));
        }
    }
}

//! Action domain model.
//!
//! # Responsibility
//! - Enumerate every action type the workflow knows about.
//! - Define one payload schema per action type as a closed tagged union.
//! - Validate payloads before they reach storage.
//!
//! # Invariants
//! - `ActionPayload::action_type()` is the single source of an action's type;
//!   a payload cannot be stored under a different type.
//! - Field ids are dotted lowercase paths (`mother.national_id`).
//! - Once appended an `Action` is never mutated.

use crate::model::draft::DraftId;
use crate::model::record::{ActorId, RecordId, RecordType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static FIELD_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z0-9_]+)*$").expect("valid field id regex")
});

const TRANSACTION_ID_MAX_LEN: usize = 128;

/// Stable identifier of one appended action.
pub type ActionId = Uuid;

/// Declared form data: field id -> JSON value. A `null` value in an edit set
/// removes the field.
pub type Declaration = BTreeMap<String, Value>;

/// Every action type the ledger accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Create,
    Notify,
    Declare,
    Validate,
    Register,
    PrintCertificate,
    RequestCorrection,
    ApproveCorrection,
    RejectCorrection,
    Reject,
    Archive,
    DetectDuplicate,
    MarkedAsDuplicate,
    Assign,
    Unassign,
    Read,
}

impl ActionType {
    /// All action types in declaration order. Tables keyed by action type are
    /// validated against this list at startup.
    pub const ALL: [ActionType; 16] = [
        Self::Create,
        Self::Notify,
        Self::Declare,
        Self::Validate,
        Self::Register,
        Self::PrintCertificate,
        Self::RequestCorrection,
        Self::ApproveCorrection,
        Self::RejectCorrection,
        Self::Reject,
        Self::Archive,
        Self::DetectDuplicate,
        Self::MarkedAsDuplicate,
        Self::Assign,
        Self::Unassign,
        Self::Read,
    ];

    /// Position inside [`ActionType::ALL`].
    pub fn ordinal(self) -> usize {
        match self {
            Self::Create => 0,
            Self::Notify => 1,
            Self::Declare => 2,
            Self::Validate => 3,
            Self::Register => 4,
            Self::PrintCertificate => 5,
            Self::RequestCorrection => 6,
            Self::ApproveCorrection => 7,
            Self::RejectCorrection => 8,
            Self::Reject => 9,
            Self::Archive => 10,
            Self::DetectDuplicate => 11,
            Self::MarkedAsDuplicate => 12,
            Self::Assign => 13,
            Self::Unassign => 14,
            Self::Read => 15,
        }
    }

    /// Stable wire/storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Notify => "NOTIFY",
            Self::Declare => "DECLARE",
            Self::Validate => "VALIDATE",
            Self::Register => "REGISTER",
            Self::PrintCertificate => "PRINT_CERTIFICATE",
            Self::RequestCorrection => "REQUEST_CORRECTION",
            Self::ApproveCorrection => "APPROVE_CORRECTION",
            Self::RejectCorrection => "REJECT_CORRECTION",
            Self::Reject => "REJECT",
            Self::Archive => "ARCHIVE",
            Self::DetectDuplicate => "DETECT_DUPLICATE",
            Self::MarkedAsDuplicate => "MARKED_AS_DUPLICATE",
            Self::Assign => "ASSIGN",
            Self::Unassign => "UNASSIGN",
            Self::Read => "READ",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|action_type| action_type.as_str() == value)
    }

    /// Terminal actions close the record and release any assignment.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Archive | Self::MarkedAsDuplicate)
    }

    /// Read-only actions are audited but never need the assignment lock.
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Read)
    }

    /// Outcome recorded when this action type is appended.
    pub fn initial_status(self) -> ActionStatus {
        match self {
            Self::RequestCorrection => ActionStatus::Requested,
            _ => ActionStatus::Accepted,
        }
    }
}

impl Display for ActionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an appended action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Accepted,
    Requested,
    /// Never assigned on append by this crate. Ledgers imported from systems
    /// that confirm actions asynchronously store refused actions with it; the
    /// row stays in history but every derived view ignores it.
    Rejected,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Requested => "requested",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "accepted" => Some(Self::Accepted),
            "requested" => Some(Self::Requested),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Client-chosen idempotency key. Re-submitting with the same key returns the
/// originally committed actions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh random key, for system-originated submissions.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn validate(&self) -> Result<(), ActionValidationError> {
        if self.0.trim().is_empty() {
            return Err(ActionValidationError::BlankTransactionId);
        }
        if self.0.len() > TRANSACTION_ID_MAX_LEN {
            return Err(ActionValidationError::TransactionIdTooLong(self.0.len()));
        }
        Ok(())
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePayload {
    pub record_type: RecordType,
}

/// Shared by NOTIFY, DECLARE and VALIDATE.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclarationPayload {
    #[serde(default)]
    pub declaration: Declaration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPayload {
    /// Last-minute edits applied together with registration.
    #[serde(default)]
    pub declaration: Declaration,
    pub registration_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintCertificatePayload {
    pub template_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRequestPayload {
    /// Corrected field values, applied only once the request is approved.
    pub declaration: Declaration,
    pub reason: String,
}

/// Shared by APPROVE_CORRECTION and REJECT_CORRECTION.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionDecisionPayload {
    /// Action id of the REQUEST_CORRECTION being decided.
    pub request_id: ActionId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonPayload {
    pub reason: String,
}

/// One potential duplicate found by the match evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub record_id: RecordId,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicatesDetectedPayload {
    pub candidates: Vec<DuplicateCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedAsDuplicatePayload {
    pub duplicate_of: RecordId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignPayload {
    pub assignee: ActorId,
}

/// Typed action payload. The variant determines the action type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionPayload {
    Create(CreatePayload),
    Notify(DeclarationPayload),
    Declare(DeclarationPayload),
    Validate(DeclarationPayload),
    Register(RegisterPayload),
    PrintCertificate(PrintCertificatePayload),
    RequestCorrection(CorrectionRequestPayload),
    ApproveCorrection(CorrectionDecisionPayload),
    RejectCorrection(CorrectionDecisionPayload),
    Reject(ReasonPayload),
    Archive(ReasonPayload),
    DetectDuplicate(DuplicatesDetectedPayload),
    MarkedAsDuplicate(MarkedAsDuplicatePayload),
    Assign(AssignPayload),
    Unassign,
    Read,
}

impl ActionPayload {
    /// Builds a payload from a wire action type plus its untyped body.
    ///
    /// Bodies of UNASSIGN and READ are ignored; a `null` body reads as `{}`
    /// for every other type.
    pub fn from_parts(action_type: ActionType, data: Value) -> Result<Self, ActionValidationError> {
        let envelope = if matches!(action_type, ActionType::Unassign | ActionType::Read) {
            serde_json::json!({ "type": action_type.as_str() })
        } else if data.is_null() {
            serde_json::json!({ "type": action_type.as_str(), "data": {} })
        } else {
            serde_json::json!({ "type": action_type.as_str(), "data": data })
        };

        serde_json::from_value(envelope).map_err(|err| ActionValidationError::Malformed {
            action_type,
            message: err.to_string(),
        })
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            Self::Create(_) => ActionType::Create,
            Self::Notify(_) => ActionType::Notify,
            Self::Declare(_) => ActionType::Declare,
            Self::Validate(_) => ActionType::Validate,
            Self::Register(_) => ActionType::Register,
            Self::PrintCertificate(_) => ActionType::PrintCertificate,
            Self::RequestCorrection(_) => ActionType::RequestCorrection,
            Self::ApproveCorrection(_) => ActionType::ApproveCorrection,
            Self::RejectCorrection(_) => ActionType::RejectCorrection,
            Self::Reject(_) => ActionType::Reject,
            Self::Archive(_) => ActionType::Archive,
            Self::DetectDuplicate(_) => ActionType::DetectDuplicate,
            Self::MarkedAsDuplicate(_) => ActionType::MarkedAsDuplicate,
            Self::Assign(_) => ActionType::Assign,
            Self::Unassign => ActionType::Unassign,
            Self::Read => ActionType::Read,
        }
    }

    /// Declaration edits that take effect as soon as this action is accepted.
    ///
    /// Correction requests are excluded: their fields apply on approval.
    pub fn declaration_edits(&self) -> Option<&Declaration> {
        match self {
            Self::Notify(payload) | Self::Declare(payload) | Self::Validate(payload) => {
                Some(&payload.declaration)
            }
            Self::Register(payload) => Some(&payload.declaration),
            _ => None,
        }
    }

    /// Validates the schema owned by this payload variant.
    pub fn validate(&self) -> Result<(), ActionValidationError> {
        let action_type = self.action_type();
        match self {
            Self::Create(_) | Self::Unassign | Self::Read | Self::ApproveCorrection(_) => Ok(()),
            Self::Notify(payload) | Self::Validate(payload) => {
                validate_field_ids(&payload.declaration)
            }
            Self::Declare(payload) => {
                if payload.declaration.is_empty() {
                    return Err(ActionValidationError::EmptyDeclaration(action_type));
                }
                validate_field_ids(&payload.declaration)
            }
            Self::Register(payload) => {
                require_text(action_type, "registration_number", &payload.registration_number)?;
                validate_field_ids(&payload.declaration)
            }
            Self::PrintCertificate(payload) => {
                require_text(action_type, "template_id", &payload.template_id)
            }
            Self::RequestCorrection(payload) => {
                if payload.declaration.is_empty() {
                    return Err(ActionValidationError::EmptyDeclaration(action_type));
                }
                validate_field_ids(&payload.declaration)?;
                require_text(action_type, "reason", &payload.reason)
            }
            Self::RejectCorrection(payload) => require_text(
                action_type,
                "reason",
                payload.reason.as_deref().unwrap_or_default(),
            ),
            Self::Reject(payload) | Self::Archive(payload) => {
                require_text(action_type, "reason", &payload.reason)
            }
            Self::DetectDuplicate(payload) => {
                if payload.candidates.is_empty() {
                    return Err(ActionValidationError::EmptyCandidates);
                }
                for candidate in &payload.candidates {
                    if !candidate.score.is_finite() || candidate.score < 0.0 {
                        return Err(ActionValidationError::InvalidScore {
                            record_id: candidate.record_id,
                            score: candidate.score,
                        });
                    }
                }
                Ok(())
            }
            Self::MarkedAsDuplicate(payload) => {
                require_text(action_type, "reason", &payload.reason)
            }
            Self::Assign(payload) => {
                require_text(action_type, "assignee", payload.assignee.as_str())
            }
        }
    }
}

/// Immutable fact in a record's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    pub action_id: ActionId,
    pub record_id: RecordId,
    /// 1-based, strictly increasing and gap-free per record.
    pub sequence: u64,
    pub action_type: ActionType,
    pub actor_id: ActorId,
    /// Role of the actor at the time of the action.
    pub actor_role: String,
    pub status: ActionStatus,
    pub payload: ActionPayload,
    pub transaction_id: TransactionId,
    pub draft_id: Option<DraftId>,
    /// Epoch milliseconds stamped by the ledger.
    pub created_at: i64,
}

/// Action submitted for append; the ledger assigns id, sequence and time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub actor_id: ActorId,
    pub actor_role: String,
    pub payload: ActionPayload,
    pub transaction_id: TransactionId,
    pub draft_id: Option<DraftId>,
}

impl NewAction {
    pub fn action_type(&self) -> ActionType {
        self.payload.action_type()
    }

    pub fn status(&self) -> ActionStatus {
        self.action_type().initial_status()
    }
}

/// Payload schema violations.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionValidationError {
    /// Body could not be decoded into the action type's schema.
    Malformed {
        action_type: ActionType,
        message: String,
    },
    EmptyDeclaration(ActionType),
    InvalidFieldId(String),
    BlankField {
        action_type: ActionType,
        field: &'static str,
    },
    EmptyCandidates,
    InvalidScore {
        record_id: RecordId,
        score: f64,
    },
    BlankTransactionId,
    TransactionIdTooLong(usize),
}

impl Display for ActionValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed {
                action_type,
                message,
            } => write!(f, "malformed {action_type} payload: {message}"),
            Self::EmptyDeclaration(action_type) => {
                write!(f, "{action_type} requires at least one declaration field")
            }
            Self::InvalidFieldId(value) => write!(f, "invalid field id `{value}`"),
            Self::BlankField { action_type, field } => {
                write!(f, "{action_type} requires a non-empty `{field}`")
            }
            Self::EmptyCandidates => write!(f, "duplicate detection requires candidates"),
            Self::InvalidScore { record_id, score } => {
                write!(f, "invalid duplicate score {score} for record {record_id}")
            }
            Self::BlankTransactionId => write!(f, "transaction id must not be empty"),
            Self::TransactionIdTooLong(len) => write!(
                f,
                "transaction id is {len} bytes, limit is {TRANSACTION_ID_MAX_LEN}"
            ),
        }
    }
}

impl Error for ActionValidationError {}

/// Returns whether `value` is a well-formed field id.
pub fn is_valid_field_id(value: &str) -> bool {
    FIELD_ID_RE.is_match(value)
}

/// Applies `edits` on top of `target`; `null` removes a field.
pub fn merge_declaration(target: &mut Declaration, edits: &Declaration) {
    for (field, value) in edits {
        if value.is_null() {
            target.remove(field);
        } else {
            target.insert(field.clone(), value.clone());
        }
    }
}

/// Scalar text form of a declaration value, used for indexing and matching.
pub fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn validate_field_ids(declaration: &Declaration) -> Result<(), ActionValidationError> {
    for field in declaration.keys() {
        if !is_valid_field_id(field) {
            return Err(ActionValidationError::InvalidFieldId(field.clone()));
        }
    }
    Ok(())
}

fn require_text(
    action_type: ActionType,
    field: &'static str,
    value: &str,
) -> Result<(), ActionValidationError> {
    if value.trim().is_empty() {
        return Err(ActionValidationError::BlankField { action_type, field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn all_lists_every_action_type_once_in_ordinal_order() {
        for (index, action_type) in ActionType::ALL.iter().enumerate() {
            assert_eq!(action_type.ordinal(), index, "{action_type}");
        }
    }

    #[test]
    fn action_type_names_roundtrip() {
        for action_type in ActionType::ALL {
            assert_eq!(ActionType::parse(action_type.as_str()), Some(action_type));
        }
        assert_eq!(ActionType::parse("declare"), None);
    }

    #[test]
    fn serde_name_matches_storage_name() {
        let encoded = serde_json::to_value(ActionType::MarkedAsDuplicate).unwrap();
        assert_eq!(encoded, json!("MARKED_AS_DUPLICATE"));
    }

    #[test]
    fn from_parts_decodes_typed_payload() {
        let payload = ActionPayload::from_parts(
            ActionType::Declare,
            json!({ "declaration": { "child.name": "Ada" } }),
        )
        .expect("declare payload");
        assert_eq!(payload.action_type(), ActionType::Declare);
        assert_eq!(
            payload.declaration_edits().and_then(|d| d.get("child.name")),
            Some(&json!("Ada"))
        );
    }

    #[test]
    fn from_parts_ignores_body_for_unit_payloads() {
        let payload =
            ActionPayload::from_parts(ActionType::Unassign, json!({ "unexpected": true }))
                .expect("unassign payload");
        assert_eq!(payload, ActionPayload::Unassign);
    }

    #[test]
    fn from_parts_reads_null_body_as_empty() {
        let payload = ActionPayload::from_parts(ActionType::Validate, Value::Null)
            .expect("validate payload");
        assert_eq!(payload, ActionPayload::Validate(DeclarationPayload::default()));
    }

    #[test]
    fn from_parts_rejects_missing_required_fields() {
        let err = ActionPayload::from_parts(ActionType::Register, json!({}))
            .expect_err("registration number is required");
        assert!(matches!(
            err,
            ActionValidationError::Malformed {
                action_type: ActionType::Register,
                ..
            }
        ));
    }

    #[test]
    fn declare_requires_fields_with_valid_ids() {
        let empty = ActionPayload::Declare(DeclarationPayload::default());
        assert_eq!(
            empty.validate(),
            Err(ActionValidationError::EmptyDeclaration(ActionType::Declare))
        );

        let mut declaration = Declaration::new();
        declaration.insert("Child Name".to_string(), json!("x"));
        let bad = ActionPayload::Declare(DeclarationPayload { declaration });
        assert_eq!(
            bad.validate(),
            Err(ActionValidationError::InvalidFieldId("Child Name".to_string()))
        );
    }

    #[test]
    fn reasons_must_not_be_blank() {
        let payload = ActionPayload::Archive(ReasonPayload {
            reason: "  ".to_string(),
        });
        assert!(matches!(
            payload.validate(),
            Err(ActionValidationError::BlankField { field: "reason", .. })
        ));
    }

    #[test]
    fn duplicate_scores_must_be_finite() {
        let payload = ActionPayload::DetectDuplicate(DuplicatesDetectedPayload {
            candidates: vec![DuplicateCandidate {
                record_id: Uuid::new_v4(),
                score: f64::NAN,
            }],
        });
        assert!(matches!(
            payload.validate(),
            Err(ActionValidationError::InvalidScore { .. })
        ));
    }

    #[test]
    fn merge_overwrites_and_removes_on_null() {
        let mut target = Declaration::new();
        target.insert("child.name".to_string(), json!("Ada"));
        target.insert("child.weight".to_string(), json!(3.1));

        let mut edits = Declaration::new();
        edits.insert("child.name".to_string(), json!("Ada Lovelace"));
        edits.insert("child.weight".to_string(), Value::Null);
        merge_declaration(&mut target, &edits);

        assert_eq!(target.get("child.name"), Some(&json!("Ada Lovelace")));
        assert!(!target.contains_key("child.weight"));
    }

    #[test]
    fn transaction_id_limits() {
        assert_eq!(
            TransactionId::new(" ").validate(),
            Err(ActionValidationError::BlankTransactionId)
        );
        assert!(TransactionId::new("x".repeat(129)).validate().is_err());
        assert!(TransactionId::generate().validate().is_ok());
    }
}

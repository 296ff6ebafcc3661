//! Scope grammar: `name` or `name[event=type|type]`.

use crate::model::record::RecordType;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

static SCOPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>[a-z]+(?:\.[a-z-]+)+)(?:\[(?P<key>[a-z]+)=(?P<values>[a-z|]+)\])?$")
        .expect("valid scope regex")
});

const QUALIFIER_EVENT: &str = "event";

pub const SCOPE_RECORD_CREATE: &str = "record.create";
pub const SCOPE_RECORD_NOTIFY: &str = "record.notify";
pub const SCOPE_RECORD_DECLARE: &str = "record.declare";
pub const SCOPE_RECORD_VALIDATE: &str = "record.validate";
pub const SCOPE_RECORD_REGISTER: &str = "record.register";
pub const SCOPE_RECORD_PRINT_CERTIFICATE: &str = "record.print-certificate";
pub const SCOPE_RECORD_REQUEST_CORRECTION: &str = "record.request-correction";
pub const SCOPE_RECORD_REVIEW_CORRECTION: &str = "record.review-correction";
pub const SCOPE_RECORD_REJECT: &str = "record.reject";
pub const SCOPE_RECORD_ARCHIVE: &str = "record.archive";
pub const SCOPE_RECORD_REVIEW_DUPLICATES: &str = "record.review-duplicates";
pub const SCOPE_RECORD_READ: &str = "record.read";
pub const SCOPE_RECORD_ASSIGN: &str = "record.assign";
pub const SCOPE_USER_UNASSIGN_OTHERS: &str = "user.unassign-others";

/// Known scope names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScopeName {
    RecordCreate,
    RecordNotify,
    RecordDeclare,
    RecordValidate,
    RecordRegister,
    RecordPrintCertificate,
    RecordRequestCorrection,
    RecordReviewCorrection,
    RecordReject,
    RecordArchive,
    RecordReviewDuplicates,
    RecordRead,
    RecordAssign,
    /// Administrative override for other actors' assignments.
    UserUnassignOthers,
}

impl ScopeName {
    pub const ALL: [ScopeName; 14] = [
        Self::RecordCreate,
        Self::RecordNotify,
        Self::RecordDeclare,
        Self::RecordValidate,
        Self::RecordRegister,
        Self::RecordPrintCertificate,
        Self::RecordRequestCorrection,
        Self::RecordReviewCorrection,
        Self::RecordReject,
        Self::RecordArchive,
        Self::RecordReviewDuplicates,
        Self::RecordRead,
        Self::RecordAssign,
        Self::UserUnassignOthers,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RecordCreate => SCOPE_RECORD_CREATE,
            Self::RecordNotify => SCOPE_RECORD_NOTIFY,
            Self::RecordDeclare => SCOPE_RECORD_DECLARE,
            Self::RecordValidate => SCOPE_RECORD_VALIDATE,
            Self::RecordRegister => SCOPE_RECORD_REGISTER,
            Self::RecordPrintCertificate => SCOPE_RECORD_PRINT_CERTIFICATE,
            Self::RecordRequestCorrection => SCOPE_RECORD_REQUEST_CORRECTION,
            Self::RecordReviewCorrection => SCOPE_RECORD_REVIEW_CORRECTION,
            Self::RecordReject => SCOPE_RECORD_REJECT,
            Self::RecordArchive => SCOPE_RECORD_ARCHIVE,
            Self::RecordReviewDuplicates => SCOPE_RECORD_REVIEW_DUPLICATES,
            Self::RecordRead => SCOPE_RECORD_READ,
            Self::RecordAssign => SCOPE_RECORD_ASSIGN,
            Self::UserUnassignOthers => SCOPE_USER_UNASSIGN_OTHERS,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.as_str() == value)
    }

    /// Whether the scope accepts an `[event=...]` qualifier.
    pub fn is_configurable(self) -> bool {
        matches!(self, Self::RecordNotify)
    }
}

impl Display for ScopeName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One granted scope. `record_types == None` grants every record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub name: ScopeName,
    pub record_types: Option<BTreeSet<RecordType>>,
}

impl Scope {
    pub fn unqualified(name: ScopeName) -> Self {
        Self {
            name,
            record_types: None,
        }
    }

    /// Whether this scope covers `record_type`. Qualified scopes need a
    /// known record type to match.
    pub fn covers(&self, record_type: Option<RecordType>) -> bool {
        match (&self.record_types, record_type) {
            (None, _) => true,
            (Some(types), Some(record_type)) => types.contains(&record_type),
            (Some(_), None) => false,
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.record_types {
            None => f.write_str(self.name.as_str()),
            Some(types) => {
                let joined = types
                    .iter()
                    .map(|record_type| record_type.as_str())
                    .collect::<Vec<_>>()
                    .join("|");
                write!(f, "{}[{QUALIFIER_EVENT}={joined}]", self.name)
            }
        }
    }
}

/// Parses one scope string.
pub fn parse_scope(value: &str) -> Result<Scope, ScopeParseError> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(ScopeParseError::EmptyScope);
    }

    let captures = SCOPE_RE
        .captures(normalized)
        .ok_or_else(|| ScopeParseError::Malformed(normalized.to_string()))?;
    let name_text = captures.name("name").map_or("", |m| m.as_str());
    let name = ScopeName::parse(name_text)
        .ok_or_else(|| ScopeParseError::UnknownScope(name_text.to_string()))?;

    let Some(key) = captures.name("key") else {
        return Ok(Scope::unqualified(name));
    };
    if !name.is_configurable() {
        return Err(ScopeParseError::QualifierNotSupported(name));
    }
    if key.as_str() != QUALIFIER_EVENT {
        return Err(ScopeParseError::UnknownQualifier(key.as_str().to_string()));
    }

    let mut record_types = BTreeSet::new();
    let values = captures.name("values").map_or("", |m| m.as_str());
    for value in values.split('|') {
        let record_type = RecordType::parse(value)
            .ok_or_else(|| ScopeParseError::UnknownRecordType(value.to_string()))?;
        record_types.insert(record_type);
    }

    Ok(Scope {
        name,
        record_types: Some(record_types),
    })
}

/// Scopes held by one actor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet {
    scopes: Vec<Scope>,
}

impl ScopeSet {
    pub fn new(scopes: Vec<Scope>) -> Self {
        Self { scopes }
    }

    /// Parses every value; the first invalid scope fails the whole set.
    pub fn parse<'a>(values: impl IntoIterator<Item = &'a str>) -> Result<Self, ScopeParseError> {
        let scopes = values
            .into_iter()
            .map(parse_scope)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { scopes })
    }

    pub fn has(&self, name: ScopeName) -> bool {
        self.scopes.iter().any(|scope| scope.name == name)
    }

    /// Whether some granted `name` scope covers `record_type`.
    pub fn permits(&self, name: ScopeName, record_type: Option<RecordType>) -> bool {
        self.scopes
            .iter()
            .any(|scope| scope.name == name && scope.covers(record_type))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.iter()
    }
}

/// Scope parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeParseError {
    EmptyScope,
    Malformed(String),
    UnknownScope(String),
    QualifierNotSupported(ScopeName),
    UnknownQualifier(String),
    UnknownRecordType(String),
}

impl Display for ScopeParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyScope => write!(f, "scope value must not be empty"),
            Self::Malformed(value) => write!(f, "malformed scope: {value}"),
            Self::UnknownScope(value) => write!(f, "scope is unsupported: {value}"),
            Self::QualifierNotSupported(name) => {
                write!(f, "scope `{name}` does not accept a qualifier")
            }
            Self::UnknownQualifier(key) => write!(f, "unknown scope qualifier `{key}`"),
            Self::UnknownRecordType(value) => {
                write!(f, "unknown record type `{value}` in scope qualifier")
            }
        }
    }
}

impl Error for ScopeParseError {}

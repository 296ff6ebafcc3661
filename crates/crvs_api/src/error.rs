//! Transport-neutral error envelope.
//!
//! # Invariants
//! - Every failure maps to exactly one `(status, code)` pair.
//! - `retryable` is `true` only when the same request may succeed later,
//!   possibly after the client re-reads the record.

use crvs_core::lock::LockError;
use crvs_core::{DbError, DraftError, IdentityError, RepoError, SubmitError};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;
pub const STATUS_UNPROCESSABLE: u16 = 422;
pub const STATUS_INTERNAL: u16 = 500;
pub const STATUS_UNAVAILABLE: u16 = 503;

/// Failure envelope returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    /// HTTP-style status code.
    pub status: u16,
    /// Stable machine-readable code, e.g. `NotAssignedToYou`.
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl ApiError {
    fn new(status: u16, code: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retryable,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(STATUS_UNAUTHORIZED, "Unauthorized", message, false)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(STATUS_UNPROCESSABLE, "ValidationFailed", message, false)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(STATUS_NOT_FOUND, code, message, false)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(STATUS_UNAVAILABLE, "DependencyUnavailable", message, true)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(STATUS_INTERNAL, "StorageFailure", message, false)
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.status, self.code, self.message)
    }
}

impl Error for ApiError {}

impl From<IdentityError> for ApiError {
    fn from(value: IdentityError) -> Self {
        Self::unauthorized(value.to_string())
    }
}

impl From<DbError> for ApiError {
    fn from(value: DbError) -> Self {
        let message = format!("ledger: {value}");
        match value {
            DbError::Sqlite(_) => Self::unavailable(message),
            // Retrying cannot change the schema or journal mode of the file.
            DbError::UnsupportedSchemaVersion { .. }
            | DbError::Migration { .. }
            | DbError::JournalMode { .. } => Self::storage(message),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(value: RepoError) -> Self {
        SubmitError::from(value).into()
    }
}

impl From<SubmitError> for ApiError {
    fn from(value: SubmitError) -> Self {
        let message = value.to_string();
        match value {
            SubmitError::Unauthorized { .. } | SubmitError::AssignOthersForbidden { .. } => {
                Self::unauthorized(message)
            }
            SubmitError::Lock(LockError::NotAssignedToYou { .. }) => {
                Self::new(STATUS_FORBIDDEN, "NotAssignedToYou", message, true)
            }
            SubmitError::Lock(LockError::AlreadyAssigned { .. }) => {
                Self::new(STATUS_CONFLICT, "AlreadyAssigned", message, true)
            }
            SubmitError::Lock(LockError::NotAssigned) => {
                Self::new(STATUS_CONFLICT, "NotAssigned", message, true)
            }
            SubmitError::Conflict { .. } => Self::new(STATUS_CONFLICT, "Conflict", message, true),
            SubmitError::TransactionReused { .. } => {
                Self::new(STATUS_CONFLICT, "TransactionReused", message, false)
            }
            SubmitError::InvalidTransition { .. }
            | SubmitError::UnknownCorrectionRequest { .. }
            | SubmitError::Validation(_)
            | SubmitError::RecordAlreadyExists(_)
            | SubmitError::CreateOutOfOrder(_) => Self::validation(message),
            SubmitError::RecordNotFound(_) => Self::not_found("RecordNotFound", message),
            SubmitError::DependencyUnavailable { .. } => Self::unavailable(message),
            SubmitError::Projection(_) | SubmitError::Storage(_) => Self::storage(message),
        }
    }
}

impl From<DraftError> for ApiError {
    fn from(value: DraftError) -> Self {
        let message = value.to_string();
        match value {
            DraftError::RecordNotFound(_) => Self::not_found("RecordNotFound", message),
            // Other actors' drafts are reported as missing.
            DraftError::DraftNotFound(_) | DraftError::NotDraftOwner { .. } => {
                Self::not_found("DraftNotFound", message)
            }
            DraftError::RecordClosed { .. } => Self::validation(message),
            DraftError::Unauthorized { .. } => Self::unauthorized(message),
            DraftError::Conflict { .. } => Self::new(STATUS_CONFLICT, "Conflict", message, true),
            DraftError::Submit(err) => err.into(),
            DraftError::Repo(err) => err.into(),
            DraftError::Projection(_) => Self::storage(message),
        }
    }
}

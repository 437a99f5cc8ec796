//! Error types for the monitoring core.
//!
//! Domain invariants surface as [`ValidationError`], forbidden lifecycle moves
//! as [`StateConflictError`], and everything that reaches a caller is wrapped
//! in [`MonitorError`]. Store failures are carried unchanged.

use thiserror::Error;
use uuid::Uuid;

use crate::crypto::CryptoError;

/// Rejected input for an entity constructor or update.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: &'static str },
    #[error("{field} must be between {min} and {max} characters, got {actual}")]
    Length {
        field: &'static str,
        min: usize,
        max: usize,
        actual: usize,
    },
    #[error("{field} must be between {min} and {max}, got {actual}")]
    OutOfBounds {
        field: &'static str,
        min: i64,
        max: i64,
        actual: i64,
    },
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },
    #[error("minimum value ({min}) must be less than maximum value ({max})")]
    InvertedRange { min: f64, max: f64 },
    #[error("invalid endpoint url '{value}': {reason}")]
    InvalidEndpoint { value: String, reason: String },
    #[error("invalid {field} '{value}'")]
    UnknownVariant { field: &'static str, value: String },
}

/// A lifecycle operation that is not allowed from the entity's current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateConflictError {
    #[error("connection is already {state}")]
    AlreadyInState { state: &'static str },
    #[error("alarm is already acknowledged")]
    AlreadyAcknowledged,
    #[error("cannot acknowledge a cleared alarm")]
    CannotAcknowledgeCleared,
    #[error("alarm is already cleared")]
    AlreadyCleared,
    #[error("critical alarms must be acknowledged before clearing")]
    MustAcknowledgeFirst,
}

impl StateConflictError {
    /// Stable machine-readable code (SCREAMING_SNAKE_CASE).
    pub fn error_code(&self) -> &'static str {
        match self {
            StateConflictError::AlreadyInState { .. } => "ALREADY_IN_STATE",
            StateConflictError::AlreadyAcknowledged => "ALREADY_ACKNOWLEDGED",
            StateConflictError::CannotAcknowledgeCleared => "CANNOT_ACKNOWLEDGE_CLEARED",
            StateConflictError::AlreadyCleared => "ALREADY_CLEARED",
            StateConflictError::MustAcknowledgeFirst => "MUST_ACKNOWLEDGE_FIRST",
        }
    }
}

/// Top-level error returned by stores, the alarm engine and the poller.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Conflict(#[from] StateConflictError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("store operation failed: {0}")]
    Store(#[from] sea_orm::DbErr),
    #[error("stored {entity} {id} is corrupt: {reason}")]
    Corrupt {
        entity: &'static str,
        id: Uuid,
        reason: String,
    },
    #[error("credential encryption failed: {0}")]
    Crypto(#[from] CryptoError),
}

impl MonitorError {
    /// Stable machine-readable code (SCREAMING_SNAKE_CASE).
    pub fn error_code(&self) -> &'static str {
        match self {
            MonitorError::Validation(_) => "VALIDATION_FAILED",
            MonitorError::Conflict(conflict) => conflict.error_code(),
            MonitorError::NotFound { .. } => "NOT_FOUND",
            MonitorError::Store(_) => "STORE_FAILURE",
            MonitorError::Corrupt { .. } => "CORRUPT_RECORD",
            MonitorError::Crypto(_) => "CRYPTO_FAILURE",
        }
    }

    /// Whether the error came from a collaborator rather than the caller's input.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            MonitorError::Store(_) | MonitorError::Corrupt { .. } | MonitorError::Crypto(_)
        )
    }

    pub(crate) fn not_found(entity: &'static str, id: Uuid) -> Self {
        MonitorError::NotFound { entity, id }
    }

    pub(crate) fn corrupt(entity: &'static str, id: Uuid, reason: impl Into<String>) -> Self {
        MonitorError::Corrupt {
            entity,
            id,
            reason: reason.into(),
        }
    }
}

/// Returns true when `error` is a unique-constraint violation on any supported backend.
pub fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code: &str = &code;
        code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
    })
}

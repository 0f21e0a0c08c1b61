//! # Error Handling
//!
//! Error taxonomy of the resilience core. Blocked admissions are not errors
//! and never appear here; see [`crate::breaker::Admission`].

use thiserror::Error;
use uuid::Uuid;

/// A ledger entry was rejected before it was written, or storage failed.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid ledger entry: {field} {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("ledger storage error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl LedgerError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        LedgerError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, LedgerError::Validation { .. })
    }
}

/// Tenant scoping and reconciliation failures of the job guard.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("job run requires a resolvable business id (got {business_id:?})")]
    MissingTenant { business_id: Option<Uuid> },
    #[error("job type must not be empty")]
    InvalidJobType,
    #[error("job run cannot be completed with non-terminal status '{status}'")]
    NonTerminalStatus { status: String },
    #[error("job run {run_id} not found for business {business_id}")]
    NotFound { business_id: Uuid, run_id: Uuid },
    #[error("deleting orphaned job runs requires a confirmation token")]
    ConfirmationRequired,
    #[error("confirmation token does not match")]
    InvalidConfirmation,
    #[error("business {0} does not exist")]
    UnknownBusiness(Uuid),
    #[error("job run storage error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Internal breaker fault. Distinct from a blocked admission: this means the
/// record was found or would be left in an impossible state.
#[derive(Debug, Error)]
pub enum BreakerFault {
    #[error("circuit breaker {key} invariant violated: {detail}")]
    InvariantViolation { key: String, detail: String },
    #[error("circuit breaker {key} kept losing its write to concurrent updates ({attempts} attempts)")]
    WriteConflict { key: String, attempts: u32 },
}

/// Aggregate error surfaced to the job orchestration layer.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Guard(#[from] GuardError),
    #[error(transparent)]
    Breaker(#[from] BreakerFault),
    #[error("storage error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl CoreError {
    pub fn is_missing_tenant(&self) -> bool {
        matches!(self, CoreError::Guard(GuardError::MissingTenant { .. }))
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, CoreError::Breaker(BreakerFault::InvariantViolation { .. }))
    }
}

/// Whether `error` is a unique-constraint violation on any supported backend.
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

    db_error
        .code()
        .is_some_and(|code| code.as_ref() == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code.as_ref()))
}

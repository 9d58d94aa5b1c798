//! Ledger Error Types
//!
//! One taxonomy shared by the session, the store backends and the transfer
//! engine. Every variant is either retryable (the caller may re-run the whole
//! operation) or terminal for the given request.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::core_types::AccountId;
use crate::money::MoneyError;

/// Whether a failed operation may succeed if re-run from the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Conflict or connectivity problem - re-run with fresh reads
    Retryable,
    /// Request or configuration problem - re-running will fail the same way
    Terminal,
}

/// Ledger error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // === Request Errors ===
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Insufficient funds in account {account}: required {required}, available {available}")]
    InsufficientFunds {
        account: AccountId,
        required: Decimal,
        available: Decimal,
    },

    // === Session Errors ===
    #[error("Write attempted in a read-only session")]
    ReadOnlyViolation,

    #[error("Session configuration error: {0}")]
    SessionConfigurationError(String),

    #[error("A transaction is already active on this session")]
    TransactionAlreadyActive,

    #[error("Session is closed")]
    SessionClosed,

    // === Store Errors ===
    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    /// Stable error code for logs and CLI output
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidArgument(_) => "INVALID_ARGUMENT",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::ReadOnlyViolation => "READ_ONLY_VIOLATION",
            LedgerError::SessionConfigurationError(_) => "SESSION_CONFIGURATION_ERROR",
            LedgerError::TransactionAlreadyActive => "TRANSACTION_ALREADY_ACTIVE",
            LedgerError::SessionClosed => "SESSION_CLOSED",
            LedgerError::SerializationFailure(_) => "SERIALIZATION_FAILURE",
            LedgerError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            LedgerError::Database(_) => "DATABASE_ERROR",
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            LedgerError::SerializationFailure(_) | LedgerError::StoreUnavailable(_) => {
                Disposition::Retryable
            }
            _ => Disposition::Terminal,
        }
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retryable
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => {
                    LedgerError::SerializationFailure(db.message().to_string())
                }
                // read_only_sql_transaction
                Some("25006") => LedgerError::ReadOnlyViolation,
                // active_sql_transaction
                Some("25001") => LedgerError::TransactionAlreadyActive,
                _ => LedgerError::Database(e.to_string()),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => LedgerError::StoreUnavailable(e.to_string()),
            _ => LedgerError::Database(e.to_string()),
        }
    }
}

impl From<MoneyError> for LedgerError {
    fn from(e: MoneyError) -> Self {
        LedgerError::InvalidArgument(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::AccountNotFound(3).code(), "ACCOUNT_NOT_FOUND");
        assert_eq!(LedgerError::ReadOnlyViolation.code(), "READ_ONLY_VIOLATION");
        assert_eq!(
            LedgerError::SerializationFailure("x".into()).code(),
            "SERIALIZATION_FAILURE"
        );
    }

    #[test]
    fn test_only_conflicts_and_connectivity_are_retryable() {
        assert!(LedgerError::SerializationFailure("conflict".into()).is_retryable());
        assert!(LedgerError::StoreUnavailable("down".into()).is_retryable());

        let terminal = [
            LedgerError::InvalidArgument("bad".into()),
            LedgerError::AccountNotFound(0),
            LedgerError::InsufficientFunds {
                account: 5,
                required: Decimal::new(242501, 2),
                available: Decimal::new(240000, 2),
            },
            LedgerError::ReadOnlyViolation,
            LedgerError::SessionConfigurationError("active".into()),
            LedgerError::TransactionAlreadyActive,
            LedgerError::SessionClosed,
            LedgerError::Database("syntax".into()),
        ];
        for e in terminal {
            assert_eq!(e.disposition(), Disposition::Terminal, "{e}");
        }
    }

    #[test]
    fn test_sqlx_connectivity_maps_to_store_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            LedgerError::from(sqlx::Error::Io(io)),
            LedgerError::StoreUnavailable(_)
        ));
        assert!(matches!(
            LedgerError::from(sqlx::Error::PoolTimedOut),
            LedgerError::StoreUnavailable(_)
        ));
        assert!(matches!(
            LedgerError::from(sqlx::Error::RowNotFound),
            LedgerError::Database(_)
        ));
    }

    #[test]
    fn test_display() {
        let err = LedgerError::InsufficientFunds {
            account: 5,
            required: Decimal::new(242501, 2),
            available: Decimal::new(240000, 2),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds in account 5: required 2425.01, available 2400.00"
        );
    }
}

//! Ledger Store
//!
//! The transactional relational store that owns the account ledger. The rest
//! of the crate never touches storage directly: it issues typed, parameterized
//! statements through a [`LedgerConnection`] and lets the store enforce
//! isolation and durability.
//!
//! # Backends
//!
//! - [`postgres::PgLedgerStore`] - a PostgreSQL database (`accounts` table)
//! - [`memory::MemoryLedgerStore`] - an in-process MVCC ledger used by tests
//!   and the `--memory` demo mode
//!
//! # Schema
//!
//! ```text
//! accounts(id integer primary key, balance numeric(15, 2) not null)
//! ```
//!
//! Row `id = 0` is reserved for the fee-collector account.

pub mod memory;
pub mod postgres;
pub mod schema;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::AccountId;
use crate::error::LedgerError;

/// Transaction isolation level.
///
/// Ordered from weakest to strongest, so `level >= IsolationLevel::RepeatableRead`
/// reads naturally.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Each statement sees data committed before it began
    #[default]
    ReadCommitted,
    /// All statements see one snapshot; concurrent row updates abort
    RepeatableRead,
    /// Equivalent to some serial order of all committed transactions
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling used in `BEGIN ISOLATION LEVEL ...`
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "read committed",
            IsolationLevel::RepeatableRead => "repeatable read",
            IsolationLevel::Serializable => "serializable",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = LedgerError;

    /// Accepts `read committed`, `read_committed`, `READ-COMMITTED`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '_' | '-' => ' ',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        match normalized.as_str() {
            "read committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(LedgerError::InvalidArgument(format!(
                "unknown isolation level: {s}"
            ))),
        }
    }
}

/// Characteristics of one transaction, fixed at `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

impl TxOptions {
    pub fn begin_sql(&self) -> String {
        format!(
            "BEGIN ISOLATION LEVEL {} {}",
            self.isolation.as_sql(),
            if self.read_only {
                "READ ONLY"
            } else {
                "READ WRITE"
            }
        )
    }
}

/// One row of the `accounts` table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Decimal,
}

/// Parameterized statements understood by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Fetch one account by id (zero or one row)
    SelectAccount { id: AccountId },
    /// Fetch every account ordered by id
    SelectAllAccounts,
    /// `balance = balance + delta` for one account (row count 0 or 1)
    AdjustBalance { id: AccountId, delta: Decimal },
    /// Create an account (row count 1)
    InsertAccount { id: AccountId, balance: Decimal },
}

impl Statement {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Statement::AdjustBalance { .. } | Statement::InsertAccount { .. }
        )
    }

    /// SQL text as sent to PostgreSQL
    pub fn sql(&self) -> &'static str {
        match self {
            Statement::SelectAccount { .. } => "SELECT id, balance FROM accounts WHERE id = $1",
            Statement::SelectAllAccounts => "SELECT id, balance FROM accounts ORDER BY id",
            Statement::AdjustBalance { .. } => {
                "UPDATE accounts SET balance = balance + $2 WHERE id = $1"
            }
            Statement::InsertAccount { .. } => {
                "INSERT INTO accounts (id, balance) VALUES ($1, $2)"
            }
        }
    }
}

/// Result of a statement: rows for queries, affected row count for writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementOutput {
    Rows(Vec<Account>),
    RowCount(u64),
}

impl StatementOutput {
    pub fn into_rows(self) -> Vec<Account> {
        match self {
            StatementOutput::Rows(rows) => rows,
            StatementOutput::RowCount(_) => Vec::new(),
        }
    }

    pub fn row_count(&self) -> u64 {
        match self {
            StatementOutput::Rows(rows) => rows.len() as u64,
            StatementOutput::RowCount(n) => *n,
        }
    }
}

/// Factory for connections to one ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Open one logical connection
    async fn connect(&self) -> Result<Box<dyn LedgerConnection>, LedgerError>;

    /// Create the `accounts` table if the backend needs it
    async fn ensure_schema(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// One logical connection to the ledger.
///
/// Dropping a connection with an open transaction aborts that transaction.
#[async_trait]
pub trait LedgerConnection: Send {
    /// Start a transaction with the given characteristics
    async fn begin(&mut self, options: TxOptions) -> Result<(), LedgerError>;

    /// Run one statement. Outside a transaction the statement commits on its own.
    async fn execute(&mut self, statement: &Statement) -> Result<StatementOutput, LedgerError>;

    /// Make the open transaction durable.
    ///
    /// The transaction is over once this returns, whether it succeeded or not.
    async fn commit(&mut self) -> Result<(), LedgerError>;

    /// Discard the open transaction
    async fn rollback(&mut self) -> Result<(), LedgerError>;

    /// Release the connection
    async fn close(self: Box<Self>) -> Result<(), LedgerError>;
}

//! Fee Ledger - atomic funds transfer over a transactional account ledger
//!
//! Moves money between accounts, charging a fee to the bank account, with
//! every transfer applied as one transaction that the store can serialize.
//!
//! # Modules
//!
//! - [`core_types`] - Account ids and ledger constants
//! - [`error`] - `LedgerError` taxonomy (retryable vs terminal)
//! - [`money`] - Decimal validation, fee rounding, formatting
//! - [`store`] - Ledger Store seam: PostgreSQL and in-memory backends
//! - [`session`] - One connection plus its transaction state machine
//! - [`transfer`] - Transfer Engine and caller-side retry
//! - [`accounts`] - Opening, listing and auditing accounts
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup

// Core types - must be first!
pub mod core_types;

pub mod error;
pub mod money;

// Ledger access
pub mod session;
pub mod store;

// Transfers
pub mod accounts;
pub mod transfer;

// Application plumbing
pub mod config;
pub mod logging;

// Convenient re-exports at crate root
pub use core_types::{AccountId, BANK_ACCOUNT_ID, CURRENCY_SCALE};
pub use error::{Disposition, LedgerError};
pub use session::{Session, SessionConfig, TxState};
pub use store::{
    Account, IsolationLevel, LedgerConnection, LedgerStore, MemoryLedgerStore, PgLedgerStore,
    Statement, StatementOutput, TxOptions,
};
pub use transfer::{
    EngineConfig, RetryPolicy, TransferEngine, TransferPhase, TransferReceipt, TransferRequest,
    transfer_with_retry,
};

//! Session
//!
//! One logical connection to the ledger and the transaction discipline around
//! it.
//!
//! # State Machine
//!
//! ```text
//!                begin() / first statement (autocommit off)
//! NO_TRANSACTION ─────────────────────────────────────────▶ ACTIVE
//!        ▲                                                    │
//!        └─────────────── commit() / rollback() ──────────────┘
//! ```
//!
//! # Rules
//!
//! 1. Isolation level, read-only and autocommit can only change in
//!    `NO_TRANSACTION`; otherwise the setter returns `SessionConfigurationError`.
//! 2. With autocommit on, a statement issued in `NO_TRANSACTION` runs in its
//!    own transaction and is committed immediately.
//! 3. With autocommit off, a statement issued in `NO_TRANSACTION` opens a
//!    transaction that stays `ACTIVE` until commit or rollback.
//! 4. A read-only session rejects writes with `ReadOnlyViolation` before
//!    anything reaches the store.
//! 5. `close()` rolls back an open transaction. Dropping a session without
//!    closing it drops the connection, and the store aborts the transaction.

use std::sync::atomic::{AtomicU64, Ordering};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core_types::AccountId;
use crate::error::LedgerError;
use crate::store::{
    Account, IsolationLevel, LedgerConnection, LedgerStore, Statement, StatementOutput, TxOptions,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Session characteristics applied to every transaction it opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub autocommit: bool,
    pub readonly: bool,
    pub isolation: IsolationLevel,
}

/// Transaction state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    NoTransaction,
    Active,
}

impl TxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::NoTransaction => "NO_TRANSACTION",
            TxState::Active => "ACTIVE",
        }
    }
}

pub struct Session {
    id: u64,
    conn: Option<Box<dyn LedgerConnection>>,
    config: SessionConfig,
    state: TxState,
}

impl Session {
    /// Connect with default settings (read committed, read-write, autocommit off)
    pub async fn connect(store: &dyn LedgerStore) -> Result<Self, LedgerError> {
        Self::connect_with(store, SessionConfig::default()).await
    }

    pub async fn connect_with(
        store: &dyn LedgerStore,
        config: SessionConfig,
    ) -> Result<Self, LedgerError> {
        let conn = store.connect().await?;
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            session = id,
            store = store.name(),
            isolation = %config.isolation,
            readonly = config.readonly,
            autocommit = config.autocommit,
            "Session opened"
        );
        Ok(Self {
            id,
            conn: Some(conn),
            config,
            state: TxState::NoTransaction,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.config.isolation
    }

    pub fn is_readonly(&self) -> bool {
        self.config.readonly
    }

    pub fn is_autocommit(&self) -> bool {
        self.config.autocommit
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    #[inline]
    pub fn in_transaction(&self) -> bool {
        self.state == TxState::Active
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    // ------------------------------------------------------------------
    // Guarded setters
    // ------------------------------------------------------------------

    fn check_configurable(&self, what: &str) -> Result<(), LedgerError> {
        if self.is_closed() {
            return Err(LedgerError::SessionClosed);
        }
        if self.in_transaction() {
            return Err(LedgerError::SessionConfigurationError(format!(
                "cannot change {what} while a transaction is active"
            )));
        }
        Ok(())
    }

    pub fn set_isolation(&mut self, level: IsolationLevel) -> Result<(), LedgerError> {
        self.check_configurable("isolation level")?;
        self.config.isolation = level;
        Ok(())
    }

    pub fn set_readonly(&mut self, readonly: bool) -> Result<(), LedgerError> {
        self.check_configurable("read-only mode")?;
        self.config.readonly = readonly;
        Ok(())
    }

    pub fn set_autocommit(&mut self, autocommit: bool) -> Result<(), LedgerError> {
        self.check_configurable("autocommit")?;
        self.config.autocommit = autocommit;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transaction lifecycle
    // ------------------------------------------------------------------

    fn tx_options(&self) -> TxOptions {
        TxOptions {
            isolation: self.config.isolation,
            read_only: self.config.readonly,
        }
    }

    fn connection(&mut self) -> Result<&mut Box<dyn LedgerConnection>, LedgerError> {
        self.conn.as_mut().ok_or(LedgerError::SessionClosed)
    }

    /// Start a transaction with the session's current settings
    pub async fn begin(&mut self) -> Result<(), LedgerError> {
        if self.in_transaction() {
            return Err(LedgerError::TransactionAlreadyActive);
        }
        let options = self.tx_options();
        self.connection()?.begin(options).await?;
        self.state = TxState::Active;
        debug!(session = self.id, isolation = %options.isolation, "BEGIN");
        Ok(())
    }

    /// Commit the active transaction. A no-op without one.
    ///
    /// The session is back in `NO_TRANSACTION` afterwards even when the
    /// commit fails (e.g. `SerializationFailure`).
    pub async fn commit(&mut self) -> Result<(), LedgerError> {
        let conn = self.conn.as_mut().ok_or(LedgerError::SessionClosed)?;
        if self.state == TxState::NoTransaction {
            debug!(session = self.id, "COMMIT without active transaction ignored");
            return Ok(());
        }
        let result = conn.commit().await;
        self.state = TxState::NoTransaction;
        match &result {
            Ok(()) => debug!(session = self.id, "COMMIT"),
            Err(e) => warn!(session = self.id, error = %e, "COMMIT failed"),
        }
        result
    }

    /// Discard the active transaction. A no-op without one.
    pub async fn rollback(&mut self) -> Result<(), LedgerError> {
        let conn = self.conn.as_mut().ok_or(LedgerError::SessionClosed)?;
        if self.state == TxState::NoTransaction {
            return Ok(());
        }
        let result = conn.rollback().await;
        self.state = TxState::NoTransaction;
        debug!(session = self.id, "ROLLBACK");
        result
    }

    /// Roll back any open transaction and release the connection. Idempotent.
    pub async fn close(&mut self) -> Result<(), LedgerError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        if self.state == TxState::Active {
            self.state = TxState::NoTransaction;
            if let Err(e) = conn.rollback().await {
                warn!(session = self.id, error = %e, "Implicit rollback on close failed");
            }
        }
        debug!(session = self.id, "Session closed");
        conn.close().await
    }

    /// Swap the connection for a fresh one from `store`, keeping the session's
    /// settings. An open transaction on the old connection is abandoned.
    ///
    /// On failure the old connection is kept. A closed session stays closed.
    pub async fn reconnect(&mut self, store: &dyn LedgerStore) -> Result<(), LedgerError> {
        if self.is_closed() {
            return Err(LedgerError::SessionClosed);
        }
        let fresh = store.connect().await?;
        self.state = TxState::NoTransaction;
        if let Some(old) = self.conn.replace(fresh) {
            // The old connection is usually already broken.
            if let Err(e) = old.close().await {
                debug!(session = self.id, error = %e, "Closing replaced connection failed");
            }
        }
        info!(session = self.id, store = store.name(), "Session reconnected");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Run one statement, opening a transaction first if the session needs one
    pub async fn execute(&mut self, statement: &Statement) -> Result<StatementOutput, LedgerError> {
        if self.is_closed() {
            return Err(LedgerError::SessionClosed);
        }
        if self.config.readonly && statement.is_write() {
            return Err(LedgerError::ReadOnlyViolation);
        }

        match (self.state, self.config.autocommit) {
            (TxState::Active, _) => self.connection()?.execute(statement).await,
            (TxState::NoTransaction, true) => {
                self.begin().await?;
                match self.connection()?.execute(statement).await {
                    Ok(output) => {
                        self.commit().await?;
                        Ok(output)
                    }
                    Err(e) => {
                        if let Err(rb) = self.rollback().await {
                            warn!(session = self.id, error = %rb, "Rollback after failed statement failed");
                        }
                        Err(e)
                    }
                }
            }
            (TxState::NoTransaction, false) => {
                self.begin().await?;
                self.connection()?.execute(statement).await
            }
        }
    }

    pub async fn fetch_account(&mut self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        let rows = self
            .execute(&Statement::SelectAccount { id })
            .await?
            .into_rows();
        Ok(rows.into_iter().next())
    }

    pub async fn fetch_balance(&mut self, id: AccountId) -> Result<Option<Decimal>, LedgerError> {
        Ok(self.fetch_account(id).await?.map(|a| a.balance))
    }

    pub async fn fetch_all_accounts(&mut self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.execute(&Statement::SelectAllAccounts).await?.into_rows())
    }

    /// `balance += delta`; returns the number of rows touched (0 or 1)
    pub async fn adjust_balance(
        &mut self,
        id: AccountId,
        delta: Decimal,
    ) -> Result<u64, LedgerError> {
        Ok(self
            .execute(&Statement::AdjustBalance { id, delta })
            .await?
            .row_count())
    }

    pub async fn insert_account(
        &mut self,
        id: AccountId,
        balance: Decimal,
    ) -> Result<u64, LedgerError> {
        Ok(self
            .execute(&Statement::InsertAccount { id, balance })
            .await?
            .row_count())
    }
}

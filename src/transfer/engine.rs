//! Transfer Engine
//!
//! Checks the preconditions of a transfer and applies the three balance
//! adjustments inside one transaction of the caller's session.
//!
//! # Preconditions (checked in order, first failure wins)
//!
//! 1. `amount > 0` and `0 <= fee_rate <= 1`, else `InvalidArgument`.
//!    Session checks (`SessionClosed`, `TransactionAlreadyActive`, isolation
//!    floor) come right after, before any statement is issued.
//! 2. `src` exists, else `AccountNotFound(src)`
//! 3. `dst` exists, else `AccountNotFound(dst)`
//! 4. the bank account exists when the fee is nonzero, else `AccountNotFound(bank)`
//! 5. `src.balance >= amount + fee`, else `InsufficientFunds`
//!
//! # Effect
//!
//! `src -= amount + fee`, `dst += amount`, `bank += fee`, committed together or
//! not at all.
//!
//! # Isolation
//!
//! The read-check-write sequence is only safe if the store rejects
//! interleavings that would invalidate the funds check. The engine refuses
//! sessions below [`EngineConfig::minimum_isolation`]; a
//! `SerializationFailure` it returns means "re-run the whole transfer", which
//! is left to the caller (see [`super::retry`]).

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::state::TransferPhase;
use super::types::{TransferReceipt, TransferRequest};
use crate::core_types::{AccountId, BANK_ACCOUNT_ID};
use crate::error::LedgerError;
use crate::session::Session;
use crate::store::IsolationLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Account credited with fees
    pub bank_account: AccountId,
    /// Weakest session isolation the engine will run under
    pub minimum_isolation: IsolationLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bank_account: BANK_ACCOUNT_ID,
            minimum_isolation: IsolationLevel::RepeatableRead,
        }
    }
}

/// Tracks and logs the phase of one invocation
struct PhaseTracker {
    phase: TransferPhase,
    session: u64,
}

impl PhaseTracker {
    fn new(session: u64) -> Self {
        Self {
            phase: TransferPhase::Start,
            session,
        }
    }

    fn advance(&mut self, next: TransferPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal transfer phase transition {} -> {}",
            self.phase,
            next
        );
        debug!(session = self.session, from = %self.phase, to = %next, "Transfer phase");
        self.phase = next;
    }
}

/// Fee-charging transfer over a [`Session`]
#[derive(Debug, Clone, Default)]
pub struct TransferEngine {
    config: EngineConfig,
}

impl TransferEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute one transfer as a single transaction on `session`.
    ///
    /// Never retries. On any error the transaction has been rolled back and
    /// the ledger is unchanged.
    pub async fn transfer(
        &self,
        session: &mut Session,
        request: &TransferRequest,
    ) -> Result<TransferReceipt, LedgerError> {
        let mut tracker = PhaseTracker::new(session.id());
        self.run(session, request, &mut tracker).await
    }

    async fn run(
        &self,
        session: &mut Session,
        request: &TransferRequest,
        tracker: &mut PhaseTracker,
    ) -> Result<TransferReceipt, LedgerError> {
        tracker.advance(TransferPhase::Validating);

        // Request shape first, then whether this session may run it.
        let checked = match request.validate() {
            Ok(fee) => self.check_session(session).map(|()| fee),
            Err(e) => Err(e),
        };
        let fee = match checked {
            Ok(fee) => fee,
            Err(e) => {
                tracker.advance(TransferPhase::RolledBack);
                debug!(session = session.id(), code = e.code(), "Transfer rejected");
                return Err(e);
            }
        };

        let applied = match session.begin().await {
            Ok(()) => self.check_and_apply(session, request, fee, tracker).await,
            Err(e) => Err(e),
        };
        let total_debit = match applied {
            Ok(total) => total,
            Err(e) => {
                if let Err(rb) = session.rollback().await {
                    warn!(session = session.id(), error = %rb, "Rollback after failed transfer failed");
                }
                tracker.advance(TransferPhase::RolledBack);
                debug!(session = session.id(), code = e.code(), "Transfer rolled back");
                return Err(e);
            }
        };

        if let Err(e) = session.commit().await {
            tracker.advance(TransferPhase::RolledBack);
            if e.is_retryable() {
                warn!(
                    src = request.src,
                    dst = request.dst,
                    error = %e,
                    "Transfer aborted at commit (retryable)"
                );
            }
            return Err(e);
        }
        tracker.advance(TransferPhase::Committed);

        info!(
            src = request.src,
            dst = request.dst,
            amount = %request.amount,
            fee = %fee,
            "Transfer committed"
        );

        Ok(TransferReceipt {
            request: *request,
            fee,
            total_debit,
            attempts: 1,
            committed_at: Utc::now(),
        })
    }

    fn check_session(&self, session: &Session) -> Result<(), LedgerError> {
        if session.is_closed() {
            return Err(LedgerError::SessionClosed);
        }
        // The transfer must own its transaction boundaries.
        if session.in_transaction() {
            return Err(LedgerError::TransactionAlreadyActive);
        }
        if session.isolation() < self.config.minimum_isolation {
            return Err(LedgerError::SessionConfigurationError(format!(
                "transfer requires at least {} isolation, session uses {}",
                self.config.minimum_isolation,
                session.isolation()
            )));
        }
        Ok(())
    }

    async fn require_balance(
        session: &mut Session,
        id: AccountId,
    ) -> Result<Decimal, LedgerError> {
        session
            .fetch_balance(id)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn apply_delta(
        session: &mut Session,
        id: AccountId,
        delta: Decimal,
    ) -> Result<(), LedgerError> {
        match session.adjust_balance(id, delta).await? {
            0 => Err(LedgerError::AccountNotFound(id)),
            _ => Ok(()),
        }
    }

    /// Steps 2-5 and the effect. Returns the total debited from `src`.
    async fn check_and_apply(
        &self,
        session: &mut Session,
        request: &TransferRequest,
        fee: Decimal,
        tracker: &mut PhaseTracker,
    ) -> Result<Decimal, LedgerError> {
        let bank = self.config.bank_account;

        let src_balance = Self::require_balance(session, request.src).await?;
        Self::require_balance(session, request.dst).await?;
        if !fee.is_zero() {
            Self::require_balance(session, bank).await?;
        }

        let total_debit = request.total_debit(fee)?;
        if src_balance < total_debit {
            return Err(LedgerError::InsufficientFunds {
                account: request.src,
                required: total_debit,
                available: src_balance,
            });
        }

        tracker.advance(TransferPhase::Applying);
        Self::apply_delta(session, request.src, -total_debit).await?;
        Self::apply_delta(session, request.dst, request.amount).await?;
        if !fee.is_zero() {
            Self::apply_delta(session, bank, fee).await?;
        }
        Ok(total_debit)
    }
}

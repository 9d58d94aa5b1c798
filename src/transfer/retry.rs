//! Caller-side retry for transfers
//!
//! [`TransferEngine::transfer`] never retries on its own. Callers that want
//! to ride out serialization conflicts and short outages wrap it with
//! [`transfer_with_retry`] and a [`RetryPolicy`] of their choosing. Only
//! retryable errors (`SerializationFailure`, `StoreUnavailable`) are retried;
//! every attempt re-reads the balances from scratch. After `StoreUnavailable`
//! the session is reconnected before the next attempt, since its connection
//! may be dead.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::engine::TransferEngine;
use super::types::{TransferReceipt, TransferRequest};
use crate::error::LedgerError;
use crate::session::Session;
use crate::store::LedgerStore;

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Add up to 50% random delay on top of each backoff
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before attempt `failed_attempts + 1`, without jitter:
    /// `initial * multiplier^(failed_attempts - 1)`, capped at `max`.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_backoff_ms as f64).max(0.0)
        } else {
            self.max_backoff_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    fn delay(&self, failed_attempts: u32) -> Duration {
        let base = self.backoff(failed_attempts);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let spread = base.as_millis() as u64 / 2;
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

/// Run `engine.transfer` until it succeeds, fails terminally, or the policy
/// runs out of attempts. Returns the last error in the latter cases.
///
/// `store` must be the store `session` was opened on; it is used to replace
/// the session's connection after a `StoreUnavailable` failure.
pub async fn transfer_with_retry(
    engine: &TransferEngine,
    store: &dyn LedgerStore,
    session: &mut Session,
    request: &TransferRequest,
    policy: &RetryPolicy,
) -> Result<TransferReceipt, LedgerError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    let mut reconnect = false;

    loop {
        let result = if reconnect {
            match session.reconnect(store).await {
                Ok(()) => engine.transfer(session, request).await,
                Err(e) => Err(e),
            }
        } else {
            engine.transfer(session, request).await
        };

        match result {
            Ok(mut receipt) => {
                receipt.attempts = attempt;
                if attempt > 1 {
                    debug!(attempt, src = request.src, dst = request.dst, "Transfer succeeded after retry");
                }
                return Ok(receipt);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying transfer"
                );
                reconnect = matches!(e, LedgerError::StoreUnavailable(_));
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::store::{IsolationLevel, MemoryLedgerStore};
    use rust_decimal::Decimal;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            multiplier: 2.0,
            jitter: false,
        }
    }

    async fn session(store: &MemoryLedgerStore) -> Session {
        Session::connect_with(
            store,
            SessionConfig {
                isolation: IsolationLevel::Serializable,
                ..SessionConfig::default()
            },
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(5), Duration::from_millis(100));
        assert_eq!(policy.backoff(500), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_half() {
        let policy = RetryPolicy {
            initial_backoff_ms: 100,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let d = policy.delay(1);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_transient_outage_is_retried() {
        let store = MemoryLedgerStore::with_accounts([
            (0, Decimal::ZERO),
            (1, Decimal::new(100, 0)),
            (2, Decimal::ZERO),
        ]);
        let mut s = session(&store).await;
        // the third statement of the first attempt (bank lookup) fails
        store.fail_after_statements(2);

        let receipt = transfer_with_retry(
            &TransferEngine::default(),
            &store,
            &mut s,
            &TransferRequest::new(1, 2, Decimal::new(10, 0), Decimal::new(1, 1)),
            &quick(),
        )
        .await
        .unwrap();

        assert_eq!(receipt.attempts, 2);
        assert_eq!(store.balance(1), Some(Decimal::new(89, 0)));
        assert_eq!(store.balance(0), Some(Decimal::new(1, 0)));
    }

    #[tokio::test]
    async fn test_dropped_connection_is_replaced() {
        let store = MemoryLedgerStore::with_accounts([
            (0, Decimal::ZERO),
            (1, Decimal::new(100, 0)),
            (2, Decimal::ZERO),
        ]);
        let mut s = session(&store).await;
        // the src debit of the first attempt kills the connection for good
        store.sever_after_statements(3);

        let receipt = transfer_with_retry(
            &TransferEngine::default(),
            &store,
            &mut s,
            &TransferRequest::new(1, 2, Decimal::new(10, 0), Decimal::new(1, 1)),
            &quick(),
        )
        .await
        .unwrap();

        assert_eq!(receipt.attempts, 2);
        assert_eq!(store.balance(1), Some(Decimal::new(89, 0)));
        assert_eq!(store.balance(2), Some(Decimal::new(10, 0)));
        assert_eq!(store.balance(0), Some(Decimal::new(1, 0)));
        assert_eq!(s.isolation(), IsolationLevel::Serializable);
    }

    #[tokio::test]
    async fn test_dead_connection_without_reconnect_never_recovers() {
        let store = MemoryLedgerStore::with_accounts([
            (0, Decimal::ZERO),
            (1, Decimal::new(100, 0)),
            (2, Decimal::ZERO),
        ]);
        let mut s = session(&store).await;
        store.sever_connections();
        let engine = TransferEngine::default();
        let request = TransferRequest::new(1, 2, Decimal::ONE, Decimal::ZERO);

        for _ in 0..3 {
            let err = engine.transfer(&mut s, &request).await.unwrap_err();
            assert!(matches!(err, LedgerError::StoreUnavailable(_)));
        }
        let receipt = transfer_with_retry(&engine, &store, &mut s, &request, &quick())
            .await
            .unwrap();
        assert_eq!(receipt.attempts, 2);
        assert_eq!(store.balance(2), Some(Decimal::ONE));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let store = MemoryLedgerStore::with_accounts([(1, Decimal::new(100, 0))]);
        let mut s = session(&store).await;
        store.set_available(false);

        let err = transfer_with_retry(
            &TransferEngine::default(),
            &store,
            &mut s,
            &TransferRequest::new(1, 2, Decimal::ONE, Decimal::ZERO),
            &quick(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_terminal_errors_are_not_retried() {
        let store = MemoryLedgerStore::with_accounts([(1, Decimal::new(100, 0))]);
        let mut s = session(&store).await;

        let err = transfer_with_retry(
            &TransferEngine::default(),
            &store,
            &mut s,
            &TransferRequest::new(1, 7, Decimal::ONE, Decimal::ZERO),
            &quick(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(7)));
    }

    #[test]
    fn test_no_retry_policy() {
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }
}

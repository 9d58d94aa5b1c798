//! Transfer request and receipt

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::AccountId;
use crate::error::LedgerError;
use crate::money::{self, MoneyError};

/// Move `amount` from `src` to `dst`, charging `round(amount * fee_rate, 2)`
/// to `src` on top and crediting it to the bank account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub src: AccountId,
    pub dst: AccountId,
    pub amount: Decimal,
    pub fee_rate: Decimal,
}

impl TransferRequest {
    pub fn new(src: AccountId, dst: AccountId, amount: Decimal, fee_rate: Decimal) -> Self {
        Self {
            src,
            dst,
            amount,
            fee_rate,
        }
    }

    /// Check the request shape and return the rounded fee.
    ///
    /// Fails with `InvalidArgument` unless `amount > 0` (at most cent
    /// precision) and `0 <= fee_rate <= 1`.
    pub fn validate(&self) -> Result<Decimal, LedgerError> {
        money::validate_amount(self.amount)?;
        money::validate_fee_rate(self.fee_rate)?;
        Ok(money::compute_fee(self.amount, self.fee_rate)?)
    }

    /// Amount plus fee, the total debited from `src`
    pub fn total_debit(&self, fee: Decimal) -> Result<Decimal, LedgerError> {
        Ok(self
            .amount
            .checked_add(fee)
            .ok_or(MoneyError::Overflow)?)
    }
}

/// Outcome of a committed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub request: TransferRequest,
    pub fee: Decimal,
    pub total_debit: Decimal,
    /// Attempts used, including the successful one
    pub attempts: u32,
    pub committed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_validate_returns_rounded_fee() {
        let req = TransferRequest::new(1, 2, dec("100"), dec("0.01"));
        assert_eq!(req.validate().unwrap(), dec("1.00"));
        assert_eq!(req.total_debit(dec("1.00")).unwrap(), dec("101.00"));
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let bad = [
            TransferRequest::new(1, 2, dec("0"), dec("0.01")),
            TransferRequest::new(1, 2, dec("-5"), dec("0.01")),
            TransferRequest::new(1, 2, dec("1.001"), dec("0.01")),
            TransferRequest::new(1, 2, dec("10"), dec("-0.1")),
            TransferRequest::new(1, 2, dec("10"), dec("1.5")),
        ];
        for req in bad {
            assert!(
                matches!(req.validate(), Err(LedgerError::InvalidArgument(_))),
                "{req:?}"
            );
        }
    }

    #[test]
    fn test_request_serializes_amounts_as_strings() {
        let req = TransferRequest::new(1, 2, dec("100.50"), dec("0.01"));
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"src":1,"dst":2,"amount":"100.50","fee_rate":"0.01"}"#
        );
    }
}

//! Account administration
//!
//! Opening accounts, listing them and checking total funds. Used by the CLI
//! and by tests to set up and audit a ledger.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::core_types::{AccountId, BANK_ACCOUNT_ID};
use crate::error::LedgerError;
use crate::money;
use crate::session::Session;
use crate::store::Account;

/// Accounts used by the demo and the worked examples:
/// the bank plus three customers.
pub fn demo_accounts() -> Vec<(AccountId, Decimal)> {
    vec![
        (BANK_ACCOUNT_ID, Decimal::new(0, 2)),
        (1, Decimal::new(200000, 2)),
        (2, Decimal::new(52000, 2)),
        (5, Decimal::new(240000, 2)),
    ]
}

/// Create one account. Fails with `InvalidArgument` for a negative or
/// sub-cent opening balance.
pub async fn open_account(
    session: &mut Session,
    id: AccountId,
    balance: Decimal,
) -> Result<(), LedgerError> {
    let balance = money::validate_balance(balance)?;
    session.insert_account(id, balance).await?;
    info!(account = id, balance = %balance, "Account opened");
    Ok(())
}

/// Create every missing account in one transaction; existing ids are left
/// untouched. Returns the number of accounts created.
pub async fn seed_accounts(
    session: &mut Session,
    accounts: &[(AccountId, Decimal)],
) -> Result<usize, LedgerError> {
    session.begin().await?;
    match create_missing(session, accounts).await {
        Ok(created) => {
            session.commit().await?;
            Ok(created)
        }
        Err(e) => {
            if let Err(rb) = session.rollback().await {
                warn!(error = %rb, "Rollback after failed seeding failed");
            }
            Err(e)
        }
    }
}

async fn create_missing(
    session: &mut Session,
    accounts: &[(AccountId, Decimal)],
) -> Result<usize, LedgerError> {
    let mut created = 0;
    for &(id, balance) in accounts {
        if session.fetch_account(id).await?.is_none() {
            open_account(session, id, balance).await?;
            created += 1;
        }
    }
    Ok(created)
}

/// All accounts ordered by id.
///
/// With autocommit off the read opens a transaction and leaves it open, so
/// a following `TransferEngine::transfer` on the same session fails with
/// `TransactionAlreadyActive` until the caller commits or rolls back. Audit
/// from an autocommit session to avoid that.
pub async fn list_accounts(session: &mut Session) -> Result<Vec<Account>, LedgerError> {
    session.fetch_all_accounts().await
}

/// Sum of all balances. Transfers never change it.
///
/// Leaves a transaction open on a non-autocommit session, like
/// [`list_accounts`].
pub async fn total_funds(session: &mut Session) -> Result<Decimal, LedgerError> {
    Ok(list_accounts(session)
        .await?
        .iter()
        .map(|a| a.balance)
        .sum())
}

//! Core types used throughout the system
//!
//! These are fundamental type aliases and constants shared by all modules.

/// Account ID - primary key of the `accounts` table.
///
/// # Constraints:
/// - **Immutable**: Once assigned, NEVER changes
/// - **Unique**: One row per id
pub type AccountId = i32;

/// The fee-collector account. Must exist for any transfer with a nonzero fee.
pub const BANK_ACCOUNT_ID: AccountId = 0;

/// Decimal places of the ledger currency (`numeric(p, 2)`).
pub const CURRENCY_SCALE: u32 = 2;

//! Fee-charging Transfer
//!
//! Moves funds between two accounts of the ledger and credits a fee to the
//! bank account, as one atomic transaction.
//!
//! # Phases
//!
//! ```text
//! START → VALIDATING → APPLYING → COMMITTED
//!              ↓           ↓
//!          ROLLED_BACK ◀───┘
//! ```
//!
//! # Safety Invariants
//!
//! 1. **All or Nothing**: any failure rolls back before the error is returned
//! 2. **No Overdraft**: `src` must cover `amount + fee` as read inside the transaction
//! 3. **Conservation**: the three deltas sum to zero (fee rounded before use)
//! 4. **Caller Retries**: the engine reports `SerializationFailure`; re-running is
//!    the caller's decision

pub mod engine;
pub mod retry;
pub mod state;
pub mod types;

// Re-exports for convenience
pub use engine::{EngineConfig, TransferEngine};
pub use retry::{RetryPolicy, transfer_with_retry};
pub use state::TransferPhase;
pub use types::{TransferReceipt, TransferRequest};

//! Transfer Phase Definitions
//!
//! One transfer invocation moves through these phases:
//!
//! ```text
//! START → VALIDATING → APPLYING → COMMITTED
//!              ↓           ↓
//!          ROLLED_BACK ◀───┘
//! ```

use std::fmt;

/// Phase of a single `transfer` invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferPhase {
    /// Request received, nothing checked yet
    Start,

    /// Arguments and account preconditions being checked
    Validating,

    /// The three balance adjustments being written
    Applying,

    /// Terminal: all adjustments durable
    Committed,

    /// Terminal: transaction discarded, ledger unchanged
    RolledBack,
}

impl TransferPhase {
    /// Check if this is a terminal phase (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferPhase::Committed | TransferPhase::RolledBack)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(&self, next: TransferPhase) -> bool {
        use TransferPhase::*;
        matches!(
            (self, next),
            (Start, Validating)
                | (Start, RolledBack)
                | (Validating, Applying)
                | (Validating, RolledBack)
                | (Applying, Committed)
                | (Applying, RolledBack)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::Start => "START",
            TransferPhase::Validating => "VALIDATING",
            TransferPhase::Applying => "APPLYING",
            TransferPhase::Committed => "COMMITTED",
            TransferPhase::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

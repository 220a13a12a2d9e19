use crate::domain::escrow::EscrowReference;
use crate::domain::order::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A transaction observed on the external bank feed. `external_id` is the
/// bank's own stable identifier and the dedup key for reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub external_id: String,
    pub description: String,
    pub sender: String,
    pub amount: Amount,
    pub currency: String,
    pub booked_at: DateTime<Utc>,
}

/// Terminal outcome of evaluating one bank transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileOutcome {
    /// Matched a pending escrow; funds held and the order advanced.
    Processed,
    /// Matched an escrow that was already held or released.
    AlreadyPaid,
    /// Carried a well-formed reference that matches no escrow entry.
    NoEscrowFound,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "Processed",
            Self::AlreadyPaid => "AlreadyPaid",
            Self::NoEscrowFound => "NoEscrowFound",
        }
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Idempotency-journal row. Exactly one row ever exists per external
/// transaction id; rows are immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledTransaction {
    pub external_transaction_id: String,
    pub matched_reference: Option<EscrowReference>,
    pub outcome: ReconcileOutcome,
    pub processed_at: DateTime<Utc>,
}

impl ReconciledTransaction {
    pub fn new(
        external_transaction_id: impl Into<String>,
        matched_reference: Option<EscrowReference>,
        outcome: ReconcileOutcome,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            external_transaction_id: external_transaction_id.into(),
            matched_reference,
            outcome,
            processed_at,
        }
    }
}

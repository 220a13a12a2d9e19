use crate::domain::order::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Minimum length of a cancellation reason, in characters.
pub const REASON_MIN_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequesterRole {
    Customer,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationKind {
    /// Customer withdraws from the engagement before it is delivered.
    Withdrawal,
    /// Customer disputes the delivered work.
    Complaint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Completed,
}

impl CancellationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::UnderReview => "UnderReview",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Completed => "Completed",
        }
    }

    /// Open requests block creation of another request for the same order.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::UnderReview)
    }

    pub fn can_transition(&self, to: CancellationStatus) -> bool {
        use CancellationStatus::*;
        match self {
            Pending => matches!(to, UnderReview | Approved | Rejected),
            UnderReview => matches!(to, Approved | Rejected),
            Approved => to == Completed,
            Rejected | Completed => false,
        }
    }
}

impl fmt::Display for CancellationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// A customer- or admin-initiated cancellation (Storno) request, resolved by
/// admin review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationRequest {
    pub id: Uuid,
    pub order_id: String,
    pub requested_by: RequesterRole,
    pub kind: CancellationKind,
    pub reason: String,
    pub status: CancellationStatus,
    pub refund_amount: Option<Amount>,
    pub admin_notes: Option<String>,
    pub external_refund_id: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CancellationRequest {
    pub fn new(
        order_id: impl Into<String>,
        requested_by: RequesterRole,
        kind: CancellationKind,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order_id.into(),
            requested_by,
            kind,
            reason: reason.into(),
            status: CancellationStatus::Pending,
            refund_amount: None,
            admin_notes: None,
            external_refund_id: None,
            requested_at: at,
            reviewed_at: None,
            completed_at: None,
        }
    }

    /// Customer-facing projection. Admin notes and the refund amount stay
    /// hidden until the request reaches `Completed`.
    pub fn customer_view(&self) -> CancellationView {
        let resolved = self.status == CancellationStatus::Completed;
        CancellationView {
            id: self.id,
            order_id: self.order_id.clone(),
            kind: self.kind,
            reason: self.reason.clone(),
            status: self.status,
            refund_amount: if resolved { self.refund_amount } else { None },
            admin_notes: if resolved { self.admin_notes.clone() } else { None },
            requested_at: self.requested_at,
            completed_at: self.completed_at,
        }
    }
}

/// What the requesting customer is allowed to see.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationView {
    pub id: Uuid,
    pub order_id: String,
    pub kind: CancellationKind,
    pub reason: String,
    pub status: CancellationStatus,
    pub refund_amount: Option<Amount>,
    pub admin_notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

use crate::domain::order::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutState {
    Requested,
    Settled,
    Failed,
}

impl PayoutState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "Requested",
            Self::Settled => "Settled",
            Self::Failed => "Failed",
        }
    }

    pub fn can_transition(&self, to: PayoutState) -> bool {
        matches!(
            (self, to),
            (Self::Requested, Self::Settled) | (Self::Requested, Self::Failed)
        )
    }
}

impl fmt::Display for PayoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch of completed orders claimed for one transfer to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: Uuid,
    pub provider_id: String,
    pub order_ids: Vec<String>,
    pub requested_amount: Amount,
    pub external_transfer_id: Option<String>,
    pub state: PayoutState,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PayoutRequest {
    pub fn new(
        provider_id: impl Into<String>,
        order_ids: Vec<String>,
        requested_amount: Amount,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id: provider_id.into(),
            order_ids,
            requested_amount,
            external_transfer_id: None,
            state: PayoutState::Requested,
            requested_at: at,
            resolved_at: None,
        }
    }
}

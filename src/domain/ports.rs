use crate::domain::cancellation::{CancellationRequest, CancellationStatus};
use crate::domain::escrow::{EscrowEntry, EscrowReference};
use crate::domain::order::{Amount, Order, OrderStatus, PayoutStatus};
use crate::domain::payout::{PayoutRequest, PayoutState};
use crate::domain::reconciliation::{BankTransaction, ReconciledTransaction};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Store contract for orders. Every mutation is a compare-and-swap on the
/// caller-supplied expected state; a mismatch is a `Conflict`, never a silent
/// overwrite. This is the single mechanism that keeps the reconciliation job,
/// payout requests, and admin actions from double-processing an order.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Creates the order together with its escrow entry, atomically.
    async fn create_with_escrow(&self, order: Order, entry: EscrowEntry) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Order>>;

    async fn all(&self) -> Result<Vec<Order>>;

    async fn for_provider(&self, provider_id: &str) -> Result<Vec<Order>>;

    /// CAS on `status`; also validates the transition against the adjacency
    /// table. Sets `completed_at` when `to` is `Completed`.
    async fn transition_status(
        &self,
        id: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order>;

    /// CAS on `payout_status`. Leaving `None` additionally requires the order
    /// status to be `Completed`.
    async fn transition_payout(
        &self,
        id: &str,
        from: PayoutStatus,
        to: PayoutStatus,
        at: DateTime<Utc>,
    ) -> Result<Order>;

    async fn set_payout_transfer(&self, id: &str, transfer_id: &str) -> Result<()>;
}

/// Store contract for the escrow ledger.
#[async_trait]
pub trait EscrowStore: Send + Sync {
    async fn get(&self, reference: &EscrowReference) -> Result<Option<EscrowEntry>>;

    async fn for_order(&self, order_id: &str) -> Result<Option<EscrowEntry>>;

    /// Pending → Held. Idempotent: an already-held entry is returned
    /// unchanged because the reconciliation engine may observe the same
    /// transaction twice across retries. A released entry is a `Conflict`.
    async fn mark_held(
        &self,
        reference: &EscrowReference,
        received_amount: Amount,
        sender: &str,
        at: DateTime<Utc>,
    ) -> Result<EscrowEntry>;

    /// Held → Released. Idempotent on an already-released entry; a pending
    /// entry is a `Conflict`.
    async fn mark_released(
        &self,
        reference: &EscrowReference,
        at: DateTime<Utc>,
    ) -> Result<EscrowEntry>;
}

/// The settlement effect applied together with a journal row: hold the
/// escrow and, when the order is still awaiting clearing, advance it.
#[derive(Debug, Clone)]
pub struct SettlementEffect {
    pub reference: EscrowReference,
    pub order_id: String,
    pub received_amount: Amount,
    pub sender: String,
    pub order_transition: Option<(OrderStatus, OrderStatus)>,
    pub at: DateTime<Utc>,
}

/// Store contract for the idempotency journal. The uniqueness of
/// `external_transaction_id` is enforced here, not in application logic.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    async fn journaled(&self, external_id: &str) -> Result<Option<ReconciledTransaction>>;

    /// Atomically writes the journal row and applies the settlement effect:
    /// both succeed or neither does. If the external id was journaled in the
    /// meantime (a racing run), the prior row is returned and nothing is
    /// applied. A failed effect precondition (escrow no longer pending, order
    /// moved) is a `Conflict` and leaves the journal untouched.
    async fn commit(
        &self,
        record: ReconciledTransaction,
        effect: Option<SettlementEffect>,
    ) -> Result<ReconciledTransaction>;

    async fn journal(&self) -> Result<Vec<ReconciledTransaction>>;
}

/// Field updates applied together with a cancellation status transition.
#[derive(Debug, Clone, Default)]
pub struct CancellationPatch {
    pub admin_notes: Option<String>,
    pub refund_amount: Option<Amount>,
    pub external_refund_id: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Store contract for cancellation requests. At most one open request per
/// order is enforced here.
#[async_trait]
pub trait CancellationStore: Send + Sync {
    /// Rejects with `DuplicateCancellation` (carrying the existing id) when
    /// an open request already exists for the order.
    async fn insert_open(&self, request: CancellationRequest) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<CancellationRequest>>;

    async fn for_order(&self, order_id: &str) -> Result<Vec<CancellationRequest>>;

    /// CAS on `status`, validated against the review state machine; `patch`
    /// is applied together with the transition.
    async fn transition(
        &self,
        id: Uuid,
        from: CancellationStatus,
        to: CancellationStatus,
        patch: CancellationPatch,
    ) -> Result<CancellationRequest>;
}

/// Store contract for payout requests.
#[async_trait]
pub trait PayoutStore: Send + Sync {
    async fn insert(&self, request: PayoutRequest) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<PayoutRequest>>;

    async fn transition(
        &self,
        id: Uuid,
        from: PayoutState,
        to: PayoutState,
        at: DateTime<Utc>,
    ) -> Result<PayoutRequest>;

    async fn set_transfer(&self, id: Uuid, transfer_id: &str) -> Result<()>;
}

/// External bank-feed collaborator. A malformed response must surface as an
/// error for the whole fetch, never as a partial list.
#[async_trait]
pub trait BankFeed: Send + Sync {
    async fn recent_transactions(&self) -> Result<Vec<BankTransaction>>;
}

/// External payment-processor collaborator. Both calls are idempotent given
/// the caller-supplied idempotency key, so a retried request can never
/// duplicate a financial side effect.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn send_transfer(
        &self,
        provider_id: &str,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<String>;

    async fn send_refund(
        &self,
        order_id: &str,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<String>;
}

pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type EscrowStoreRef = Arc<dyn EscrowStore>;
pub type ReconciliationStoreRef = Arc<dyn ReconciliationStore>;
pub type CancellationStoreRef = Arc<dyn CancellationStore>;
pub type PayoutStoreRef = Arc<dyn PayoutStore>;
pub type BankFeedRef = Arc<dyn BankFeed>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;

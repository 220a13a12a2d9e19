use crate::domain::cancellation::{CancellationRequest, CancellationStatus};
use crate::domain::escrow::{EscrowEntry, EscrowReference, EscrowStatus};
use crate::domain::order::{Amount, Order, OrderStatus, PayoutStatus};
use crate::domain::payout::{PayoutRequest, PayoutState};
use crate::domain::ports::{
    CancellationPatch, CancellationStore, EscrowStore, OrderStore, PayoutStore,
    ReconciliationStore, SettlementEffect,
};
use crate::domain::reconciliation::ReconciledTransaction;
use crate::error::{EscrowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    orders: HashMap<String, Order>,
    escrows: HashMap<EscrowReference, EscrowEntry>,
    escrow_by_order: HashMap<String, EscrowReference>,
    journal: HashMap<String, ReconciledTransaction>,
    cancellations: HashMap<Uuid, CancellationRequest>,
    payouts: HashMap<Uuid, PayoutRequest>,
}

/// Thread-safe in-memory store implementing every store port over a single
/// `Arc<RwLock<_>>`. One write-lock critical section per operation is what
/// makes the reconciliation commit (journal + ledger + order) atomic.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create_with_escrow(&self, order: Order, entry: EscrowEntry) -> Result<()> {
        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.id) {
            return Err(EscrowError::conflict("order", order.id.as_str(), "absent", "present"));
        }
        if state.escrows.contains_key(&entry.reference) {
            return Err(EscrowError::conflict(
                "escrow",
                entry.reference.as_str(),
                "absent",
                "present",
            ));
        }
        state
            .escrow_by_order
            .insert(entry.order_id.clone(), entry.reference.clone());
        state.escrows.insert(entry.reference.clone(), entry);
        state.orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.get(id).cloned())
    }

    async fn all(&self) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.values().cloned().collect())
    }

    async fn for_provider(&self, provider_id: &str) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.provider_id == provider_id)
            .cloned()
            .collect())
    }

    async fn transition_status(
        &self,
        id: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(id)
            .ok_or_else(|| EscrowError::not_found("order", id))?;
        order.ensure_status_transition(from, to)?;
        order.apply_status(to, at);
        Ok(order.clone())
    }

    async fn transition_payout(
        &self,
        id: &str,
        from: PayoutStatus,
        to: PayoutStatus,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(id)
            .ok_or_else(|| EscrowError::not_found("order", id))?;
        order.ensure_payout_transition(from, to)?;
        order.apply_payout(to, at);
        Ok(order.clone())
    }

    async fn set_payout_transfer(&self, id: &str, transfer_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(id)
            .ok_or_else(|| EscrowError::not_found("order", id))?;
        order.payout_transfer_id = Some(transfer_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl EscrowStore for InMemoryStore {
    async fn get(&self, reference: &EscrowReference) -> Result<Option<EscrowEntry>> {
        let state = self.state.read().await;
        Ok(state.escrows.get(reference).cloned())
    }

    async fn for_order(&self, order_id: &str) -> Result<Option<EscrowEntry>> {
        let state = self.state.read().await;
        Ok(state
            .escrow_by_order
            .get(order_id)
            .and_then(|r| state.escrows.get(r))
            .cloned())
    }

    async fn mark_held(
        &self,
        reference: &EscrowReference,
        received_amount: Amount,
        sender: &str,
        at: DateTime<Utc>,
    ) -> Result<EscrowEntry> {
        let mut state = self.state.write().await;
        let entry = state
            .escrows
            .get_mut(reference)
            .ok_or_else(|| EscrowError::not_found("escrow", reference.as_str()))?;
        match entry.status {
            EscrowStatus::Pending => {
                entry.hold(received_amount, sender, at);
                Ok(entry.clone())
            }
            EscrowStatus::Held => Ok(entry.clone()),
            EscrowStatus::Released => Err(EscrowError::conflict(
                "escrow",
                reference.as_str(),
                EscrowStatus::Pending,
                entry.status,
            )),
        }
    }

    async fn mark_released(
        &self,
        reference: &EscrowReference,
        at: DateTime<Utc>,
    ) -> Result<EscrowEntry> {
        let mut state = self.state.write().await;
        let entry = state
            .escrows
            .get_mut(reference)
            .ok_or_else(|| EscrowError::not_found("escrow", reference.as_str()))?;
        match entry.status {
            EscrowStatus::Held => {
                entry.release(at);
                Ok(entry.clone())
            }
            EscrowStatus::Released => Ok(entry.clone()),
            EscrowStatus::Pending => Err(EscrowError::conflict(
                "escrow",
                reference.as_str(),
                EscrowStatus::Held,
                entry.status,
            )),
        }
    }
}

#[async_trait]
impl ReconciliationStore for InMemoryStore {
    async fn journaled(&self, external_id: &str) -> Result<Option<ReconciledTransaction>> {
        let state = self.state.read().await;
        Ok(state.journal.get(external_id).cloned())
    }

    async fn commit(
        &self,
        record: ReconciledTransaction,
        effect: Option<SettlementEffect>,
    ) -> Result<ReconciledTransaction> {
        let mut state = self.state.write().await;

        // First successful application wins; a racing run's row is final.
        if let Some(existing) = state.journal.get(&record.external_transaction_id) {
            return Ok(existing.clone());
        }

        if let Some(effect) = &effect {
            // Validate every precondition before mutating anything.
            let entry = state.escrows.get(&effect.reference).ok_or_else(|| {
                EscrowError::not_found("escrow", effect.reference.as_str())
            })?;
            if entry.status != EscrowStatus::Pending {
                return Err(EscrowError::conflict(
                    "escrow",
                    effect.reference.as_str(),
                    EscrowStatus::Pending,
                    entry.status,
                ));
            }
            if let Some((from, to)) = effect.order_transition {
                let order = state
                    .orders
                    .get(&effect.order_id)
                    .ok_or_else(|| EscrowError::not_found("order", effect.order_id.as_str()))?;
                order.ensure_status_transition(from, to)?;
            }

            let entry = state
                .escrows
                .get_mut(&effect.reference)
                .expect("escrow entry checked above");
            entry.hold(effect.received_amount, &effect.sender, effect.at);
            if let Some((_, to)) = effect.order_transition {
                let order = state
                    .orders
                    .get_mut(&effect.order_id)
                    .expect("order checked above");
                order.apply_status(to, effect.at);
            }
        }

        state
            .journal
            .insert(record.external_transaction_id.clone(), record.clone());
        Ok(record)
    }

    async fn journal(&self) -> Result<Vec<ReconciledTransaction>> {
        let state = self.state.read().await;
        Ok(state.journal.values().cloned().collect())
    }
}

#[async_trait]
impl CancellationStore for InMemoryStore {
    async fn insert_open(&self, request: CancellationRequest) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .cancellations
            .values()
            .find(|r| r.order_id == request.order_id && r.status.is_open())
        {
            return Err(EscrowError::DuplicateCancellation {
                order_id: request.order_id.clone(),
                existing_id: existing.id.to_string(),
            });
        }
        state.cancellations.insert(request.id, request);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<CancellationRequest>> {
        let state = self.state.read().await;
        Ok(state.cancellations.get(&id).cloned())
    }

    async fn for_order(&self, order_id: &str) -> Result<Vec<CancellationRequest>> {
        let state = self.state.read().await;
        let mut requests: Vec<_> = state
            .cancellations
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.requested_at);
        Ok(requests)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: CancellationStatus,
        to: CancellationStatus,
        patch: CancellationPatch,
    ) -> Result<CancellationRequest> {
        let mut state = self.state.write().await;
        let request = state
            .cancellations
            .get_mut(&id)
            .ok_or_else(|| EscrowError::not_found("cancellation", id.to_string()))?;
        if !from.can_transition(to) {
            return Err(EscrowError::Validation(format!(
                "cancellation transition {from} -> {to} is not allowed"
            )));
        }
        if request.status != from {
            return Err(EscrowError::conflict(
                "cancellation",
                id.to_string(),
                from,
                request.status,
            ));
        }
        request.status = to;
        if let Some(notes) = patch.admin_notes {
            request.admin_notes = Some(notes);
        }
        if let Some(amount) = patch.refund_amount {
            request.refund_amount = Some(amount);
        }
        if let Some(refund_id) = patch.external_refund_id {
            request.external_refund_id = Some(refund_id);
        }
        if let Some(at) = patch.reviewed_at {
            request.reviewed_at = Some(at);
        }
        if let Some(at) = patch.completed_at {
            request.completed_at = Some(at);
        }
        Ok(request.clone())
    }
}

#[async_trait]
impl PayoutStore for InMemoryStore {
    async fn insert(&self, request: PayoutRequest) -> Result<()> {
        let mut state = self.state.write().await;
        state.payouts.insert(request.id, request);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PayoutRequest>> {
        let state = self.state.read().await;
        Ok(state.payouts.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: PayoutState,
        to: PayoutState,
        at: DateTime<Utc>,
    ) -> Result<PayoutRequest> {
        let mut state = self.state.write().await;
        let request = state
            .payouts
            .get_mut(&id)
            .ok_or_else(|| EscrowError::not_found("payout", id.to_string()))?;
        if !from.can_transition(to) {
            return Err(EscrowError::Validation(format!(
                "payout transition {from} -> {to} is not allowed"
            )));
        }
        if request.state != from {
            return Err(EscrowError::conflict(
                "payout",
                id.to_string(),
                from,
                request.state,
            ));
        }
        request.state = to;
        request.resolved_at = Some(at);
        Ok(request.clone())
    }

    async fn set_transfer(&self, id: Uuid, transfer_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let request = state
            .payouts
            .get_mut(&id)
            .ok_or_else(|| EscrowError::not_found("payout", id.to_string()))?;
        request.external_transfer_id = Some(transfer_id.to_string());
        Ok(())
    }
}

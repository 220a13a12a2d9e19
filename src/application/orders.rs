use crate::domain::escrow::{EscrowEntry, EscrowReference, EscrowStatus};
use crate::domain::order::{Order, OrderStatus, PaymentCapture, PayoutStatus};
use crate::domain::ports::{EscrowStore, EscrowStoreRef, OrderStore, OrderStoreRef};
use crate::error::{EscrowError, Result};
use chrono::Utc;
use serde::Serialize;

/// How many collision bumps to try when deriving a reference before giving
/// up. Collisions on 8 hex characters are rare enough that hitting this
/// limit means something else is wrong.
const REFERENCE_ATTEMPTS: u32 = 8;

/// Order intake and progression: the narrow surface the (out-of-scope)
/// checkout and marketplace UI talk to.
pub struct OrderService {
    orders: OrderStoreRef,
    escrows: EscrowStoreRef,
}

/// Status projection exposed to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderStatusView {
    pub order_id: String,
    pub status: OrderStatus,
    pub payout_status: PayoutStatus,
    pub escrow_reference: EscrowReference,
    pub escrow_status: Option<EscrowStatus>,
}

impl OrderService {
    pub fn new(orders: OrderStoreRef, escrows: EscrowStoreRef) -> Self {
        Self { orders, escrows }
    }

    /// Handles a successful payment capture: creates the order in
    /// `AwaitingClearing` together with its pending escrow entry and returns
    /// the reference code the customer puts on the bank transfer.
    pub async fn capture_payment(&self, capture: PaymentCapture) -> Result<EscrowReference> {
        let now = Utc::now();

        let mut reference = None;
        for attempt in 0..REFERENCE_ATTEMPTS {
            let candidate = EscrowReference::derive(&capture.order_id, attempt);
            if self.escrows.get(&candidate).await?.is_none() {
                reference = Some(candidate);
                break;
            }
        }
        let reference = reference.ok_or_else(|| {
            EscrowError::Internal(
                format!(
                    "no free escrow reference for order {} after {REFERENCE_ATTEMPTS} attempts",
                    capture.order_id
                )
                .into(),
            )
        })?;

        let order = Order::from_capture(&capture, reference.clone(), now)?;
        let entry = EscrowEntry::pending(capture.order_id.clone(), reference.clone());
        self.orders.create_with_escrow(order, entry).await?;

        tracing::info!(
            order_id = %capture.order_id,
            reference = %reference,
            "payment captured, awaiting clearing"
        );
        Ok(reference)
    }

    /// Provider accepts the assigned engagement.
    pub async fn accept(&self, order_id: &str) -> Result<Order> {
        self.orders
            .transition_status(
                order_id,
                OrderStatus::ProviderAssigned,
                OrderStatus::ProviderAccepted,
                Utc::now(),
            )
            .await
    }

    /// Provider starts working.
    pub async fn start_work(&self, order_id: &str) -> Result<Order> {
        self.orders
            .transition_status(
                order_id,
                OrderStatus::ProviderAccepted,
                OrderStatus::InProgress,
                Utc::now(),
            )
            .await
    }

    /// Provider reports the work as done; the customer still has to confirm.
    pub async fn provider_complete(&self, order_id: &str) -> Result<Order> {
        self.orders
            .transition_status(
                order_id,
                OrderStatus::InProgress,
                OrderStatus::ProviderCompleted,
                Utc::now(),
            )
            .await
    }

    /// Customer (or admin) confirms completion. Fixes `completed_at` and
    /// makes the net amount available for payout.
    pub async fn complete(&self, order_id: &str) -> Result<Order> {
        let now = Utc::now();
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("order", order_id))?;

        self.orders
            .transition_status(order_id, order.status, OrderStatus::Completed, now)
            .await?;
        let order = self
            .orders
            .transition_payout(
                order_id,
                PayoutStatus::None,
                PayoutStatus::AvailableForPayout,
                now,
            )
            .await?;

        tracing::info!(order_id, net = %order.net, "order completed, net amount available for payout");
        Ok(order)
    }

    /// Status projection for the UI: order status, payout status, escrow
    /// state.
    pub async fn order_status(&self, order_id: &str) -> Result<OrderStatusView> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("order", order_id))?;
        let escrow = self.escrows.for_order(order_id).await?;
        Ok(OrderStatusView {
            order_id: order.id,
            status: order.status,
            payout_status: order.payout_status,
            escrow_reference: order.escrow_reference,
            escrow_status: escrow.map(|e| e.status),
        })
    }
}

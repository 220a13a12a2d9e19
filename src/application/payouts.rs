use crate::application::{EXTERNAL_CALL_TIMEOUT, bounded};
use crate::domain::order::{Amount, Order, OrderStatus, PayoutStatus};
use crate::domain::payout::{PayoutRequest, PayoutState};
use crate::domain::ports::{
    EscrowStore, EscrowStoreRef, OrderStore, OrderStoreRef, PaymentGateway, PaymentGatewayRef,
    PayoutStore, PayoutStoreRef,
};
use crate::error::{EscrowError, Result};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

/// Net amount currently payable to a provider and the orders it comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailableBalance {
    pub provider_id: String,
    pub amount: Amount,
    pub order_ids: Vec<String>,
}

/// Computes available balances and drives the request → transfer → paid
/// lifecycle. Orders are claimed one by one via CAS, so no order can end up
/// in two concurrent payout requests.
pub struct PayoutManager {
    orders: OrderStoreRef,
    payouts: PayoutStoreRef,
    escrows: EscrowStoreRef,
    gateway: PaymentGatewayRef,
}

impl PayoutManager {
    pub fn new(
        orders: OrderStoreRef,
        payouts: PayoutStoreRef,
        escrows: EscrowStoreRef,
        gateway: PaymentGatewayRef,
    ) -> Self {
        Self {
            orders,
            payouts,
            escrows,
            gateway,
        }
    }

    async fn payable_orders(&self, provider_id: &str) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .for_provider(provider_id)
            .await?
            .into_iter()
            .filter(|o| {
                o.status == OrderStatus::Completed
                    && matches!(
                        o.payout_status,
                        PayoutStatus::None | PayoutStatus::AvailableForPayout
                    )
            })
            .collect();
        orders.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(orders)
    }

    /// Sum of net amounts over completed, not-yet-paid-out orders.
    pub async fn available_balance(&self, provider_id: &str) -> Result<AvailableBalance> {
        let orders = self.payable_orders(provider_id).await?;
        Ok(AvailableBalance {
            provider_id: provider_id.to_string(),
            amount: orders.iter().map(|o| o.net).sum(),
            order_ids: orders.into_iter().map(|o| o.id).collect(),
        })
    }

    /// Payout availability for a single order, exactly once on completion.
    pub async fn mark_available(&self, order_id: &str) -> Result<Order> {
        self.orders
            .transition_payout(
                order_id,
                PayoutStatus::None,
                PayoutStatus::AvailableForPayout,
                Utc::now(),
            )
            .await
    }

    /// Claims every currently available order for the provider into one
    /// payout request and emits the transfer instruction. A gateway failure
    /// rolls all claims back and surfaces as a retryable error; nothing is
    /// recorded as settled without external confirmation.
    pub async fn request_payout(&self, provider_id: &str) -> Result<PayoutRequest> {
        let now = Utc::now();
        let mut claimed: Vec<Order> = Vec::new();

        for order in self.payable_orders(provider_id).await? {
            let order = if order.payout_status == PayoutStatus::None {
                match self.mark_available(&order.id).await {
                    Ok(order) => order,
                    Err(EscrowError::Conflict { .. }) => continue,
                    Err(e) => {
                        self.rollback_claims(&claimed).await;
                        return Err(e);
                    }
                }
            } else {
                order
            };

            match self
                .orders
                .transition_payout(
                    &order.id,
                    PayoutStatus::AvailableForPayout,
                    PayoutStatus::PayoutRequested,
                    now,
                )
                .await
            {
                Ok(order) => claimed.push(order),
                Err(EscrowError::Conflict { .. }) => {
                    tracing::debug!(
                        order_id = %order.id,
                        "order claimed by a concurrent payout request, skipping"
                    );
                }
                Err(e) => {
                    self.rollback_claims(&claimed).await;
                    return Err(e);
                }
            }
        }

        if claimed.is_empty() {
            return Err(EscrowError::Validation(format!(
                "no funds available for payout to provider {provider_id}"
            )));
        }

        let total: Amount = claimed.iter().map(|o| o.net).sum();
        let order_ids: Vec<String> = claimed.iter().map(|o| o.id.clone()).collect();
        let request = PayoutRequest::new(provider_id, order_ids, total, now);
        if let Err(e) = self.payouts.insert(request.clone()).await {
            self.rollback_claims(&claimed).await;
            return Err(e);
        }

        match bounded(
            "payment processor",
            EXTERNAL_CALL_TIMEOUT,
            self.gateway
                .send_transfer(provider_id, total, &request.id.to_string()),
        )
        .await
        {
            Ok(transfer_id) => {
                self.payouts.set_transfer(request.id, &transfer_id).await?;
                for order in &claimed {
                    self.orders.set_payout_transfer(&order.id, &transfer_id).await?;
                }
                tracing::info!(
                    provider_id,
                    request_id = %request.id,
                    amount = %total,
                    orders = claimed.len(),
                    transfer_id = %transfer_id,
                    "payout requested"
                );
                self.payouts
                    .get(request.id)
                    .await?
                    .ok_or_else(|| EscrowError::not_found("payout", request.id.to_string()))
            }
            Err(e) => {
                tracing::warn!(
                    provider_id,
                    request_id = %request.id,
                    error = %e,
                    "transfer instruction failed, rolling back claims"
                );
                if let Err(e) = self
                    .payouts
                    .transition(request.id, PayoutState::Requested, PayoutState::Failed, now)
                    .await
                {
                    tracing::error!(request_id = %request.id, error = %e, "failed to mark payout request failed");
                }
                self.rollback_claims(&claimed).await;
                Err(EscrowError::ExternalDependency(format!(
                    "transfer instruction failed: {e}"
                )))
            }
        }
    }

    /// External confirmation that the transfer settled: member orders become
    /// `PaidOut` and their escrows are released.
    pub async fn confirm_settled(&self, request_id: Uuid) -> Result<PayoutRequest> {
        let now = Utc::now();
        let request = self
            .payouts
            .transition(request_id, PayoutState::Requested, PayoutState::Settled, now)
            .await?;

        for order_id in &request.order_ids {
            match self
                .orders
                .transition_payout(order_id, PayoutStatus::PayoutRequested, PayoutStatus::PaidOut, now)
                .await
            {
                Ok(order) => {
                    if let Err(e) = self
                        .escrows
                        .mark_released(&order.escrow_reference, now)
                        .await
                    {
                        // a payout for an escrow that was never held can only
                        // mean the order was funded out of band
                        tracing::warn!(order_id = %order_id, error = %e, "escrow not released");
                    }
                }
                Err(e) => {
                    tracing::error!(order_id = %order_id, error = %e, "failed to mark order paid out");
                }
            }
        }

        tracing::info!(request_id = %request.id, amount = %request.requested_amount, "payout settled");
        Ok(request)
    }

    /// External confirmation that the transfer failed: member orders roll
    /// back to `AvailableForPayout` for a later retry.
    pub async fn confirm_failed(&self, request_id: Uuid) -> Result<PayoutRequest> {
        let now = Utc::now();
        let request = self
            .payouts
            .transition(request_id, PayoutState::Requested, PayoutState::Failed, now)
            .await?;

        for order_id in &request.order_ids {
            if let Err(e) = self
                .orders
                .transition_payout(
                    order_id,
                    PayoutStatus::PayoutRequested,
                    PayoutStatus::AvailableForPayout,
                    now,
                )
                .await
            {
                tracing::error!(order_id = %order_id, error = %e, "failed to roll back payout claim");
            }
        }

        tracing::warn!(request_id = %request.id, "payout failed, orders available again");
        Ok(request)
    }

    async fn rollback_claims(&self, claimed: &[Order]) {
        let now = Utc::now();
        for order in claimed {
            if let Err(e) = self
                .orders
                .transition_payout(
                    &order.id,
                    PayoutStatus::PayoutRequested,
                    PayoutStatus::AvailableForPayout,
                    now,
                )
                .await
            {
                tracing::error!(order_id = %order.id, error = %e, "failed to roll back payout claim");
            }
        }
    }
}

use crate::application::{EXTERNAL_CALL_TIMEOUT, bounded};
use crate::domain::cancellation::{
    CancellationKind, CancellationRequest, CancellationStatus, CancellationView, REASON_MIN_LEN,
    RequesterRole, ReviewDecision,
};
use crate::domain::escrow::EscrowStatus;
use crate::domain::order::{Amount, OrderStatus};
use crate::domain::ports::{
    CancellationPatch, CancellationStore, CancellationStoreRef, EscrowStore, EscrowStoreRef,
    OrderStore, OrderStoreRef, PaymentGateway, PaymentGatewayRef,
};
use crate::error::{EscrowError, Result};
use chrono::Utc;
use uuid::Uuid;

/// Customer-initiated cancellation (Storno) with admin review. An approved
/// request triggers a refund instruction; only the refund confirmation
/// cancels the order.
pub struct CancellationService {
    orders: OrderStoreRef,
    escrows: EscrowStoreRef,
    cancellations: CancellationStoreRef,
    gateway: PaymentGatewayRef,
}

impl CancellationService {
    pub fn new(
        orders: OrderStoreRef,
        escrows: EscrowStoreRef,
        cancellations: CancellationStoreRef,
        gateway: PaymentGatewayRef,
    ) -> Self {
        Self {
            orders,
            escrows,
            cancellations,
            gateway,
        }
    }

    /// Opens a cancellation request. Fails closed on short reasons, orders
    /// outside the cancellable statuses, and existing open requests.
    pub async fn request_cancellation(
        &self,
        order_id: &str,
        requested_by: RequesterRole,
        kind: CancellationKind,
        reason: &str,
    ) -> Result<CancellationRequest> {
        let reason = reason.trim();
        if reason.chars().count() < REASON_MIN_LEN {
            return Err(EscrowError::Validation(format!(
                "cancellation reason must be at least {REASON_MIN_LEN} characters"
            )));
        }

        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("order", order_id))?;
        if !order.status.is_cancellable() {
            return Err(EscrowError::conflict(
                "order",
                order_id,
                "a cancellable status",
                order.status,
            ));
        }

        let request =
            CancellationRequest::new(order_id, requested_by, kind, reason, Utc::now());
        self.cancellations.insert_open(request.clone()).await?;

        tracing::info!(order_id, request_id = %request.id, ?kind, "cancellation requested");
        Ok(request)
    }

    /// Admin picks the request up for review.
    pub async fn begin_review(&self, request_id: Uuid) -> Result<CancellationRequest> {
        self.cancellations
            .transition(
                request_id,
                CancellationStatus::Pending,
                CancellationStatus::UnderReview,
                CancellationPatch::default(),
            )
            .await
    }

    /// Admin decision. Rejection is terminal. Approval sends the refund
    /// instruction first (idempotent on the request id) and only then commits
    /// the Approved state, so a gateway failure leaves the request open and
    /// retryable without ever double-refunding.
    pub async fn review(
        &self,
        request_id: Uuid,
        decision: ReviewDecision,
        admin_notes: &str,
        refund_amount: Option<Amount>,
    ) -> Result<CancellationRequest> {
        let now = Utc::now();
        let request = self
            .cancellations
            .get(request_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("cancellation", request_id.to_string()))?;
        if !request.status.is_open() {
            return Err(EscrowError::conflict(
                "cancellation",
                request_id.to_string(),
                "an open request",
                request.status,
            ));
        }

        match decision {
            ReviewDecision::Reject => {
                let rejected = self
                    .cancellations
                    .transition(
                        request_id,
                        request.status,
                        CancellationStatus::Rejected,
                        CancellationPatch {
                            admin_notes: Some(admin_notes.to_string()),
                            reviewed_at: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;
                tracing::info!(request_id = %request_id, order_id = %rejected.order_id, "cancellation rejected");
                Ok(rejected)
            }
            ReviewDecision::Approve => {
                let order = self
                    .orders
                    .get(&request.order_id)
                    .await?
                    .ok_or_else(|| EscrowError::not_found("order", request.order_id.as_str()))?;
                let refund = refund_amount.unwrap_or(order.gross);
                if refund > order.gross {
                    return Err(EscrowError::Validation(format!(
                        "refund {} exceeds gross {} on order {}",
                        refund, order.gross, order.id
                    )));
                }

                let refund_id = bounded(
                    "payment processor",
                    EXTERNAL_CALL_TIMEOUT,
                    self.gateway
                        .send_refund(&request.order_id, refund, &request_id.to_string()),
                )
                .await
                .map_err(|e| {
                    EscrowError::ExternalDependency(format!("refund instruction failed: {e}"))
                })?;

                let approved = self
                    .cancellations
                    .transition(
                        request_id,
                        request.status,
                        CancellationStatus::Approved,
                        CancellationPatch {
                            admin_notes: Some(admin_notes.to_string()),
                            refund_amount: Some(refund),
                            external_refund_id: Some(refund_id.clone()),
                            reviewed_at: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;
                tracing::info!(
                    request_id = %request_id,
                    order_id = %approved.order_id,
                    refund = %refund,
                    refund_id = %refund_id,
                    "cancellation approved, refund instructed"
                );
                Ok(approved)
            }
        }
    }

    /// External confirmation that the refund went through: cancels the order,
    /// releases a held escrow, and completes the request.
    pub async fn confirm_refund(&self, request_id: Uuid) -> Result<CancellationRequest> {
        let now = Utc::now();
        let request = self
            .cancellations
            .get(request_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("cancellation", request_id.to_string()))?;
        if request.status != CancellationStatus::Approved {
            return Err(EscrowError::conflict(
                "cancellation",
                request_id.to_string(),
                CancellationStatus::Approved,
                request.status,
            ));
        }

        let order = self
            .orders
            .get(&request.order_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("order", request.order_id.as_str()))?;
        if order.status != OrderStatus::AdminCancelled {
            self.orders
                .transition_status(&order.id, order.status, OrderStatus::AdminCancelled, now)
                .await?;
        }

        if let Some(entry) = self.escrows.for_order(&order.id).await?
            && entry.status == EscrowStatus::Held
        {
            self.escrows.mark_released(&entry.reference, now).await?;
        }

        let completed = self
            .cancellations
            .transition(
                request_id,
                CancellationStatus::Approved,
                CancellationStatus::Completed,
                CancellationPatch {
                    completed_at: Some(now),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(request_id = %request_id, order_id = %completed.order_id, "cancellation completed");
        Ok(completed)
    }

    /// Full request rows, for admin tooling.
    pub async fn requests_for_order(&self, order_id: &str) -> Result<Vec<CancellationRequest>> {
        self.cancellations.for_order(order_id).await
    }

    /// Redacted rows for the requesting customer: admin fields stay hidden
    /// until a request reaches `Completed`.
    pub async fn customer_requests_for_order(
        &self,
        order_id: &str,
    ) -> Result<Vec<CancellationView>> {
        Ok(self
            .cancellations
            .for_order(order_id)
            .await?
            .iter()
            .map(CancellationRequest::customer_view)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::support::{FailingGateway, RecordingGateway, seed_order};
    use crate::domain::ports::{EscrowStore, OrderStore, PaymentGateway};
    use crate::infrastructure::in_memory::InMemoryStore;
    use std::sync::Arc;

    fn service(
        store: &Arc<InMemoryStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> CancellationService {
        CancellationService::new(store.clone(), store.clone(), store.clone(), gateway)
    }

    async fn in_progress_order(store: &Arc<InMemoryStore>, id: &str) {
        seed_order(store, id, "prv-1", 10_000, 1_500).await;
        store
            .transition_status(
                id,
                OrderStatus::AwaitingClearing,
                OrderStatus::InProgress,
                Utc::now(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn short_reason_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        in_progress_order(&store, "ord-1").await;

        let service = service(&store, Arc::new(RecordingGateway::default()));
        let result = service
            .request_cancellation(
                "ord-1",
                RequesterRole::Customer,
                CancellationKind::Withdrawal,
                "no",
            )
            .await;
        assert!(matches!(result, Err(EscrowError::Validation(_))));
    }

    #[tokio::test]
    async fn valid_request_on_in_progress_order_is_pending() {
        let store = Arc::new(InMemoryStore::new());
        in_progress_order(&store, "ord-1").await;

        let service = service(&store, Arc::new(RecordingGateway::default()));
        let request = service
            .request_cancellation(
                "ord-1",
                RequesterRole::Customer,
                CancellationKind::Withdrawal,
                "change plans", // 12 characters, just over the minimum
            )
            .await
            .unwrap();
        assert_eq!(request.status, CancellationStatus::Pending);
    }

    #[tokio::test]
    async fn second_open_request_returns_conflict_with_existing_id() {
        let store = Arc::new(InMemoryStore::new());
        in_progress_order(&store, "ord-1").await;

        let service = service(&store, Arc::new(RecordingGateway::default()));
        let first = service
            .request_cancellation(
                "ord-1",
                RequesterRole::Customer,
                CancellationKind::Withdrawal,
                "changed plans",
            )
            .await
            .unwrap();

        let second = service
            .request_cancellation(
                "ord-1",
                RequesterRole::Customer,
                CancellationKind::Complaint,
                "also late delivery",
            )
            .await;
        match second {
            Err(EscrowError::DuplicateCancellation { existing_id, .. }) => {
                assert_eq!(existing_id, first.id.to_string());
            }
            other => panic!("expected duplicate cancellation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn completed_order_cannot_be_cancelled() {
        let store = Arc::new(InMemoryStore::new());
        in_progress_order(&store, "ord-1").await;
        store
            .transition_status("ord-1", OrderStatus::InProgress, OrderStatus::Completed, Utc::now())
            .await
            .unwrap();

        let service = service(&store, Arc::new(RecordingGateway::default()));
        let result = service
            .request_cancellation(
                "ord-1",
                RequesterRole::Customer,
                CancellationKind::Complaint,
                "work was not what I ordered",
            )
            .await;
        assert!(matches!(result, Err(EscrowError::Conflict { .. })));
    }

    #[tokio::test]
    async fn approve_and_confirm_cancels_order_and_releases_escrow() {
        let store = Arc::new(InMemoryStore::new());
        let reference = seed_order(&store, "ord-1", "prv-1", 10_000, 1_500).await;
        store
            .mark_held(&reference, Amount::new(10_000).unwrap(), "Erika", Utc::now())
            .await
            .unwrap();
        store
            .transition_status(
                "ord-1",
                OrderStatus::AwaitingClearing,
                OrderStatus::InProgress,
                Utc::now(),
            )
            .await
            .unwrap();

        let gateway = Arc::new(RecordingGateway::default());
        let service = service(&store, gateway.clone());

        let request = service
            .request_cancellation(
                "ord-1",
                RequesterRole::Customer,
                CancellationKind::Withdrawal,
                "provider never showed up",
            )
            .await
            .unwrap();

        let under_review = service.begin_review(request.id).await.unwrap();
        assert_eq!(under_review.status, CancellationStatus::UnderReview);

        let approved = service
            .review(
                request.id,
                ReviewDecision::Approve,
                "verified with the provider",
                Some(Amount::new(10_000).unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(approved.status, CancellationStatus::Approved);
        assert!(approved.external_refund_id.is_some());
        {
            let refunds = gateway.refunds.lock().unwrap();
            assert_eq!(refunds.len(), 1);
            assert_eq!(refunds[0].2, request.id.to_string());
        }

        let completed = service.confirm_refund(request.id).await.unwrap();
        assert_eq!(completed.status, CancellationStatus::Completed);

        let order = OrderStore::get(store.as_ref(), "ord-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::AdminCancelled);
        let entry = EscrowStore::get(store.as_ref(), &reference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, EscrowStatus::Released);
    }

    #[tokio::test]
    async fn rejection_is_terminal_and_order_untouched() {
        let store = Arc::new(InMemoryStore::new());
        in_progress_order(&store, "ord-1").await;

        let service = service(&store, Arc::new(RecordingGateway::default()));
        let request = service
            .request_cancellation(
                "ord-1",
                RequesterRole::Customer,
                CancellationKind::Withdrawal,
                "changed plans",
            )
            .await
            .unwrap();

        let rejected = service
            .review(request.id, ReviewDecision::Reject, "order already underway", None)
            .await
            .unwrap();
        assert_eq!(rejected.status, CancellationStatus::Rejected);

        let order = OrderStore::get(store.as_ref(), "ord-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::InProgress);

        // a rejected request no longer blocks a new one
        let again = service
            .request_cancellation(
                "ord-1",
                RequesterRole::Customer,
                CancellationKind::Complaint,
                "still unhappy with this",
            )
            .await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn gateway_failure_leaves_request_open() {
        let store = Arc::new(InMemoryStore::new());
        in_progress_order(&store, "ord-1").await;

        let service = service(&store, Arc::new(FailingGateway));
        let request = service
            .request_cancellation(
                "ord-1",
                RequesterRole::Customer,
                CancellationKind::Withdrawal,
                "provider never showed up",
            )
            .await
            .unwrap();

        let result = service
            .review(request.id, ReviewDecision::Approve, "refund in full", None)
            .await;
        assert!(matches!(result, Err(EscrowError::ExternalDependency(_))));

        // nothing committed: the request is still open and retryable
        let stored = service.requests_for_order("ord-1").await.unwrap();
        assert_eq!(stored[0].status, CancellationStatus::Pending);
        assert_eq!(stored[0].refund_amount, None);
    }

    #[tokio::test]
    async fn refund_above_gross_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        in_progress_order(&store, "ord-1").await;

        let service = service(&store, Arc::new(RecordingGateway::default()));
        let request = service
            .request_cancellation(
                "ord-1",
                RequesterRole::Customer,
                CancellationKind::Withdrawal,
                "provider never showed up",
            )
            .await
            .unwrap();

        let result = service
            .review(
                request.id,
                ReviewDecision::Approve,
                "notes",
                Some(Amount::new(20_000).unwrap()),
            )
            .await;
        assert!(matches!(result, Err(EscrowError::Validation(_))));
    }

    #[tokio::test]
    async fn customer_view_is_redacted_until_completed() {
        let store = Arc::new(InMemoryStore::new());
        in_progress_order(&store, "ord-1").await;

        let gateway = Arc::new(RecordingGateway::default());
        let service = service(&store, gateway);
        let request = service
            .request_cancellation(
                "ord-1",
                RequesterRole::Customer,
                CancellationKind::Withdrawal,
                "provider never showed up",
            )
            .await
            .unwrap();
        service
            .review(
                request.id,
                ReviewDecision::Approve,
                "goodwill refund",
                Some(Amount::new(5_000).unwrap()),
            )
            .await
            .unwrap();

        let views = service.customer_requests_for_order("ord-1").await.unwrap();
        assert_eq!(views[0].admin_notes, None);
        assert_eq!(views[0].refund_amount, None);

        service.confirm_refund(request.id).await.unwrap();
        let views = service.customer_requests_for_order("ord-1").await.unwrap();
        assert_eq!(views[0].admin_notes.as_deref(), Some("goodwill refund"));
        assert_eq!(views[0].refund_amount, Some(Amount::new(5_000).unwrap()));

        // admins always see everything
        let full = service.requests_for_order("ord-1").await.unwrap();
        assert_eq!(full[0].admin_notes.as_deref(), Some("goodwill refund"));
    }
}

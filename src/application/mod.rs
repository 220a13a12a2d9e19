//! Application layer orchestrating the storage and collaborator ports:
//! order intake and progression, the reconciliation engine, the payout
//! manager, and the cancellation workflow.

pub mod cancellations;
pub mod orders;
pub mod payouts;
pub mod reconciliation;

use crate::error::{EscrowError, Result};
use std::future::Future;
use std::time::Duration;

/// Upper bound on any single call to an external collaborator. A timed-out
/// call fails the surrounding run or request instead of being retried inline.
pub(crate) const EXTERNAL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) async fn bounded<T>(
    what: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>> + Send,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(EscrowError::ExternalDependency(format!(
            "{what} call timed out after {}s",
            limit.as_secs()
        ))),
    }
}

#[cfg(test)]
pub(crate) mod support {
    use crate::domain::escrow::{EscrowEntry, EscrowReference};
    use crate::domain::order::{Amount, Order, PaymentCapture};
    use crate::domain::ports::{BankFeed, OrderStore, PaymentGateway};
    use crate::domain::reconciliation::BankTransaction;
    use crate::error::{EscrowError, Result};
    use crate::infrastructure::in_memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    pub struct StaticFeed(pub Vec<BankTransaction>);

    #[async_trait]
    impl BankFeed for StaticFeed {
        async fn recent_transactions(&self) -> Result<Vec<BankTransaction>> {
            Ok(self.0.clone())
        }
    }

    pub struct FailingFeed;

    #[async_trait]
    impl BankFeed for FailingFeed {
        async fn recent_transactions(&self) -> Result<Vec<BankTransaction>> {
            Err(EscrowError::ExternalDependency(
                "bank feed returned a malformed response".into(),
            ))
        }
    }

    #[derive(Default)]
    pub struct RecordingGateway {
        pub transfers: Mutex<Vec<(String, Amount, String)>>,
        pub refunds: Mutex<Vec<(String, Amount, String)>>,
    }

    #[async_trait]
    impl PaymentGateway for RecordingGateway {
        async fn send_transfer(
            &self,
            provider_id: &str,
            amount: Amount,
            idempotency_key: &str,
        ) -> Result<String> {
            self.transfers.lock().unwrap().push((
                provider_id.to_string(),
                amount,
                idempotency_key.to_string(),
            ));
            Ok(format!("tr-{idempotency_key}"))
        }

        async fn send_refund(
            &self,
            order_id: &str,
            amount: Amount,
            idempotency_key: &str,
        ) -> Result<String> {
            self.refunds.lock().unwrap().push((
                order_id.to_string(),
                amount,
                idempotency_key.to_string(),
            ));
            Ok(format!("rf-{idempotency_key}"))
        }
    }

    pub struct FailingGateway;

    #[async_trait]
    impl PaymentGateway for FailingGateway {
        async fn send_transfer(&self, _: &str, _: Amount, _: &str) -> Result<String> {
            Err(EscrowError::ExternalDependency(
                "payment processor unavailable".into(),
            ))
        }

        async fn send_refund(&self, _: &str, _: Amount, _: &str) -> Result<String> {
            Err(EscrowError::ExternalDependency(
                "payment processor unavailable".into(),
            ))
        }
    }

    /// Seeds an order in `AwaitingClearing` with its pending escrow entry and
    /// returns the reference.
    pub async fn seed_order(
        store: &InMemoryStore,
        order_id: &str,
        provider_id: &str,
        gross: i64,
        platform_fee: i64,
    ) -> EscrowReference {
        let capture = PaymentCapture {
            order_id: order_id.into(),
            customer_id: "cus-1".into(),
            provider_id: provider_id.into(),
            gross,
            platform_fee,
        };
        let reference = EscrowReference::derive(order_id, 0);
        let order = Order::from_capture(&capture, reference.clone(), Utc::now()).unwrap();
        let entry = EscrowEntry::pending(order_id.to_string(), reference.clone());
        store.create_with_escrow(order, entry).await.unwrap();
        reference
    }

    pub fn transaction(external_id: &str, description: &str, amount: i64) -> BankTransaction {
        BankTransaction {
            external_id: external_id.into(),
            description: description.into(),
            sender: "Erika Musterfrau".into(),
            amount: Amount::new(amount).unwrap(),
            currency: "EUR".into(),
            booked_at: Utc::now(),
        }
    }
}

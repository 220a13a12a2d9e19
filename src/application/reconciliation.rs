use crate::application::{EXTERNAL_CALL_TIMEOUT, bounded};
use crate::domain::escrow::{EscrowStatus, extract_reference};
use crate::domain::order::OrderStatus;
use crate::domain::ports::{
    BankFeed, BankFeedRef, EscrowStore, EscrowStoreRef, OrderStore, OrderStoreRef,
    ReconciliationStore, ReconciliationStoreRef, SettlementEffect,
};
use crate::domain::reconciliation::{BankTransaction, ReconcileOutcome, ReconciledTransaction};
use crate::error::{EscrowError, Result};
use chrono::Utc;
use serde::Serialize;

/// How often a single transaction's commit is re-derived after losing a CAS
/// race before giving up on it for this run.
const COMMIT_ATTEMPTS: usize = 2;

/// Per-run counters, reported after every scheduled run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub fetched: usize,
    pub processed: usize,
    pub already_paid: usize,
    pub no_escrow: usize,
    pub replayed: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Disposition {
    /// No recognizable reference in the free text; not journaled.
    Skipped,
    /// Already journaled by an earlier run; prior outcome returned untouched.
    Replayed(ReconcileOutcome),
    /// Journaled by this run.
    Journaled(ReconcileOutcome),
}

/// Matches recent bank transactions against pending escrows and applies
/// at-most-once settlement effects.
///
/// The engine is schedule-agnostic: `run_once` is a function of the current
/// journal, ledger, and feed window. Running it again with the same feed
/// content mutates nothing.
pub struct ReconciliationEngine {
    feed: BankFeedRef,
    orders: OrderStoreRef,
    escrows: EscrowStoreRef,
    journal: ReconciliationStoreRef,
}

impl ReconciliationEngine {
    pub fn new(
        feed: BankFeedRef,
        orders: OrderStoreRef,
        escrows: EscrowStoreRef,
        journal: ReconciliationStoreRef,
    ) -> Self {
        Self {
            feed,
            orders,
            escrows,
            journal,
        }
    }

    /// One reconciliation pass. A feed failure aborts the whole run; a
    /// failure on one transaction is logged and does not block its siblings.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let transactions = self.fetch_window().await?;
        let mut summary = RunSummary {
            fetched: transactions.len(),
            ..Default::default()
        };

        for tx in &transactions {
            match self.evaluate(tx).await {
                Ok(Disposition::Skipped) => summary.skipped += 1,
                Ok(Disposition::Replayed(_)) => summary.replayed += 1,
                Ok(Disposition::Journaled(outcome)) => match outcome {
                    ReconcileOutcome::Processed => summary.processed += 1,
                    ReconcileOutcome::AlreadyPaid => summary.already_paid += 1,
                    ReconcileOutcome::NoEscrowFound => summary.no_escrow += 1,
                },
                Err(e) => {
                    tracing::warn!(
                        external_id = %tx.external_id,
                        error = %e,
                        "transaction failed, continuing with the rest of the batch"
                    );
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            fetched = summary.fetched,
            processed = summary.processed,
            already_paid = summary.already_paid,
            no_escrow = summary.no_escrow,
            replayed = summary.replayed,
            skipped = summary.skipped,
            failed = summary.failed,
            "reconciliation run finished"
        );
        Ok(summary)
    }

    /// Bounded fetch with a single non-doubling retry. Any failure here is a
    /// hard failure for the run, never a partial apply.
    async fn fetch_window(&self) -> Result<Vec<BankTransaction>> {
        match bounded(
            "bank feed",
            EXTERNAL_CALL_TIMEOUT,
            self.feed.recent_transactions(),
        )
        .await
        {
            Ok(transactions) => Ok(transactions),
            Err(first) => {
                tracing::warn!(error = %first, "bank feed fetch failed, retrying once");
                bounded(
                    "bank feed",
                    EXTERNAL_CALL_TIMEOUT,
                    self.feed.recent_transactions(),
                )
                .await
            }
        }
    }

    async fn evaluate(&self, tx: &BankTransaction) -> Result<Disposition> {
        let Some(reference) = extract_reference(&tx.description) else {
            tracing::debug!(external_id = %tx.external_id, "no reference in description, skipping");
            return Ok(Disposition::Skipped);
        };

        for _ in 0..COMMIT_ATTEMPTS {
            // Idempotency gate: the journal is the sole defense against the
            // feed re-delivering the same transaction on a retried run.
            if let Some(row) = self.journal.journaled(&tx.external_id).await? {
                tracing::debug!(
                    external_id = %tx.external_id,
                    outcome = %row.outcome,
                    "already journaled, returning prior outcome"
                );
                return Ok(Disposition::Replayed(row.outcome));
            }

            let now = Utc::now();
            let attempt = match self.escrows.get(&reference).await? {
                None => {
                    tracing::info!(
                        external_id = %tx.external_id,
                        reference = %reference,
                        "no escrow entry for reference, flagging for manual follow-up"
                    );
                    self.journal
                        .commit(
                            ReconciledTransaction::new(
                                tx.external_id.clone(),
                                Some(reference.clone()),
                                ReconcileOutcome::NoEscrowFound,
                                now,
                            ),
                            None,
                        )
                        .await
                }
                Some(entry) if entry.status != EscrowStatus::Pending => {
                    self.journal
                        .commit(
                            ReconciledTransaction::new(
                                tx.external_id.clone(),
                                Some(reference.clone()),
                                ReconcileOutcome::AlreadyPaid,
                                now,
                            ),
                            None,
                        )
                        .await
                }
                Some(entry) => {
                    let order = self
                        .orders
                        .get(&entry.order_id)
                        .await?
                        .ok_or_else(|| EscrowError::not_found("order", entry.order_id.as_str()))?;
                    let order_transition = (order.status == OrderStatus::AwaitingClearing)
                        .then_some((OrderStatus::AwaitingClearing, OrderStatus::ProviderAssigned));
                    let effect = SettlementEffect {
                        reference: reference.clone(),
                        order_id: entry.order_id.clone(),
                        received_amount: tx.amount,
                        sender: tx.sender.clone(),
                        order_transition,
                        at: now,
                    };
                    self.journal
                        .commit(
                            ReconciledTransaction::new(
                                tx.external_id.clone(),
                                Some(reference.clone()),
                                ReconcileOutcome::Processed,
                                now,
                            ),
                            Some(effect),
                        )
                        .await
                }
            };

            match attempt {
                Ok(row) => {
                    tracing::info!(
                        external_id = %tx.external_id,
                        reference = %reference,
                        outcome = %row.outcome,
                        "transaction journaled"
                    );
                    return Ok(Disposition::Journaled(row.outcome));
                }
                // Lost a race against another run or an admin action: the
                // preconditions no longer hold. Re-derive the outcome from
                // fresh state.
                Err(EscrowError::Conflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(EscrowError::conflict(
            "transaction",
            tx.external_id.as_str(),
            "a stable escrow state",
            "concurrent mutation",
        ))
    }
}

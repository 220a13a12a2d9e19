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
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for orders.
pub const CF_ORDERS: &str = "orders";
/// Column Family for escrow ledger entries, keyed by reference code.
pub const CF_ESCROWS: &str = "escrows";
/// Column Family for the idempotency journal, keyed by external transaction id.
pub const CF_JOURNAL: &str = "journal";
/// Column Family for cancellation requests.
pub const CF_CANCELLATIONS: &str = "cancellations";
/// Column Family for payout requests.
pub const CF_PAYOUTS: &str = "payouts";

/// Persistent store implementation using RocksDB, one column family per
/// record type with JSON-encoded values.
///
/// RocksDB has no native compare-and-swap, so every read-modify-write runs
/// under a process-wide mutex and multi-record commits go through a single
/// `WriteBatch`. `Clone` shares the underlying `Arc<DB>` and the lock.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at the specified path, ensuring
    /// all required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [
            CF_ORDERS,
            CF_ESCROWS,
            CF_JOURNAL,
            CF_CANCELLATIONS,
            CF_PAYOUTS,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            EscrowError::Internal(
                format!("column family {name} not found").into(),
            )
        })
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.cf(cf)?;
        match self.db.get_cf(handle, key)? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| EscrowError::Internal(Box::new(e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let handle = self.cf(cf)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(handle, rocksdb::IteratorMode::Start) {
            let (_key, bytes) = item?;
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| EscrowError::Internal(Box::new(e)))?;
            values.push(value);
        }
        Ok(values)
    }

    fn put<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let handle = self.cf(cf)?;
        let bytes = serde_json::to_vec(value).map_err(|e| EscrowError::Internal(Box::new(e)))?;
        self.db.put_cf(handle, key, bytes)?;
        Ok(())
    }

    fn batch_put<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let handle = self.cf(cf)?;
        let bytes = serde_json::to_vec(value).map_err(|e| EscrowError::Internal(Box::new(e)))?;
        batch.put_cf(handle, key, bytes);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for RocksDbStore {
    async fn create_with_escrow(&self, order: Order, entry: EscrowEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self
            .read::<Order>(CF_ORDERS, order.id.as_bytes())?
            .is_some()
        {
            return Err(EscrowError::conflict("order", order.id.as_str(), "absent", "present"));
        }
        if self
            .read::<EscrowEntry>(CF_ESCROWS, entry.reference.as_str().as_bytes())?
            .is_some()
        {
            return Err(EscrowError::conflict(
                "escrow",
                entry.reference.as_str(),
                "absent",
                "present",
            ));
        }
        let mut batch = WriteBatch::default();
        self.batch_put(&mut batch, CF_ORDERS, order.id.as_bytes(), &order)?;
        self.batch_put(
            &mut batch,
            CF_ESCROWS,
            entry.reference.as_str().as_bytes(),
            &entry,
        )?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Order>> {
        self.read(CF_ORDERS, id.as_bytes())
    }

    async fn all(&self) -> Result<Vec<Order>> {
        self.scan(CF_ORDERS)
    }

    async fn for_provider(&self, provider_id: &str) -> Result<Vec<Order>> {
        let orders: Vec<Order> = self.scan(CF_ORDERS)?;
        Ok(orders
            .into_iter()
            .filter(|o| o.provider_id == provider_id)
            .collect())
    }

    async fn transition_status(
        &self,
        id: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        let _guard = self.write_lock.lock().await;
        let mut order: Order = self
            .read(CF_ORDERS, id.as_bytes())?
            .ok_or_else(|| EscrowError::not_found("order", id))?;
        order.ensure_status_transition(from, to)?;
        order.apply_status(to, at);
        self.put(CF_ORDERS, id.as_bytes(), &order)?;
        Ok(order)
    }

    async fn transition_payout(
        &self,
        id: &str,
        from: PayoutStatus,
        to: PayoutStatus,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        let _guard = self.write_lock.lock().await;
        let mut order: Order = self
            .read(CF_ORDERS, id.as_bytes())?
            .ok_or_else(|| EscrowError::not_found("order", id))?;
        order.ensure_payout_transition(from, to)?;
        order.apply_payout(to, at);
        self.put(CF_ORDERS, id.as_bytes(), &order)?;
        Ok(order)
    }

    async fn set_payout_transfer(&self, id: &str, transfer_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut order: Order = self
            .read(CF_ORDERS, id.as_bytes())?
            .ok_or_else(|| EscrowError::not_found("order", id))?;
        order.payout_transfer_id = Some(transfer_id.to_string());
        self.put(CF_ORDERS, id.as_bytes(), &order)
    }
}

#[async_trait]
impl EscrowStore for RocksDbStore {
    async fn get(&self, reference: &EscrowReference) -> Result<Option<EscrowEntry>> {
        self.read(CF_ESCROWS, reference.as_str().as_bytes())
    }

    async fn for_order(&self, order_id: &str) -> Result<Option<EscrowEntry>> {
        let entries: Vec<EscrowEntry> = self.scan(CF_ESCROWS)?;
        Ok(entries.into_iter().find(|e| e.order_id == order_id))
    }

    async fn mark_held(
        &self,
        reference: &EscrowReference,
        received_amount: Amount,
        sender: &str,
        at: DateTime<Utc>,
    ) -> Result<EscrowEntry> {
        let _guard = self.write_lock.lock().await;
        let key = reference.as_str().as_bytes();
        let mut entry: EscrowEntry = self
            .read(CF_ESCROWS, key)?
            .ok_or_else(|| EscrowError::not_found("escrow", reference.as_str()))?;
        match entry.status {
            EscrowStatus::Pending => {
                entry.hold(received_amount, sender, at);
                self.put(CF_ESCROWS, key, &entry)?;
                Ok(entry)
            }
            EscrowStatus::Held => Ok(entry),
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
        let _guard = self.write_lock.lock().await;
        let key = reference.as_str().as_bytes();
        let mut entry: EscrowEntry = self
            .read(CF_ESCROWS, key)?
            .ok_or_else(|| EscrowError::not_found("escrow", reference.as_str()))?;
        match entry.status {
            EscrowStatus::Held => {
                entry.release(at);
                self.put(CF_ESCROWS, key, &entry)?;
                Ok(entry)
            }
            EscrowStatus::Released => Ok(entry),
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
impl ReconciliationStore for RocksDbStore {
    async fn journaled(&self, external_id: &str) -> Result<Option<ReconciledTransaction>> {
        self.read(CF_JOURNAL, external_id.as_bytes())
    }

    async fn commit(
        &self,
        record: ReconciledTransaction,
        effect: Option<SettlementEffect>,
    ) -> Result<ReconciledTransaction> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.read::<ReconciledTransaction>(
            CF_JOURNAL,
            record.external_transaction_id.as_bytes(),
        )? {
            return Ok(existing);
        }

        let mut batch = WriteBatch::default();

        if let Some(effect) = &effect {
            let key = effect.reference.as_str().as_bytes();
            let mut entry: EscrowEntry = self
                .read(CF_ESCROWS, key)?
                .ok_or_else(|| EscrowError::not_found("escrow", effect.reference.as_str()))?;
            if entry.status != EscrowStatus::Pending {
                return Err(EscrowError::conflict(
                    "escrow",
                    effect.reference.as_str(),
                    EscrowStatus::Pending,
                    entry.status,
                ));
            }
            entry.hold(effect.received_amount, &effect.sender, effect.at);
            self.batch_put(&mut batch, CF_ESCROWS, key, &entry)?;

            if let Some((from, to)) = effect.order_transition {
                let mut order: Order = self
                    .read(CF_ORDERS, effect.order_id.as_bytes())?
                    .ok_or_else(|| EscrowError::not_found("order", effect.order_id.as_str()))?;
                order.ensure_status_transition(from, to)?;
                order.apply_status(to, effect.at);
                self.batch_put(&mut batch, CF_ORDERS, effect.order_id.as_bytes(), &order)?;
            }
        }

        self.batch_put(
            &mut batch,
            CF_JOURNAL,
            record.external_transaction_id.as_bytes(),
            &record,
        )?;
        self.db.write(batch)?;
        Ok(record)
    }

    async fn journal(&self) -> Result<Vec<ReconciledTransaction>> {
        self.scan(CF_JOURNAL)
    }
}

#[async_trait]
impl CancellationStore for RocksDbStore {
    async fn insert_open(&self, request: CancellationRequest) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let existing: Vec<CancellationRequest> = self.scan(CF_CANCELLATIONS)?;
        if let Some(open) = existing
            .iter()
            .find(|r| r.order_id == request.order_id && r.status.is_open())
        {
            return Err(EscrowError::DuplicateCancellation {
                order_id: request.order_id.clone(),
                existing_id: open.id.to_string(),
            });
        }
        self.put(
            CF_CANCELLATIONS,
            request.id.to_string().as_bytes(),
            &request,
        )
    }

    async fn get(&self, id: Uuid) -> Result<Option<CancellationRequest>> {
        self.read(CF_CANCELLATIONS, id.to_string().as_bytes())
    }

    async fn for_order(&self, order_id: &str) -> Result<Vec<CancellationRequest>> {
        let mut requests: Vec<CancellationRequest> = self
            .scan(CF_CANCELLATIONS)?
            .into_iter()
            .filter(|r: &CancellationRequest| r.order_id == order_id)
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
        let _guard = self.write_lock.lock().await;
        let key = id.to_string();
        let mut request: CancellationRequest = self
            .read(CF_CANCELLATIONS, key.as_bytes())?
            .ok_or_else(|| EscrowError::not_found("cancellation", key.clone()))?;
        if !from.can_transition(to) {
            return Err(EscrowError::Validation(format!(
                "cancellation transition {from} -> {to} is not allowed"
            )));
        }
        if request.status != from {
            return Err(EscrowError::conflict(
                "cancellation",
                key,
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
        self.put(CF_CANCELLATIONS, request.id.to_string().as_bytes(), &request)?;
        Ok(request)
    }
}

#[async_trait]
impl PayoutStore for RocksDbStore {
    async fn insert(&self, request: PayoutRequest) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.put(CF_PAYOUTS, request.id.to_string().as_bytes(), &request)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PayoutRequest>> {
        self.read(CF_PAYOUTS, id.to_string().as_bytes())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: PayoutState,
        to: PayoutState,
        at: DateTime<Utc>,
    ) -> Result<PayoutRequest> {
        let _guard = self.write_lock.lock().await;
        let key = id.to_string();
        let mut request: PayoutRequest = self
            .read(CF_PAYOUTS, key.as_bytes())?
            .ok_or_else(|| EscrowError::not_found("payout", key.clone()))?;
        if !from.can_transition(to) {
            return Err(EscrowError::Validation(format!(
                "payout transition {from} -> {to} is not allowed"
            )));
        }
        if request.state != from {
            return Err(EscrowError::conflict("payout", key, from, request.state));
        }
        request.state = to;
        request.resolved_at = Some(at);
        self.put(CF_PAYOUTS, request.id.to_string().as_bytes(), &request)?;
        Ok(request)
    }

    async fn set_transfer(&self, id: Uuid, transfer_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = id.to_string();
        let mut request: PayoutRequest = self
            .read(CF_PAYOUTS, key.as_bytes())?
            .ok_or_else(|| EscrowError::not_found("payout", key.clone()))?;
        request.external_transfer_id = Some(transfer_id.to_string());
        self.put(CF_PAYOUTS, key.as_bytes(), &request)
    }
}

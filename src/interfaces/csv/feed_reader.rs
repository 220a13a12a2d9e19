use crate::domain::ports::BankFeed;
use crate::domain::order::Amount;
use crate::domain::reconciliation::BankTransaction;
use crate::error::{EscrowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;

/// One row of a bank account export. Amounts are decimal strings as banks
/// deliver them; `sender` may be missing.
#[derive(Debug, Deserialize)]
struct FeedRow {
    id: String,
    booked_at: DateTime<Utc>,
    amount: Decimal,
    currency: String,
    #[serde(default)]
    sender: String,
    description: String,
}

/// `BankFeed` adapter over a CSV account export.
///
/// The whole window is parsed before anything is returned: a single
/// malformed row fails the fetch, so a broken export can never cause a
/// partial reconciliation run. Rows with non-positive amounts are outgoing
/// transfers in the same export and are dropped.
pub struct CsvBankFeed {
    path: PathBuf,
}

impl CsvBankFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> Result<Vec<BankTransaction>> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| {
                EscrowError::ExternalDependency(format!(
                    "bank feed {} unreadable: {e}",
                    self.path.display()
                ))
            })?;

        let mut transactions = Vec::new();
        for row in reader.deserialize() {
            let row: FeedRow = row.map_err(|e| {
                EscrowError::ExternalDependency(format!("malformed bank feed row: {e}"))
            })?;
            if row.amount <= Decimal::ZERO {
                tracing::debug!(external_id = %row.id, "dropping outgoing transfer");
                continue;
            }
            let amount = Amount::from_decimal(row.amount).map_err(|e| {
                EscrowError::ExternalDependency(format!(
                    "bank feed row {} has an unusable amount: {e}",
                    row.id
                ))
            })?;
            transactions.push(BankTransaction {
                external_id: row.id,
                description: row.description,
                sender: row.sender,
                amount,
                currency: row.currency,
                booked_at: row.booked_at,
            });
        }
        Ok(transactions)
    }
}

#[async_trait]
impl BankFeed for CsvBankFeed {
    async fn recent_transactions(&self) -> Result<Vec<BankTransaction>> {
        self.read_all()
    }
}

use crate::domain::order::Order;
use crate::domain::reconciliation::ReconciledTransaction;
use crate::error::Result;
use std::io::Write;

/// Writes order states as CSV
/// (`order_id, reference, status, payout_status, gross, fee, net`, amounts in
/// minor units). Rows are sorted by order id for stable output.
pub struct OrderWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OrderWriter<W> {
    pub fn new(target: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(target),
        }
    }

    pub fn write_orders(&mut self, mut orders: Vec<Order>) -> Result<()> {
        orders.sort_by(|a, b| a.id.cmp(&b.id));
        self.writer.write_record([
            "order_id",
            "reference",
            "status",
            "payout_status",
            "gross",
            "fee",
            "net",
        ])?;
        for order in orders {
            self.writer.write_record([
                order.id.as_str(),
                order.escrow_reference.as_str(),
                order.status.as_str(),
                order.payout_status.as_str(),
                &order.gross.to_string(),
                &order.platform_fee.to_string(),
                &order.net.to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes the idempotency journal as CSV
/// (`external_transaction_id, reference, outcome, processed_at`), the
/// admin's audit surface for reconciliation outcomes.
pub struct JournalWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> JournalWriter<W> {
    pub fn new(target: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(target),
        }
    }

    pub fn write_journal(&mut self, mut rows: Vec<ReconciledTransaction>) -> Result<()> {
        rows.sort_by(|a, b| a.external_transaction_id.cmp(&b.external_transaction_id));
        self.writer.write_record([
            "external_transaction_id",
            "reference",
            "outcome",
            "processed_at",
        ])?;
        for row in rows {
            self.writer.write_record([
                row.external_transaction_id.as_str(),
                row.matched_reference
                    .as_ref()
                    .map(|r| r.as_str())
                    .unwrap_or(""),
                row.outcome.as_str(),
                &row.processed_at.to_rfc3339(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::escrow::EscrowReference;
    use crate::domain::order::PaymentCapture;
    use crate::domain::reconciliation::ReconcileOutcome;
    use chrono::Utc;

    #[test]
    fn orders_are_written_sorted_with_minor_units() {
        let make = |id: &str| {
            let capture = PaymentCapture {
                order_id: id.into(),
                customer_id: "cus-1".into(),
                provider_id: "prv-1".into(),
                gross: 10_000,
                platform_fee: 1_500,
            };
            Order::from_capture(&capture, EscrowReference::derive(id, 0), Utc::now()).unwrap()
        };

        let mut buffer = Vec::new();
        OrderWriter::new(&mut buffer)
            .write_orders(vec![make("ord-2"), make("ord-1")])
            .unwrap();

        let output = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines[0],
            "order_id,reference,status,payout_status,gross,fee,net"
        );
        assert!(lines[1].starts_with("ord-1,ESC-"));
        assert!(lines[1].ends_with(",AwaitingClearing,None,10000,1500,8500"));
        assert!(lines[2].starts_with("ord-2,ESC-"));
    }

    #[test]
    fn journal_rows_include_outcome() {
        let row = ReconciledTransaction::new(
            "bank-tx-1",
            Some(EscrowReference::parse("ESC-A1B2C3D4").unwrap()),
            ReconcileOutcome::Processed,
            Utc::now(),
        );
        let unmatched = ReconciledTransaction::new(
            "bank-tx-2",
            None,
            ReconcileOutcome::NoEscrowFound,
            Utc::now(),
        );

        let mut buffer = Vec::new();
        JournalWriter::new(&mut buffer)
            .write_journal(vec![unmatched, row])
            .unwrap();

        let output = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines[1].starts_with("bank-tx-1,ESC-A1B2C3D4,Processed,"));
        assert!(lines[2].starts_with("bank-tx-2,,NoEscrowFound,"));
    }
}

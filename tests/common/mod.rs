use std::fs::File;
use std::path::Path;

pub const FEED_HEADER: [&str; 6] = ["id", "booked_at", "amount", "currency", "sender", "description"];

/// Writes a captured-order seed CSV.
pub fn write_orders_csv(path: &Path, rows: &[(&str, &str, &str, i64, i64)]) {
    let file = File::create(path).unwrap();
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(["order_id", "customer_id", "provider_id", "gross", "platform_fee"])
        .unwrap();
    for (order_id, customer_id, provider_id, gross, fee) in rows {
        wtr.write_record([
            *order_id,
            *customer_id,
            *provider_id,
            &gross.to_string(),
            &fee.to_string(),
        ])
        .unwrap();
    }
    wtr.flush().unwrap();
}

/// Writes a bank-feed export CSV. Amounts are decimal strings.
pub fn write_feed_csv(path: &Path, rows: &[(&str, &str, &str)]) {
    let file = File::create(path).unwrap();
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(FEED_HEADER).unwrap();
    for (id, amount, description) in rows {
        wtr.write_record([
            *id,
            "2026-08-06T09:30:00Z",
            *amount,
            "EUR",
            "Erika Musterfrau",
            *description,
        ])
        .unwrap();
    }
    wtr.flush().unwrap();
}

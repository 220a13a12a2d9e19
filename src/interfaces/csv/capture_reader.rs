use crate::domain::order::PaymentCapture;
use crate::error::{EscrowError, Result};
use std::io::Read;

/// Reads payment-capture events from a CSV source
/// (`order_id, customer_id, provider_id, gross, platform_fee`, amounts in
/// minor units).
///
/// Wraps `csv::Reader` and yields one `Result` per row so a bad row can be
/// reported and skipped without losing the rest of the file.
pub struct CaptureReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CaptureReader<R> {
    /// Creates a new `CaptureReader` from any `Read` source (e.g. File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes capture events.
    pub fn captures(self) -> impl Iterator<Item = Result<PaymentCapture>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EscrowError::from))
    }
}

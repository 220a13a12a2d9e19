use crate::domain::order::Amount;
use crate::error::{EscrowError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::LazyLock;

/// Prefix shared by all escrow reference codes. Customers type the full code
/// into the free-text field of a bank transfer, so it has to be short and
/// visually distinctive.
pub const REFERENCE_PREFIX: &str = "ESC-";

const CODE_LEN: usize = 8;

static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bESC-([0-9A-Z]{8})\b").expect("reference pattern is valid")
});

/// A human-typeable escrow reference code: `ESC-` followed by eight uppercase
/// hex characters, deterministically derived from the order id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscrowReference(String);

impl EscrowReference {
    /// Derives the reference for an order. `attempt` disambiguates on the
    /// rare collision; attempt 0 is the canonical code for an order id.
    pub fn derive(order_id: &str, attempt: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(order_id.as_bytes());
        hasher.update(attempt.to_be_bytes());
        let digest = hasher.finalize();
        let code: String = digest[..CODE_LEN / 2]
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect();
        Self(format!("{REFERENCE_PREFIX}{code}"))
    }

    /// Parses and normalizes a full reference code.
    pub fn parse(raw: &str) -> Result<Self> {
        let upper = raw.trim().to_uppercase();
        let code = upper.strip_prefix(REFERENCE_PREFIX).ok_or_else(|| {
            EscrowError::Validation(format!("reference {raw} is missing the {REFERENCE_PREFIX} prefix"))
        })?;
        if code.len() != CODE_LEN || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(EscrowError::Validation(format!(
                "reference {raw} must be {REFERENCE_PREFIX} followed by {CODE_LEN} alphanumeric characters"
            )));
        }
        Ok(Self(upper))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EscrowReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extracts a candidate reference from free-text (a bank transfer's payment
/// reference line). Case-insensitive, bounded on both sides; text without a
/// recognizable code yields `None`, never an error.
pub fn extract_reference(text: &str) -> Option<EscrowReference> {
    REFERENCE_PATTERN
        .captures(text)
        .map(|caps| EscrowReference(format!("{REFERENCE_PREFIX}{}", caps[1].to_uppercase())))
}

/// Escrow hold lifecycle. Only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EscrowStatus {
    #[default]
    Pending,
    Held,
    Released,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Held => "Held",
            Self::Released => "Released",
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-order escrow record. At most one entry exists per order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowEntry {
    pub reference: EscrowReference,
    pub order_id: String,
    pub status: EscrowStatus,
    pub held_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub received_amount: Option<Amount>,
    pub sender_name: Option<String>,
}

impl EscrowEntry {
    pub fn hold(&mut self, received_amount: Amount, sender: &str, at: DateTime<Utc>) {
        self.status = EscrowStatus::Held;
        self.received_amount = Some(received_amount);
        self.sender_name = Some(sender.to_string());
        self.held_at = Some(at);
    }

    pub fn release(&mut self, at: DateTime<Utc>) {
        self.status = EscrowStatus::Released;
        self.released_at = Some(at);
    }

    pub fn pending(order_id: impl Into<String>, reference: EscrowReference) -> Self {
        Self {
            reference,
            order_id: order_id.into(),
            status: EscrowStatus::Pending,
            held_at: None,
            released_at: None,
            received_amount: None,
            sender_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_and_well_formed() {
        let a = EscrowReference::derive("ord-1001", 0);
        let b = EscrowReference::derive("ord-1001", 0);
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("ESC-"));
        assert_eq!(a.as_str().len(), 12);
        assert!(a.as_str()[4..].chars().all(|c| c.is_ascii_hexdigit()));

        // a different attempt yields a different code
        assert_ne!(a, EscrowReference::derive("ord-1001", 1));
        assert_ne!(a, EscrowReference::derive("ord-1002", 0));
    }

    #[test]
    fn extracts_reference_from_payment_text() {
        let found = extract_reference("Payment ESC-A1B2C3D4 thanks").unwrap();
        assert_eq!(found.as_str(), "ESC-A1B2C3D4");
    }

    #[test]
    fn extraction_is_case_insensitive() {
        let found = extract_reference("rechnung esc-a1b2c3d4").unwrap();
        assert_eq!(found.as_str(), "ESC-A1B2C3D4");
    }

    #[test]
    fn extraction_requires_word_boundaries() {
        // nine trailing alphanumerics: ambiguous, not a match
        assert_eq!(extract_reference("ESC-A1B2C3D4E"), None);
        // glued prefix
        assert_eq!(extract_reference("XESC-A1B2C3D4"), None);
        // trailing punctuation is fine
        assert!(extract_reference("ref: ESC-A1B2C3D4.").is_some());
    }

    #[test]
    fn extraction_skips_unrecognizable_text() {
        assert_eq!(extract_reference("Miete August"), None);
        assert_eq!(extract_reference("ESC-123"), None);
        assert_eq!(extract_reference(""), None);
    }

    #[test]
    fn parse_normalizes_case() {
        let parsed = EscrowReference::parse("esc-a1b2c3d4").unwrap();
        assert_eq!(parsed.as_str(), "ESC-A1B2C3D4");
        assert!(EscrowReference::parse("ESC-123").is_err());
        assert!(EscrowReference::parse("A1B2C3D4").is_err());
    }
}

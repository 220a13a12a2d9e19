use crate::domain::escrow::EscrowReference;
use crate::error::{EscrowError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// A monetary value in integer minor-currency units (cents).
///
/// All core arithmetic happens on integers; `rust_decimal` is only used at
/// the bank-feed boundary where amounts arrive as decimal strings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, Hash,
)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub fn new(minor_units: i64) -> Result<Self> {
        if minor_units < 0 {
            return Err(EscrowError::Validation(format!(
                "amount must not be negative, got {minor_units}"
            )));
        }
        Ok(Self(minor_units))
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }

    /// Scales a decimal currency value (e.g. "85.00") to minor units.
    /// Rejects negative values and sub-cent precision.
    pub fn from_decimal(value: Decimal) -> Result<Self> {
        let scaled = value * Decimal::from(100);
        if scaled.fract() != Decimal::ZERO {
            return Err(EscrowError::Validation(format!(
                "amount {value} has sub-cent precision"
            )));
        }
        let minor: i64 = scaled.try_into().map_err(|_| {
            EscrowError::Validation(format!("amount {value} out of range"))
        })?;
        Self::new(minor)
    }

    /// Decimal currency representation, two fraction digits.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    pub fn checked_sub(&self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).filter(|v| *v >= 0).map(Amount)
    }
}

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, a| acc + a)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order lifecycle. Transitions are checked against an explicit adjacency
/// table; `Completed` and `AdminCancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Draft,
    AwaitingClearing,
    ProviderAssigned,
    ProviderAccepted,
    InProgress,
    ProviderCompleted,
    Completed,
    AdminCancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::AwaitingClearing => "AwaitingClearing",
            Self::ProviderAssigned => "ProviderAssigned",
            Self::ProviderAccepted => "ProviderAccepted",
            Self::InProgress => "InProgress",
            Self::ProviderCompleted => "ProviderCompleted",
            Self::Completed => "Completed",
            Self::AdminCancelled => "AdminCancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::AdminCancelled)
    }

    /// Statuses the cancellation workflow accepts new requests for.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::AwaitingClearing
                | Self::ProviderAssigned
                | Self::ProviderAccepted
                | Self::InProgress
                | Self::ProviderCompleted
        )
    }

    /// The adjacency table. `AdminCancelled` is admitted from every
    /// non-terminal state but is only ever requested by the cancellation
    /// workflow.
    pub fn can_transition(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        if to == AdminCancelled {
            return !self.is_terminal();
        }
        match self {
            Draft => to == AwaitingClearing,
            AwaitingClearing => matches!(
                to,
                ProviderAssigned | ProviderAccepted | InProgress | ProviderCompleted
            ),
            ProviderAssigned => matches!(to, ProviderAccepted | Completed),
            ProviderAccepted => matches!(to, InProgress | Completed),
            InProgress => matches!(to, ProviderCompleted | Completed),
            ProviderCompleted => to == Completed,
            Completed | AdminCancelled => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payout side of the order lifecycle. Leaves `None` only while the order
/// status is `Completed`; `PayoutRequested` may roll back to
/// `AvailableForPayout` when a transfer fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PayoutStatus {
    #[default]
    None,
    AvailableForPayout,
    PayoutRequested,
    PaidOut,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::AvailableForPayout => "AvailableForPayout",
            Self::PayoutRequested => "PayoutRequested",
            Self::PaidOut => "PaidOut",
        }
    }

    pub fn can_transition(&self, to: PayoutStatus) -> bool {
        use PayoutStatus::*;
        match self {
            None => to == AvailableForPayout,
            AvailableForPayout => to == PayoutRequested,
            PayoutRequested => matches!(to, PaidOut | AvailableForPayout),
            PaidOut => false,
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound payment-capture event from the (out-of-scope) checkout flow.
/// Amounts are integer minor units.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentCapture {
    pub order_id: String,
    pub customer_id: String,
    pub provider_id: String,
    pub gross: i64,
    pub platform_fee: i64,
}

/// An engagement between a customer and a provider.
///
/// `net` is fixed at creation time (gross minus platform fee) and never
/// recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub provider_id: String,
    pub status: OrderStatus,
    pub payout_status: PayoutStatus,
    pub gross: Amount,
    pub platform_fee: Amount,
    pub net: Amount,
    pub escrow_reference: EscrowReference,
    pub payout_transfer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub payout_requested_at: Option<DateTime<Utc>>,
    pub paid_out_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Checks a status CAS: the edge must be in the adjacency table and the
    /// stored status must match the caller's expectation.
    pub fn ensure_status_transition(&self, from: OrderStatus, to: OrderStatus) -> Result<()> {
        if !from.can_transition(to) {
            return Err(EscrowError::Validation(format!(
                "order status transition {from} -> {to} is not allowed"
            )));
        }
        if self.status != from {
            return Err(EscrowError::conflict("order", self.id.as_str(), from, self.status));
        }
        Ok(())
    }

    /// Checks a payout CAS. Leaving `None` requires the order to be
    /// `Completed`.
    pub fn ensure_payout_transition(&self, from: PayoutStatus, to: PayoutStatus) -> Result<()> {
        if !from.can_transition(to) {
            return Err(EscrowError::Validation(format!(
                "payout status transition {from} -> {to} is not allowed"
            )));
        }
        if self.payout_status != from {
            return Err(EscrowError::conflict(
                "order",
                self.id.as_str(),
                from,
                self.payout_status,
            ));
        }
        if from == PayoutStatus::None && self.status != OrderStatus::Completed {
            return Err(EscrowError::conflict(
                "order",
                self.id.as_str(),
                OrderStatus::Completed,
                self.status,
            ));
        }
        Ok(())
    }

    pub fn apply_status(&mut self, to: OrderStatus, at: DateTime<Utc>) {
        self.status = to;
        if to == OrderStatus::Completed {
            self.completed_at = Some(at);
        }
    }

    pub fn apply_payout(&mut self, to: PayoutStatus, at: DateTime<Utc>) {
        self.payout_status = to;
        match to {
            PayoutStatus::PayoutRequested => self.payout_requested_at = Some(at),
            PayoutStatus::PaidOut => self.paid_out_at = Some(at),
            _ => {}
        }
    }

    /// Creates an order in `AwaitingClearing` from a capture event.
    pub fn from_capture(
        capture: &PaymentCapture,
        reference: EscrowReference,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        let gross = Amount::new(capture.gross)?;
        let fee = Amount::new(capture.platform_fee)?;
        let net = gross.checked_sub(fee).ok_or_else(|| {
            EscrowError::Validation(format!(
                "platform fee {} exceeds gross {} on order {}",
                fee, gross, capture.order_id
            ))
        })?;
        if capture.order_id.trim().is_empty() {
            return Err(EscrowError::Validation("order id must not be empty".into()));
        }
        Ok(Self {
            id: capture.order_id.clone(),
            customer_id: capture.customer_id.clone(),
            provider_id: capture.provider_id.clone(),
            status: OrderStatus::AwaitingClearing,
            payout_status: PayoutStatus::None,
            gross,
            platform_fee: fee,
            net,
            escrow_reference: reference,
            payout_transfer_id: None,
            created_at: at,
            completed_at: None,
            payout_requested_at: None,
            paid_out_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn capture(gross: i64, fee: i64) -> PaymentCapture {
        PaymentCapture {
            order_id: "ord-1".into(),
            customer_id: "cus-1".into(),
            provider_id: "prv-1".into(),
            gross,
            platform_fee: fee,
        }
    }

    #[test]
    fn net_is_gross_minus_fee() {
        let order = Order::from_capture(
            &capture(10_000, 1_500),
            EscrowReference::derive("ord-1", 0),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(order.net, Amount::new(8_500).unwrap());
        assert_eq!(order.status, OrderStatus::AwaitingClearing);
        assert_eq!(order.payout_status, PayoutStatus::None);
    }

    #[test]
    fn fee_exceeding_gross_is_rejected() {
        let result = Order::from_capture(
            &capture(1_000, 1_500),
            EscrowReference::derive("ord-1", 0),
            Utc::now(),
        );
        assert!(matches!(result, Err(EscrowError::Validation(_))));
    }

    #[test]
    fn status_adjacency() {
        use OrderStatus::*;
        assert!(Draft.can_transition(AwaitingClearing));
        assert!(AwaitingClearing.can_transition(ProviderAssigned));
        assert!(ProviderAssigned.can_transition(ProviderAccepted));
        assert!(ProviderAccepted.can_transition(InProgress));
        assert!(InProgress.can_transition(ProviderCompleted));
        assert!(ProviderCompleted.can_transition(Completed));
        assert!(InProgress.can_transition(Completed));

        assert!(!Draft.can_transition(Completed));
        assert!(!Completed.can_transition(AwaitingClearing));
        assert!(!AwaitingClearing.can_transition(Draft));
    }

    #[test]
    fn admin_cancelled_reachable_from_non_terminal_only() {
        use OrderStatus::*;
        assert!(AwaitingClearing.can_transition(AdminCancelled));
        assert!(InProgress.can_transition(AdminCancelled));
        assert!(!Completed.can_transition(AdminCancelled));
        assert!(!AdminCancelled.can_transition(AdminCancelled));
    }

    #[test]
    fn payout_adjacency() {
        use PayoutStatus::*;
        assert!(None.can_transition(AvailableForPayout));
        assert!(AvailableForPayout.can_transition(PayoutRequested));
        assert!(PayoutRequested.can_transition(PaidOut));
        assert!(PayoutRequested.can_transition(AvailableForPayout));
        assert!(!PaidOut.can_transition(AvailableForPayout));
        assert!(!None.can_transition(PaidOut));
    }

    #[test]
    fn amount_from_decimal_scales_to_minor_units() {
        assert_eq!(
            Amount::from_decimal(dec!(85.00)).unwrap(),
            Amount::new(8_500).unwrap()
        );
        assert_eq!(
            Amount::from_decimal(dec!(0.01)).unwrap(),
            Amount::new(1).unwrap()
        );
        assert!(Amount::from_decimal(dec!(1.005)).is_err());
        assert!(Amount::from_decimal(dec!(-3.00)).is_err());
    }

    #[test]
    fn amount_rejects_negative() {
        assert!(Amount::new(-1).is_err());
        assert_eq!(
            Amount::new(100).unwrap().checked_sub(Amount::new(200).unwrap()),
            None
        );
    }
}

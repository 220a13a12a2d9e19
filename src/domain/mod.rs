pub mod cancellation;
pub mod escrow;
pub mod order;
pub mod payout;
pub mod ports;
pub mod reconciliation;

//! The pay-wall checkpoint of x402-chat.
//!
//! [`SettlementGate`](paygate::SettlementGate) decides, for one priced action, whether the
//! caller has paid: it reads the `X-PAYMENT` assertion, asks a
//! [`Facilitator`](x402_chat_types::facilitator::Facilitator) to verify and settle it, and
//! answers with a [`SettlementResult`](paygate::SettlementResult). The gate never performs
//! the write being paid for; callers commit only after a `Settled` result.
//!
//! [`FacilitatorClient`](facilitator_client::FacilitatorClient) is the HTTP implementation
//! of the facilitator capability.
//!
//! ## Features
//!
//! - `telemetry`: emits `tracing` spans and events for gate decisions and facilitator calls

pub mod facilitator_client;
pub mod paygate;

pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
pub use paygate::{
    PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER, PaidResource, PaymentReceipt, PaymentRejection,
    SettlementError, SettlementGate, SettlementResult,
};

//! Core types for x402-chat.
//!
//! This crate holds everything that describes *what* is being paid for and *how*
//! the payment travels, without any HTTP or storage machinery:
//!
//! - [`proto`] - x402 protocol version 1 wire format (payment payloads, requirements,
//!   the 402 response body, facilitator verify/settle messages)
//! - [`facilitator`] - the [`Facilitator`](facilitator::Facilitator) trait implemented by
//!   anything able to verify and settle a payment
//! - [`chain`] - CAIP-2 chain identifiers, checksummed EVM addresses and token deployments
//! - [`networks`] - well-known networks and token deployments (USDC, CHAT)
//! - [`quote`] - [`PriceQuote`](quote::PriceQuote), the amount and asset owed for an action
//! - [`config`] - configuration helpers such as [`LiteralOrEnv`](config::LiteralOrEnv)
//! - [`util`] - base64 and human-readable money amount helpers

pub mod chain;
pub mod config;
pub mod facilitator;
pub mod networks;
pub mod proto;
pub mod quote;
pub mod util;

//! A comment wall where every post is paid for over HTTP 402.
//!
//! Visitors leave comments on the "wall" of a wallet address. The first comment on a
//! wall is free; each later one costs one more unit of the CHAT token than the last,
//! paid to the wall's owner through an x402 facilitator. CHAT itself can be bought with
//! USDC through the same pay-wall.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`airdrop`] | Batch CHAT distribution used by the `x402-chat-airdrop` tool |
//! | [`config`] | Configuration file, CLI and environment loading |
//! | [`error`] | Mapping of internal errors onto HTTP responses |
//! | [`handlers`] | HTTP endpoints |
//! | [`ledger`] | SQLite-backed store of comments and replies |
//! | [`pricing`] | Post and mint price quotes |
//! | [`revalidate`] | Read-view cache and its invalidation after writes |
//! | [`run`] | Server initialization and runtime |
//! | [`state`] | Shared request state |
//! | [`transfer`] | Transaction engine client for sending tokens |
//! | [`util`] | Telemetry and graceful shutdown |
//!
//! Payment verification lives in the `x402-chat-paygate` crate and wire types in
//! `x402-chat-types`.

pub mod airdrop;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod pricing;
pub mod revalidate;
pub mod run;
pub mod state;
pub mod transfer;
pub mod util;

//! x402 protocol wire types.
//!
//! Only protocol version 1 is spoken: networks are identified by name and the
//! payment assertion travels in the `X-PAYMENT` header.

pub mod v1;

/// The only payment scheme offered: an exact-amount token transfer.
pub const EXACT_SCHEME: &str = "exact";

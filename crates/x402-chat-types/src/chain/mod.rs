//! Chain identifiers, EVM addresses and token deployments.

mod address;
mod chain_id;
mod token;

pub use address::*;
pub use chain_id::*;
pub use token::*;

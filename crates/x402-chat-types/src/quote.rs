//! Price quotes.

use alloy_primitives::U256;
use serde::Serialize;

use crate::chain::{ChainId, ChecksummedAddress, TokenDeployment, TokenDeploymentEip712};

/// The amount owed for one priced action, in base units of `asset`.
///
/// Quotes are recomputed for every request and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    pub amount: U256,
    pub asset: TokenDeployment,
}

impl PriceQuote {
    pub fn new(amount: U256, asset: TokenDeployment) -> Self {
        Self { amount, asset }
    }

    pub fn is_free(&self) -> bool {
        self.amount.is_zero()
    }

    /// x402 v1 network name of the asset's chain.
    pub fn network(&self) -> Option<&'static str> {
        self.asset.chain.as_network_name()
    }

    /// Signing domain a client needs to build the payment message.
    pub fn signing_domain(&self) -> Option<&TokenDeploymentEip712> {
        self.asset.eip712.as_ref()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PriceQuoteWire<'a> {
    amount: String,
    asset: &'a ChecksummedAddress,
    chain: &'a ChainId,
    #[serde(skip_serializing_if = "Option::is_none")]
    network: Option<&'static str>,
    decimals: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    eip712: Option<&'a TokenDeploymentEip712>,
}

impl Serialize for PriceQuote {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        PriceQuoteWire {
            amount: self.amount.to_string(),
            asset: &self.asset.address,
            chain: &self.asset.chain,
            network: self.network(),
            decimals: self.asset.decimals,
            eip712: self.signing_domain(),
        }
        .serialize(serializer)
    }
}

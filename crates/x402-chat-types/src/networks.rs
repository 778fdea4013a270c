//! Well-known networks and token deployments.
//!
//! x402 v1 identifies networks by name (`"arbitrum"`, `"base"`), while the rest of the
//! code works with CAIP-2 [`ChainId`]s. [`KNOWN_NETWORKS`] is the translation table.
//!
//! Token deployments:
//! - [`USDC`] on Arbitrum One, Base and Polygon, accepted as payment for minting
//! - [`CHAT`], the platform token on Arbitrum One, used to pay for posts and handed out by mint

use alloy_primitives::address;

use crate::chain::{ChainId, ChecksummedAddress, EIP155_NAMESPACE, TokenDeployment, TokenDeploymentEip712};

/// A well-known network and its CAIP-2 parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: &'static str,
    pub namespace: &'static str,
    pub reference: &'static str,
}

impl NetworkInfo {
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.namespace, self.reference)
    }
}

pub static KNOWN_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "arbitrum",
        namespace: EIP155_NAMESPACE,
        reference: "42161",
    },
    NetworkInfo {
        name: "arbitrum-sepolia",
        namespace: EIP155_NAMESPACE,
        reference: "421614",
    },
    NetworkInfo {
        name: "base",
        namespace: EIP155_NAMESPACE,
        reference: "8453",
    },
    NetworkInfo {
        name: "base-sepolia",
        namespace: EIP155_NAMESPACE,
        reference: "84532",
    },
    NetworkInfo {
        name: "polygon",
        namespace: EIP155_NAMESPACE,
        reference: "137",
    },
    NetworkInfo {
        name: "polygon-amoy",
        namespace: EIP155_NAMESPACE,
        reference: "80002",
    },
];

pub fn chain_id_by_network_name(name: &str) -> Option<ChainId> {
    KNOWN_NETWORKS
        .iter()
        .find(|n| n.name == name)
        .map(NetworkInfo::chain_id)
}

pub fn network_name_by_chain_id(chain_id: &ChainId) -> Option<&'static str> {
    KNOWN_NETWORKS
        .iter()
        .find(|n| n.namespace == chain_id.namespace && n.reference == chain_id.reference)
        .map(|n| n.name)
}

/// USDC deployments.
pub struct USDC;

impl USDC {
    pub fn arbitrum() -> TokenDeployment {
        TokenDeployment {
            chain: ChainId::eip155(42161),
            address: ChecksummedAddress(address!("0xaf88d065e77c8cC2239327C5EDb3A432268e5831")),
            decimals: 6,
            eip712: Some(TokenDeploymentEip712 {
                name: "USD Coin".into(),
                version: "2".into(),
                primary_type: None,
            }),
        }
    }

    pub fn base() -> TokenDeployment {
        TokenDeployment {
            chain: ChainId::eip155(8453),
            address: ChecksummedAddress(address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913")),
            decimals: 6,
            eip712: Some(TokenDeploymentEip712 {
                name: "USD Coin".into(),
                version: "2".into(),
                primary_type: None,
            }),
        }
    }

    pub fn polygon() -> TokenDeployment {
        TokenDeployment {
            chain: ChainId::eip155(137),
            address: ChecksummedAddress(address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359")),
            decimals: 6,
            eip712: Some(TokenDeploymentEip712 {
                name: "USDC".into(),
                version: "2".into(),
                primary_type: None,
            }),
        }
    }

    /// The USDC deployment on a numeric EVM chain id, if known.
    pub fn by_chain_id(chain_id: u64) -> Option<TokenDeployment> {
        match chain_id {
            42161 => Some(Self::arbitrum()),
            8453 => Some(Self::base()),
            137 => Some(Self::polygon()),
            _ => None,
        }
    }
}

/// The CHAT platform token.
pub struct CHAT;

impl CHAT {
    pub fn arbitrum() -> TokenDeployment {
        TokenDeployment {
            chain: ChainId::eip155(42161),
            address: ChecksummedAddress(address!("0xf01E52B0BAC3E147f6CAf956a64586865A0aA928")),
            decimals: 18,
            eip712: Some(TokenDeploymentEip712 {
                name: "x402.chat".into(),
                version: "1.0.0".into(),
                primary_type: Some("Permit".into()),
            }),
        }
    }
}

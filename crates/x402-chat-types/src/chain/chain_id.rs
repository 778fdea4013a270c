//! CAIP-2 chain identifiers.
//!
//! A [`ChainId`] is a `namespace:reference` pair such as `eip155:42161`. x402 v1 messages
//! carry a network *name* (`arbitrum`) instead, and [`ChainId::from_network_name`] /
//! [`ChainId::as_network_name`] translate between the two.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

use crate::networks;

/// The CAIP-2 namespace of EVM chains.
pub const EIP155_NAMESPACE: &str = "eip155";

/// A CAIP-2 compliant blockchain identifier.
///
/// Serializes as a colon-separated string (`"eip155:8453"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainId {
    pub namespace: String,
    pub reference: String,
}

impl ChainId {
    pub fn new<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    /// Builds an `eip155` chain id from a numeric EVM chain id.
    pub fn eip155(chain_id: u64) -> Self {
        Self::new(EIP155_NAMESPACE, chain_id.to_string())
    }

    /// Returns the numeric EVM chain id, if this is an `eip155` chain.
    pub fn as_eip155(&self) -> Option<u64> {
        if self.namespace != EIP155_NAMESPACE {
            return None;
        }
        self.reference.parse().ok()
    }

    /// Looks up a well-known v1 network name, e.g. `"base"`.
    pub fn from_network_name(network_name: &str) -> Option<Self> {
        networks::chain_id_by_network_name(network_name)
    }

    /// Reverse of [`ChainId::from_network_name`].
    pub fn as_network_name(&self) -> Option<&'static str> {
        networks::network_name_by_chain_id(self)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

/// Error returned when parsing an invalid chain ID string.
#[derive(Debug, thiserror::Error)]
#[error("Invalid chain id format {0}")]
pub struct ChainIdFormatError(String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((namespace, reference)) if !namespace.is_empty() && !reference.is_empty() => {
                Ok(ChainId::new(namespace, reference))
            }
            _ => Err(ChainIdFormatError(s.into())),
        }
    }
}

impl Serialize for ChainId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChainId::from_str(&s).map_err(de::Error::custom)
    }
}

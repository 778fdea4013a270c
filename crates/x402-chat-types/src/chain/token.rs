use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::chain::{ChainId, ChecksummedAddress};
use crate::util::money_amount::{MoneyAmount, MoneyAmountParseError};

/// EIP-712 signing domain of a token, as needed by a client to build a payment signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDeploymentEip712 {
    /// The token name as specified in the EIP-712 domain.
    pub name: String,
    /// The token version as specified in the EIP-712 domain.
    pub version: String,
    /// Primary type of the signed message, e.g. `Permit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_type: Option<String>,
}

/// An ERC-20 token deployed on a specific EVM chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDeployment {
    /// The chain this token is deployed on.
    pub chain: ChainId,
    /// The token contract address.
    pub address: ChecksummedAddress,
    /// Number of decimal places (6 for USDC, 18 for most ERC-20s).
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eip712: Option<TokenDeploymentEip712>,
}

impl TokenDeployment {
    /// Parses a human-readable amount (`"0.001"`, `"$1"`, `"1,000"`) into token base units.
    ///
    /// # Errors
    ///
    /// Fails if the input is not a number, is out of range, or carries more decimal places
    /// than the token supports.
    pub fn parse<V>(&self, v: V) -> Result<U256, MoneyAmountParseError>
    where
        V: TryInto<MoneyAmount>,
        MoneyAmountParseError: From<<V as TryInto<MoneyAmount>>::Error>,
    {
        let money_amount = v.try_into()?;
        let scale = money_amount.scale();
        let token_scale = self.decimals as u32;
        if scale > token_scale {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: scale,
                token: token_scale,
            });
        }
        let multiplier = U256::from(10).pow(U256::from(token_scale - scale));
        Ok(U256::from(money_amount.mantissa()) * multiplier)
    }

    /// Base units of `whole` tokens, i.e. `whole * 10^decimals`.
    pub fn whole_units(&self, whole: u64) -> U256 {
        U256::from(whole) * U256::from(10).pow(U256::from(self.decimals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn create_test_deployment(decimals: u8) -> TokenDeployment {
        TokenDeployment {
            chain: ChainId::eip155(1),
            address: ChecksummedAddress(Address::ZERO),
            decimals,
            eip712: None,
        }
    }

    #[test]
    fn test_parse_whole_number() {
        let deployment = create_test_deployment(6);
        assert_eq!(deployment.parse("100").unwrap(), U256::from(100_000_000u64));
    }

    #[test]
    fn test_parse_fraction() {
        let deployment = create_test_deployment(6);
        assert_eq!(deployment.parse("0.001").unwrap(), U256::from(1_000u64));
        assert_eq!(deployment.parse("$10.50").unwrap(), U256::from(10_500_000u64));
    }

    #[test]
    fn test_parse_eighteen_decimals() {
        let deployment = create_test_deployment(18);
        assert_eq!(
            deployment.parse("1").unwrap(),
            U256::from(1_000_000_000_000_000_000u128)
        );
    }

    #[test]
    fn test_parse_too_precise() {
        let deployment = create_test_deployment(2);
        let result = deployment.parse("0.001");
        assert!(matches!(
            result,
            Err(MoneyAmountParseError::WrongPrecision { money: 3, token: 2 })
        ));
    }

    #[test]
    fn test_whole_units() {
        let deployment = create_test_deployment(18);
        assert_eq!(
            deployment.whole_units(10),
            U256::from(10_000_000_000_000_000_000u128)
        );
    }

    #[test]
    fn test_deserialize_from_config() {
        let json = r#"{
            "chain": "eip155:42161",
            "address": "0xf01e52b0bac3e147f6caf956a64586865a0aa928",
            "decimals": 18,
            "eip712": {"name": "x402.chat", "version": "1.0.0", "primaryType": "Permit"}
        }"#;
        let deployment: TokenDeployment = serde_json::from_str(json).unwrap();
        assert_eq!(deployment.chain, ChainId::eip155(42161));
        assert_eq!(
            deployment.eip712.unwrap().primary_type.as_deref(),
            Some("Permit")
        );
    }
}

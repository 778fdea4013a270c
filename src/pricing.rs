//! Price oracle: how much a post or a mint costs right now.
//!
//! A post to a wall costs `existing records on that wall * unit price`, so the first
//! post is free and every later one costs a little more. Minting CHAT is priced at a
//! fixed amount of USDC per unit, independent of usage.

use alloy_primitives::U256;
use std::future::Future;
use std::ops::RangeInclusive;
use x402_chat_types::chain::{ChecksummedAddress, TokenDeployment};
use x402_chat_types::networks::USDC;
use x402_chat_types::quote::PriceQuote;
use x402_chat_types::util::money_amount::MoneyAmountParseError;

/// Chains whose USDC is accepted for minting: Arbitrum One, Base, Polygon.
pub const MINT_CHAIN_IDS: [u64; 3] = [42161, 8453, 137];

/// Accepted number of CHAT units per mint request.
pub const MINT_UNITS: RangeInclusive<i64> = 1..=1000;

/// Source of the per-subject usage count the post price is derived from.
pub trait UsageCounter {
    type Error;

    fn count_for_subject(
        &self,
        subject: &ChecksummedAddress,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("Amount must be between 1 and 1000")]
    InvalidAmount,
    #[error("Invalid or unsupported payment chain")]
    UnsupportedChain,
    #[error("Invalid price: {0}")]
    Price(#[from] MoneyAmountParseError),
}

#[derive(Debug, Clone)]
struct MintAsset {
    chain_id: u64,
    asset: TokenDeployment,
    unit_price: U256,
}

#[derive(Debug, Clone)]
pub struct PriceOracle {
    post_asset: TokenDeployment,
    post_unit_price: U256,
    mint_assets: Vec<MintAsset>,
}

impl PriceOracle {
    /// Builds an oracle from human-readable unit prices, scaled to each asset's decimals.
    pub fn new(
        post_asset: TokenDeployment,
        post_unit_price: &str,
        mint_unit_price: &str,
    ) -> Result<Self, PricingError> {
        let post_unit_price = post_asset.parse(post_unit_price)?;
        let mint_assets = MINT_CHAIN_IDS
            .iter()
            .filter_map(|chain_id| USDC::by_chain_id(*chain_id).map(|asset| (*chain_id, asset)))
            .map(|(chain_id, asset)| {
                let unit_price = asset.parse(mint_unit_price)?;
                Ok(MintAsset {
                    chain_id,
                    asset,
                    unit_price,
                })
            })
            .collect::<Result<Vec<_>, PricingError>>()?;
        Ok(Self {
            post_asset,
            post_unit_price,
            mint_assets,
        })
    }

    pub fn post_asset(&self) -> &TokenDeployment {
        &self.post_asset
    }

    pub fn post_unit_price(&self) -> U256 {
        self.post_unit_price
    }

    /// Price of the next post to a wall that already holds `existing` records.
    pub fn post_price(&self, existing: u64) -> PriceQuote {
        let amount = self.post_unit_price.saturating_mul(U256::from(existing));
        PriceQuote::new(amount, self.post_asset.clone())
    }

    /// Reads the usage counter for `subject` and prices the next post.
    /// Returns the quote together with the count it was derived from.
    pub async fn quote_for_post<C: UsageCounter>(
        &self,
        counter: &C,
        subject: &ChecksummedAddress,
    ) -> Result<(PriceQuote, u64), C::Error> {
        let existing = counter.count_for_subject(subject).await?;
        Ok((self.post_price(existing), existing))
    }

    /// Price of minting `units` CHAT, paid in USDC on `chain_id`.
    ///
    /// The unit count is checked before the chain.
    pub fn quote_for_mint(&self, chain_id: u64, units: i64) -> Result<PriceQuote, PricingError> {
        if !MINT_UNITS.contains(&units) {
            return Err(PricingError::InvalidAmount);
        }
        let mint = self
            .mint_assets
            .iter()
            .find(|m| m.chain_id == chain_id)
            .ok_or(PricingError::UnsupportedChain)?;
        let amount = mint.unit_price.saturating_mul(U256::from(units as u64));
        Ok(PriceQuote::new(amount, mint.asset.clone()))
    }

    pub fn mint_chain_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.mint_assets.iter().map(|m| m.chain_id)
    }
}

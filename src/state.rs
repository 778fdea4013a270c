//! Shared state handed to every request handler.

use http::{HeaderMap, HeaderValue, header};
use url::Url;
use x402_chat_paygate::{
    FacilitatorClient, PAYMENT_HEADER, PaidResource, PaymentReceipt, SettlementGate,
    SettlementResult,
};
use x402_chat_types::chain::{ChecksummedAddress, TokenDeployment};
use x402_chat_types::networks::CHAT;
use x402_chat_types::quote::PriceQuote;

use crate::config::Config;
use crate::error::ApiError;
use crate::ledger::Ledger;
use crate::pricing::PriceOracle;
use crate::revalidate::{Revalidator, ViewCache};
use crate::transfer::EngineClient;

pub struct AppState {
    pub ledger: Ledger,
    pub oracle: PriceOracle,
    pub gate: SettlementGate<FacilitatorClient>,
    pub engine: EngineClient,
    pub revalidator: Revalidator,
    /// Base URL that paid resources are named relative to.
    pub public_url: Url,
    /// Payee for mints and source of minted tokens.
    pub server_wallet: ChecksummedAddress,
    /// Token handed out by `/api/mint`.
    pub mint_token: TokenDeployment,
}

impl AppState {
    /// Opens the ledger and wires the external clients described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let ledger = Ledger::open(config.database())?;

        let pricing = config.pricing();
        let oracle = PriceOracle::new(
            pricing.post_asset.clone(),
            &pricing.post_unit_price,
            &pricing.mint_unit_price,
        )?;

        let facilitator_config = config.facilitator();
        let mut headers = HeaderMap::new();
        if let Some(api_key) = facilitator_config.api_key.as_ref() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", api_key.inner()))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        let facilitator = FacilitatorClient::try_new(facilitator_config.url.inner().clone())?
            .with_headers(headers)
            .with_timeout(facilitator_config.timeout());
        let gate =
            SettlementGate::new(facilitator).with_max_timeout_seconds(pricing.max_timeout_seconds);

        let engine_config = config.engine();
        let engine = EngineClient::try_new(
            engine_config.url.inner().clone(),
            engine_config.secret_key.inner(),
        )?
        .with_timeout(engine_config.timeout());

        let revalidator = Revalidator::new(ViewCache::new(config.view_cache_ttl()));

        Ok(Self {
            ledger,
            oracle,
            gate,
            engine,
            revalidator,
            public_url: config.public_url().clone(),
            server_wallet: config.server_wallet(),
            mint_token: CHAT::arbitrum(),
        })
    }

    /// Absolute URL of a paid endpoint.
    pub fn resource_url(&self, path: &str) -> Result<String, ApiError> {
        self.public_url
            .join(path)
            .map(String::from)
            .map_err(|e| ApiError::Unexpected(format!("Failed to build resource URL: {e}")))
    }

    /// Runs the settlement gate for `quote`. A missing or rejected payment becomes a 402.
    pub async fn pay(
        &self,
        resource: &PaidResource,
        quote: &PriceQuote,
        pay_to: &ChecksummedAddress,
        headers: &HeaderMap,
    ) -> Result<PaymentReceipt, ApiError> {
        let assertion = headers.get(PAYMENT_HEADER).map(HeaderValue::as_bytes);
        match self.gate.settle(resource, quote, pay_to, assertion).await? {
            SettlementResult::Required(required) => Err(required.into()),
            SettlementResult::Settled(receipt) => Ok(receipt),
        }
    }
}

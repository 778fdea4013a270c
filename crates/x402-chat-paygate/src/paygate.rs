//! The payment settlement gate.
//!
//! [`SettlementGate::settle`] takes what is being bought ([`PaidResource`]), what it costs
//! ([`PriceQuote`]), who gets paid and the optional `X-PAYMENT` header bytes, and returns:
//!
//! | situation | outcome |
//! |---|---|
//! | quote is zero | `Settled(Waived)`, facilitator not contacted |
//! | header missing, malformed or for another scheme/network | `Required` |
//! | facilitator says invalid, or settle reports `success: false` | `Required` |
//! | facilitator unreachable, non-200 or undecodable | `Err(SettlementError)` |
//! | verified and settled | `Settled(Paid)` |
//!
//! Every `Required` carries a complete [`v1::PaymentRequired`] body, so a client can build a
//! valid assertion without out-of-band knowledge. Nothing is ever retried here: replay
//! protection belongs to the facilitator.

use http::HeaderValue;
use serde_json::json;
use x402_chat_types::chain::{ChainId, ChecksummedAddress};
use x402_chat_types::facilitator::Facilitator;
use x402_chat_types::proto::{EXACT_SCHEME, v1};
use x402_chat_types::quote::PriceQuote;
use x402_chat_types::util::Base64Bytes;

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// Request header carrying the base64 payment assertion.
pub const PAYMENT_HEADER: &str = "X-PAYMENT";
/// Response header carrying the base64 settlement receipt.
pub const PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// Default validity window of a payment authorization.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 60;

/// Description of the priced action, rendered into the 402 body.
#[derive(Debug, Clone)]
pub struct PaidResource {
    /// Absolute URL of the endpoint being paid for.
    pub url: String,
    pub description: String,
    pub mime_type: String,
    /// JSON body fields the client must send, keyed by field name.
    pub body_fields: serde_json::Value,
    /// Shape of the successful response.
    pub output: serde_json::Value,
}

impl PaidResource {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            description: String::new(),
            mime_type: "application/json".to_string(),
            body_fields: json!({}),
            output: json!({}),
        }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_body_fields(mut self, body_fields: serde_json::Value) -> Self {
        self.body_fields = body_fields;
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = output;
        self
    }

    /// The `outputSchema` of the payment requirements.
    pub fn output_schema(&self) -> serde_json::Value {
        json!({
            "input": {
                "type": "http",
                "method": "POST",
                "discoverable": true,
                "bodyType": "json",
                "bodyFields": self.body_fields,
            },
            "output": self.output,
        })
    }
}

/// Why a payment assertion was not accepted. Rendered as the `error` of a 402 body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentRejection {
    #[error("{0} header is required")]
    PaymentHeaderRequired(&'static str),
    #[error("Invalid or malformed payment header")]
    InvalidPaymentHeader,
    #[error("Unable to find matching payment requirements")]
    NoPaymentMatching,
    #[error("Verification failed: {0}")]
    VerificationFailed(String),
    #[error("Settlement rejected: {0}")]
    SettlementRejected(String),
}

/// The payment system could not give an answer. Distinct from "please pay".
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Facilitator unavailable during {stage}: {message}")]
    FacilitatorUnavailable { stage: &'static str, message: String },
    #[error("Asset chain {0} has no x402 v1 network name")]
    UnsupportedNetwork(ChainId),
}

/// Proof that the action is paid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentReceipt {
    /// The price was zero; nothing was charged.
    Waived,
    Paid {
        payer: String,
        transaction: String,
        network: String,
    },
}

impl PaymentReceipt {
    pub fn payer(&self) -> Option<&str> {
        match self {
            PaymentReceipt::Waived => None,
            PaymentReceipt::Paid { payer, .. } => Some(payer),
        }
    }

    /// The `X-PAYMENT-RESPONSE` header value echoing the settlement, if one happened.
    pub fn response_header(&self) -> Option<HeaderValue> {
        match self {
            PaymentReceipt::Waived => None,
            PaymentReceipt::Paid {
                payer,
                transaction,
                network,
            } => {
                let settlement = v1::SettleResponse::Success {
                    payer: payer.clone(),
                    transaction: transaction.clone(),
                    network: network.clone(),
                };
                let encoded = Base64Bytes::encode_json(&settlement).ok()?;
                HeaderValue::from_bytes(encoded.as_ref()).ok()
            }
        }
    }
}

/// Outcome of [`SettlementGate::settle`].
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementResult {
    /// Not paid (yet). The body tells the client how to pay.
    Required(v1::PaymentRequired),
    Settled(PaymentReceipt),
}

enum PaygateError {
    Rejected(PaymentRejection),
    Unavailable(SettlementError),
}

impl From<PaymentRejection> for PaygateError {
    fn from(value: PaymentRejection) -> Self {
        PaygateError::Rejected(value)
    }
}

/// Verifies and settles payments for priced actions through a [`Facilitator`].
#[derive(Debug, Clone)]
pub struct SettlementGate<F> {
    facilitator: F,
    max_timeout_seconds: u64,
}

impl<F> SettlementGate<F> {
    pub fn new(facilitator: F) -> Self {
        Self {
            facilitator,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
        }
    }

    pub fn with_max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    pub fn facilitator(&self) -> &F {
        &self.facilitator
    }

    /// Builds the single accepted payment requirement for `quote`.
    pub fn requirements(
        &self,
        resource: &PaidResource,
        quote: &PriceQuote,
        pay_to: &ChecksummedAddress,
    ) -> Result<v1::PaymentRequirements, SettlementError> {
        let network = quote
            .network()
            .ok_or_else(|| SettlementError::UnsupportedNetwork(quote.asset.chain.clone()))?;
        let extra = quote
            .signing_domain()
            .and_then(|domain| serde_json::to_value(domain).ok());
        Ok(v1::PaymentRequirements {
            scheme: EXACT_SCHEME.to_string(),
            network: network.to_string(),
            max_amount_required: quote.amount.to_string(),
            resource: resource.url.clone(),
            description: resource.description.clone(),
            mime_type: resource.mime_type.clone(),
            output_schema: Some(resource.output_schema()),
            pay_to: pay_to.to_string(),
            max_timeout_seconds: self.max_timeout_seconds,
            asset: quote.asset.address.to_string(),
            extra,
        })
    }
}

impl<F> SettlementGate<F>
where
    F: Facilitator,
{
    /// Decides whether `quote` has been paid to `pay_to` for `resource`.
    ///
    /// `assertion` is the raw `X-PAYMENT` header value, if the request carried one.
    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "x402.settlement_gate.settle",
            skip_all,
            fields(resource = %resource.url, amount = %quote.amount, pay_to = %pay_to)
        )
    )]
    pub async fn settle(
        &self,
        resource: &PaidResource,
        quote: &PriceQuote,
        pay_to: &ChecksummedAddress,
        assertion: Option<&[u8]>,
    ) -> Result<SettlementResult, SettlementError> {
        if quote.is_free() {
            #[cfg(feature = "telemetry")]
            tracing::debug!("Zero price, settlement waived");
            return Ok(SettlementResult::Settled(PaymentReceipt::Waived));
        }

        let requirements = self.requirements(resource, quote, pay_to)?;
        match self.verify_and_settle(&requirements, assertion).await {
            Ok(receipt) => Ok(SettlementResult::Settled(receipt)),
            Err(PaygateError::Rejected(rejection)) => {
                #[cfg(feature = "telemetry")]
                tracing::info!(reason = %rejection, "Payment required");
                Ok(SettlementResult::Required(v1::PaymentRequired {
                    x402_version: v1::X402Version1,
                    accepts: vec![requirements],
                    error: Some(rejection.to_string()),
                }))
            }
            Err(PaygateError::Unavailable(err)) => Err(err),
        }
    }

    async fn verify_and_settle(
        &self,
        requirements: &v1::PaymentRequirements,
        assertion: Option<&[u8]>,
    ) -> Result<PaymentReceipt, PaygateError> {
        let header = assertion.ok_or(PaymentRejection::PaymentHeaderRequired(PAYMENT_HEADER))?;
        let payment_payload = extract_payment_payload::<v1::PaymentPayload>(header)
            .ok_or(PaymentRejection::InvalidPaymentHeader)?;

        if payment_payload.scheme != requirements.scheme
            || payment_payload.network != requirements.network
        {
            return Err(PaymentRejection::NoPaymentMatching.into());
        }

        let request = v1::VerifyRequest {
            x402_version: v1::X402Version1,
            payment_payload,
            payment_requirements: requirements.clone(),
        };

        let verify_response = self.facilitator.verify(&request).await.map_err(|e| {
            PaygateError::Unavailable(SettlementError::FacilitatorUnavailable {
                stage: "verify",
                message: e.to_string(),
            })
        })?;
        if let v1::VerifyResponse::Invalid { reason, .. } = verify_response {
            return Err(PaymentRejection::VerificationFailed(reason).into());
        }

        let settle_response = self.facilitator.settle(&request).await.map_err(|e| {
            PaygateError::Unavailable(SettlementError::FacilitatorUnavailable {
                stage: "settle",
                message: e.to_string(),
            })
        })?;
        match settle_response {
            v1::SettleResponse::Success {
                payer,
                transaction,
                network,
            } => {
                #[cfg(feature = "telemetry")]
                tracing::info!(%payer, %transaction, "Payment settled");
                Ok(PaymentReceipt::Paid {
                    payer,
                    transaction,
                    network,
                })
            }
            v1::SettleResponse::Error { reason, .. } => {
                Err(PaymentRejection::SettlementRejected(reason).into())
            }
        }
    }
}

/// Decodes base64 header bytes and deserializes the JSON inside.
fn extract_payment_payload<T>(header_bytes: &[u8]) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    let decoded = Base64Bytes::from(header_bytes).decode().ok()?;
    serde_json::from_slice(&decoded).ok()
}

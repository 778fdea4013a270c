//! Client for the transaction engine that moves tokens out of the server wallet.
//!
//! The engine queues transfers and hands back transaction identifiers; their progress
//! is polled through [`EngineClient::status`].

use alloy_primitives::U256;
use http::{HeaderValue, StatusCode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::instrument;
use url::Url;
use x402_chat_types::chain::ChecksummedAddress;

const SECRET_KEY_HEADER: &str = "x-secret-key";

/// One transfer in a send batch. `quantity` is in token base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub address: ChecksummedAddress,
    #[serde(serialize_with = "serialize_decimal")]
    pub quantity: U256,
}

fn serialize_decimal<S: serde::Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    from: &'a ChecksummedAddress,
    chain_id: u64,
    token_address: &'a ChecksummedAddress,
    recipients: &'a [Recipient],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResult {
    transaction_ids: Vec<String>,
}

#[derive(Deserialize)]
struct StatusResult {
    status: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

/// Where a queued transfer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TransferStatus {
    /// Folds the engine's status vocabulary into three states. Unknown values are pending.
    pub fn from_engine(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "confirmed" | "mined" | "success" => TransferStatus::Confirmed,
            "failed" | "errored" | "cancelled" | "reverted" => TransferStatus::Failed,
            _ => TransferStatus::Pending,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Confirmed => "CONFIRMED",
            TransferStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineClientError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid engine secret key")]
    InvalidSecretKey,
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("Engine returned no transaction id")]
    NoTransactionId,
}

#[derive(Clone)]
pub struct EngineClient {
    base_url: Url,
    send_url: Url,
    client: Client,
    secret_key: HeaderValue,
    timeout: Option<Duration>,
}

impl fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl EngineClient {
    pub fn try_new(base_url: Url, secret_key: &str) -> Result<Self, EngineClientError> {
        let mut base_url = base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let send_url = base_url
            .join("./v1/wallets/send")
            .map_err(|e| EngineClientError::UrlParse {
                context: "Failed to construct ./v1/wallets/send URL",
                source: e,
            })?;
        let mut secret_key =
            HeaderValue::from_str(secret_key).map_err(|_| EngineClientError::InvalidSecretKey)?;
        secret_key.set_sensitive(true);
        Ok(Self {
            base_url,
            send_url,
            client: Client::new(),
            secret_key,
            timeout: None,
        })
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = Some(timeout);
        this
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Queues a transfer of `token` on `chain_id` from `from` to every recipient.
    #[instrument(skip_all, err, fields(from = %from, chain_id = chain_id, recipients = recipients.len()))]
    pub async fn send(
        &self,
        from: &ChecksummedAddress,
        chain_id: u64,
        token: &ChecksummedAddress,
        recipients: &[Recipient],
    ) -> Result<Vec<String>, EngineClientError> {
        let context = "POST /v1/wallets/send";
        let body = SendRequest {
            from,
            chain_id,
            token_address: token,
            recipients,
        };
        let request = self.client.post(self.send_url.clone()).json(&body);
        let envelope: Envelope<SendResult> = self.execute(request, context).await?;
        if envelope.result.transaction_ids.is_empty() {
            return Err(EngineClientError::NoTransactionId);
        }
        Ok(envelope.result.transaction_ids)
    }

    /// Current status of a queued transfer.
    #[instrument(skip(self), err)]
    pub async fn status(&self, transaction_id: &str) -> Result<TransferStatus, EngineClientError> {
        let context = "GET /v1/transactions/{id}";
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| EngineClientError::UrlParse {
                context: "Engine base URL cannot be a base",
                source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
            })?
            .pop_if_empty()
            .extend(["v1", "transactions", transaction_id]);
        let request = self.client.get(url);
        let envelope: Envelope<StatusResult> = self.execute(request, context).await?;
        Ok(TransferStatus::from_engine(&envelope.result.status))
    }

    async fn execute<R>(
        &self,
        request: reqwest::RequestBuilder,
        context: &'static str,
    ) -> Result<R, EngineClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        let mut request = request.header(SECRET_KEY_HEADER, self.secret_key.clone());
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| EngineClientError::Http { context, source: e })?;
        let status = response.status();
        if status.is_success() {
            response
                .json::<R>()
                .await
                .map_err(|e| EngineClientError::JsonDeserialization { context, source: e })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(EngineClientError::HttpStatus {
                context,
                status,
                body,
            })
        }
    }
}

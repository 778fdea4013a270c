//! Errors at the HTTP boundary.
//!
//! Every layer has its own error enum; handlers convert them into [`ApiError`], which
//! decides the status code and body. A 402 is not a failure as such: it carries the
//! payment requirements a client needs to pay and retry.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use x402_chat_paygate::SettlementError;
use x402_chat_types::proto::v1;

use crate::ledger::LedgerError;
use crate::pricing::PricingError;
use crate::transfer::EngineClientError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Client-correctable input problem.
    #[error("{0}")]
    Validation(String),
    #[error("Payment required")]
    PaymentRequired(Box<v1::PaymentRequired>),
    #[error("{0}")]
    NotFound(String),
    /// The payment system could not answer; the client may retry.
    #[error("Settlement failed: {0}")]
    SettlementFailed(#[from] SettlementError),
    #[error("{0}")]
    Unexpected(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::SettlementFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::PaymentRequired(required) => (status, Json(*required)).into_response(),
            ApiError::SettlementFailed(err) => {
                tracing::warn!(error = %err, "Settlement failed");
                (
                    status,
                    Json(json!({
                        "error": "Settlement failed",
                        "details": err.to_string(),
                    })),
                )
                    .into_response()
            }
            ApiError::Unexpected(message) => {
                tracing::error!(error = %message, "Unexpected error");
                (
                    status,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
            ApiError::Validation(message) | ApiError::NotFound(message) => {
                (status, Json(json!({ "error": message }))).into_response()
            }
        }
    }
}

impl From<v1::PaymentRequired> for ApiError {
    fn from(required: v1::PaymentRequired) -> Self {
        ApiError::PaymentRequired(Box::new(required))
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(message) => ApiError::Validation(message),
            LedgerError::NotFound(_) => ApiError::NotFound(err.to_string()),
            other => ApiError::Unexpected(other.to_string()),
        }
    }
}

impl From<PricingError> for ApiError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::InvalidAmount | PricingError::UnsupportedChain => {
                ApiError::Validation(err.to_string())
            }
            PricingError::Price(_) => ApiError::Unexpected(err.to_string()),
        }
    }
}

impl From<EngineClientError> for ApiError {
    fn from(err: EngineClientError) -> Self {
        ApiError::Unexpected(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let response = ApiError::from(PricingError::InvalidAmount).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Amount must be between 1 and 1000"})
        );

        let response = ApiError::from(LedgerError::NotFound("Comment")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({"error": "Comment not found"}));

        let response = ApiError::from(LedgerError::Corrupt("boom".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Internal server error"})
        );
    }

    #[tokio::test]
    async fn test_settlement_failure_is_503() {
        let err = SettlementError::FacilitatorUnavailable {
            stage: "verify",
            message: "connection refused".into(),
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Settlement failed");
    }

    #[tokio::test]
    async fn test_payment_required_body() {
        let required = v1::PaymentRequired {
            x402_version: v1::X402Version1,
            accepts: vec![],
            error: Some("X-PAYMENT header is required".into()),
        };
        let response = ApiError::from(required).into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = body_json(response).await;
        assert_eq!(body["x402Version"], 1);
        assert_eq!(body["error"], "X-PAYMENT header is required");
    }
}

//! HTTP endpoints of x402-chat.
//!
//! Priced writes (`/api/comment`, `/api/reply`, `/api/mint`) follow one order:
//! validate the input, quote the price, run the settlement gate, and only then commit.
//! A request that has not paid never reaches the ledger.
//!
//! Read endpoints serve JSON views through the [`ViewCache`](crate::revalidate::ViewCache),
//! which writes invalidate.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use x402_chat_paygate::{PAYMENT_RESPONSE_HEADER, PaidResource, PaymentReceipt};
use x402_chat_types::chain::ChecksummedAddress;

use crate::error::ApiError;
use crate::ledger::{LedgerError, LikeDelta, Page, normalize_text};
use crate::pricing::{MINT_UNITS, PricingError};
use crate::state::AppState;
use crate::transfer::{EngineClientError, Recipient};

pub const DEFAULT_FEED_LIMIT: u32 = 20;
pub const DEFAULT_POPULAR_LIMIT: u32 = 10;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(get_health))
        .route("/api/comment", post(post_comment))
        .route("/api/reply", post(post_reply))
        .route("/api/mint", post(post_mint))
        .route("/api/transaction-status", get(get_transaction_status))
        .route("/api/comments", get(get_comments))
        .route("/api/comments/latest", get(get_latest))
        .route("/api/comments/{id}/thread", get(get_thread))
        .route("/api/comments/{id}/like", post(post_like))
        .route("/api/pages/popular", get(get_popular_pages))
        .route("/api/pages/{owner}/price", get(get_price))
}

/// `GET /health`
pub async fn get_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRequest {
    pub owner_address: String,
    pub from_address: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub parent_comment_id: String,
    pub from_address: String,
    pub text: String,
}

/// Fields are loose JSON so that bad values get the same errors as out-of-range ones.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    #[serde(default)]
    pub amount: serde_json::Value,
    #[serde(default)]
    pub payment_chain_id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusQuery {
    pub transaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentsQuery {
    pub owner: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LikeRequest {
    pub increment: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PriceView<'a> {
    owner_address: ChecksummedAddress,
    comment_count: u64,
    quote: &'a x402_chat_types::quote::PriceQuote,
}

/// `POST /api/comment`: a priced top-level post on `ownerAddress`'s wall, paid to the owner.
#[instrument(skip_all)]
pub async fn post_comment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CommentRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload.map_err(json_rejection)?;
    let owner = parse_address("ownerAddress", &body.owner_address)?;
    let author = parse_address("fromAddress", &body.from_address)?;
    let text = checked_text(&body.text)?;

    let (quote, existing) = state.oracle.quote_for_post(&state.ledger, &owner).await?;
    tracing::debug!(%owner, existing, amount = %quote.amount, "Post quoted");
    let resource = comment_resource(state.resource_url("api/comment")?);
    let receipt = state.pay(&resource, &quote, &owner, &headers).await?;

    let comment = state.ledger.insert(owner, author, &text, None).await?;
    tracing::info!(comment_id = %comment.id, %owner, payer = ?receipt.payer(), "Comment posted");
    state.revalidator.revalidate_wall(comment.owner_address);

    Ok(paid_response(
        &receipt,
        json!({ "success": true, "commentId": comment.id }),
    ))
}

/// `POST /api/reply`: a priced reply. The wall, and so the price and the payee,
/// are those of the parent comment.
#[instrument(skip_all)]
pub async fn post_reply(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ReplyRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload.map_err(json_rejection)?;
    let parent_id = Uuid::parse_str(body.parent_comment_id.trim())
        .map_err(|_| ApiError::Validation("Invalid parentCommentId".into()))?;
    let author = parse_address("fromAddress", &body.from_address)?;
    let text = checked_text(&body.text)?;

    let parent = state.ledger.get(parent_id).await.map_err(|e| match e {
        LedgerError::NotFound(_) => ApiError::NotFound("Parent comment not found".into()),
        other => other.into(),
    })?;
    if parent.is_reply() {
        return Err(ApiError::Validation(
            "Replies can only be made to top-level comments".into(),
        ));
    }
    let owner = parent.owner_address;

    let (quote, existing) = state.oracle.quote_for_post(&state.ledger, &owner).await?;
    tracing::debug!(%owner, existing, amount = %quote.amount, "Reply quoted");
    let resource = reply_resource(state.resource_url("api/reply")?);
    let receipt = state.pay(&resource, &quote, &owner, &headers).await?;

    let reply = state
        .ledger
        .insert(owner, author, &text, Some(parent.id))
        .await?;
    tracing::info!(comment_id = %reply.id, parent_id = %parent.id, "Reply posted");
    state.revalidator.revalidate_wall(reply.owner_address);

    Ok(paid_response(
        &receipt,
        json!({ "success": true, "commentId": reply.id }),
    ))
}

/// `POST /api/mint`: buy CHAT with USDC at a fixed unit price; the server wallet sends it.
#[instrument(skip_all)]
pub async fn post_mint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<MintRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload.map_err(json_rejection)?;
    let units = mint_units(&body.amount)
        .filter(|units| MINT_UNITS.contains(units))
        .ok_or(PricingError::InvalidAmount)?;
    let chain_id = body
        .payment_chain_id
        .as_u64()
        .ok_or(PricingError::UnsupportedChain)?;
    let quote = state.oracle.quote_for_mint(chain_id, units)?;

    let resource = mint_resource(state.resource_url("api/mint")?);
    let receipt = state
        .pay(&resource, &quote, &state.server_wallet, &headers)
        .await?;
    let payer: ChecksummedAddress = receipt
        .payer()
        .and_then(|payer| payer.parse().ok())
        .ok_or_else(|| {
            ApiError::Unexpected("No valid payer address found in payment receipt".into())
        })?;

    let token = &state.mint_token;
    let token_chain_id = token.chain.as_eip155().ok_or_else(|| {
        ApiError::Unexpected(format!("Mint token chain {} is not EVM", token.chain))
    })?;
    let recipients = [Recipient {
        address: payer,
        quantity: token.whole_units(units as u64),
    }];
    let transaction_id = state
        .engine
        .send(&state.server_wallet, token_chain_id, &token.address, &recipients)
        .await?
        .into_iter()
        .next()
        .ok_or(EngineClientError::NoTransactionId)?;
    tracing::info!(%payer, units, %transaction_id, "Mint enqueued");

    Ok(paid_response(
        &receipt,
        json!({
            "success": true,
            "transactionId": transaction_id,
            "message": format!("Successfully minted {units} CHAT tokens"),
        }),
    ))
}

/// `GET /api/transaction-status?transactionId=...`
#[instrument(skip_all)]
pub async fn get_transaction_status(
    State(state): State<Arc<AppState>>,
    query: Result<Query<TransactionStatusQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let transaction_id = query
        .transaction_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("Missing transactionId".into()))?;
    let status = state.engine.status(&transaction_id).await?;
    Ok(Json(json!({ "status": status, "transactionId": transaction_id })).into_response())
}

/// `GET /api/comments?owner=&limit=&offset=`: top-level comments with their replies.
#[instrument(skip_all)]
pub async fn get_comments(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CommentsQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let owner = query
        .owner
        .as_deref()
        .map(|owner| parse_address("owner", owner))
        .transpose()?;
    let page = Page::new(query.limit, query.offset);
    let path = owner.map_or_else(|| "/".to_string(), |owner| format!("/{owner}"));
    let key = format!("comments?limit={}&offset={}", page.limit, page.offset);
    let ledger = state.ledger.clone();
    cached_view(&state, &path, key, || async move {
        let comments = ledger.list_top_level(owner, page).await?;
        Ok::<_, LedgerError>(json!({ "comments": comments }))
    })
    .await
}

/// `GET /api/comments/latest?limit=`: newest comments and replies site-wide.
#[instrument(skip_all)]
pub async fn get_latest(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let limit = clamp_limit(query.limit, DEFAULT_FEED_LIMIT);
    let ledger = state.ledger.clone();
    cached_view(&state, "/", format!("latest?limit={limit}"), || async move {
        let comments = ledger.latest(limit).await?;
        Ok::<_, LedgerError>(json!({ "comments": comments }))
    })
    .await
}

/// `GET /api/pages/popular?limit=`: walls with the most comments.
#[instrument(skip_all)]
pub async fn get_popular_pages(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let limit = clamp_limit(query.limit, DEFAULT_POPULAR_LIMIT);
    let ledger = state.ledger.clone();
    cached_view(&state, "/", format!("popular?limit={limit}"), || async move {
        let pages = ledger.popular_pages(limit).await?;
        Ok::<_, LedgerError>(json!({ "pages": pages }))
    })
    .await
}

/// `GET /api/comments/{id}/thread`: the whole thread `id` belongs to.
#[instrument(skip_all)]
pub async fn get_thread(
    State(state): State<Arc<AppState>>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(id) = id.map_err(|e| ApiError::Validation(e.body_text()))?;
    let thread = state.ledger.thread_root(id).await?;
    Ok(Json(thread).into_response())
}

/// `POST /api/comments/{id}/like`: unpriced like toggle.
#[instrument(skip_all)]
pub async fn post_like(
    State(state): State<Arc<AppState>>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<LikeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Path(id) = id.map_err(|e| ApiError::Validation(e.body_text()))?;
    let Json(body) = payload.map_err(json_rejection)?;
    let update = state
        .ledger
        .toggle_like(id, LikeDelta::from(body.increment))
        .await?;
    state
        .revalidator
        .revalidate(&format!("/{}", update.owner_address));
    Ok(Json(json!({ "commentId": id, "likesCount": update.likes_count })).into_response())
}

/// `GET /api/pages/{owner}/price`: what the next post on a wall costs.
#[instrument(skip_all)]
pub async fn get_price(
    State(state): State<Arc<AppState>>,
    owner: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(owner) = owner.map_err(|e| ApiError::Validation(e.body_text()))?;
    let owner = parse_address("owner", &owner)?;
    let (quote, comment_count) = state.oracle.quote_for_post(&state.ledger, &owner).await?;
    Ok(Json(PriceView {
        owner_address: owner,
        comment_count,
        quote: &quote,
    })
    .into_response())
}

async fn cached_view<F, Fut>(
    state: &AppState,
    path: &str,
    key: String,
    load: F,
) -> Result<Response, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<serde_json::Value, LedgerError>>,
{
    let cache = state.revalidator.cache();
    if let Some(body) = cache.get(path, &key) {
        return Ok(Json(body).into_response());
    }
    let generation = cache.generation();
    let body = load().await?;
    cache.put_if_current(path, &key, body.clone(), generation);
    Ok(Json(body).into_response())
}

fn paid_response(receipt: &PaymentReceipt, body: serde_json::Value) -> Response {
    let mut response = Json(body).into_response();
    if let Some(value) = receipt.response_header() {
        response.headers_mut().insert(PAYMENT_RESPONSE_HEADER, value);
    }
    response
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::Validation(rejection.body_text())
}

fn parse_address(field: &str, value: &str) -> Result<ChecksummedAddress, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::Validation(format!("Invalid {field}: {value}")))
}

fn checked_text(text: &str) -> Result<String, ApiError> {
    normalize_text(text).ok_or_else(|| {
        ApiError::Validation("Comment must be between 1 and 1000 characters".into())
    })
}

fn clamp_limit(limit: Option<u32>, default: u32) -> u32 {
    limit.unwrap_or(default).clamp(1, Page::MAX_LIMIT)
}

/// Whole JSON numbers only; `5.0` counts, `5.5` does not.
fn mint_units(amount: &serde_json::Value) -> Option<i64> {
    let serde_json::Value::Number(number) = amount else {
        return None;
    };
    number.as_i64().or_else(|| {
        number
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn comment_resource(url: String) -> PaidResource {
    PaidResource::new(url)
        .with_description("Leave a comment on a wallet.")
        .with_body_fields(json!({
            "ownerAddress": {
                "type": "string",
                "description": "The wallet address of the owner of the page.",
                "required": true,
            },
            "fromAddress": {
                "type": "string",
                "description": "The wallet address of the commenter.",
                "required": true,
            },
            "text": {
                "type": "string",
                "description": "The text of the comment.",
                "required": true,
                "maxLength": 1000,
            },
        }))
        .with_output(json!({
            "commentId": {
                "type": "string",
                "description": "The ID of the comment.",
                "required": true,
            },
        }))
}

fn reply_resource(url: String) -> PaidResource {
    PaidResource::new(url)
        .with_description("Reply to a comment on a wallet.")
        .with_body_fields(json!({
            "parentCommentId": {
                "type": "string",
                "description": "The ID of the top-level comment being replied to.",
                "required": true,
            },
            "fromAddress": {
                "type": "string",
                "description": "The wallet address of the replier.",
                "required": true,
            },
            "text": {
                "type": "string",
                "description": "The text of the reply.",
                "required": true,
                "maxLength": 1000,
            },
        }))
        .with_output(json!({
            "commentId": {
                "type": "string",
                "description": "The ID of the reply.",
                "required": true,
            },
        }))
}

fn mint_resource(url: String) -> PaidResource {
    PaidResource::new(url)
        .with_description("Mint CHAT tokens by paying with USDC.")
        .with_body_fields(json!({
            "amount": {
                "type": "number",
                "description": "Number of CHAT tokens to mint (1-1000)",
                "required": true,
                "minimum": 1,
                "maximum": 1000,
            },
            "paymentChainId": {
                "type": "number",
                "description": "Chain ID to pay on (Arbitrum, Base, or Polygon)",
                "required": true,
            },
        }))
        .with_output(json!({
            "transactionId": {
                "type": "string",
                "description": "The transaction ID for the mint operation",
                "required": true,
            },
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;
    use url::Url;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use x402_chat_paygate::{FacilitatorClient, SettlementGate};
    use x402_chat_types::networks::CHAT;
    use x402_chat_types::util::Base64Bytes;

    use crate::ledger::Ledger;
    use crate::pricing::PriceOracle;
    use crate::revalidate::{Revalidator, ViewCache};
    use crate::transfer::EngineClient;

    const ONE_CHAT: &str = "1000000000000000000";
    const PAYER: &str = "0x3333333333333333333333333333333333333333";

    struct Harness {
        router: Router,
        ledger: Ledger,
        facilitator: MockServer,
        engine: MockServer,
    }

    fn addr(byte: u8) -> ChecksummedAddress {
        ChecksummedAddress(Address::repeat_byte(byte))
    }

    async fn harness() -> Harness {
        let facilitator = MockServer::start().await;
        let engine = MockServer::start().await;
        let ledger = Ledger::in_memory().unwrap();
        let state = AppState {
            ledger: ledger.clone(),
            oracle: PriceOracle::new(CHAT::arbitrum(), "1", "0.001").unwrap(),
            gate: SettlementGate::new(FacilitatorClient::try_from(facilitator.uri()).unwrap()),
            engine: EngineClient::try_new(Url::parse(&engine.uri()).unwrap(), "s3cret").unwrap(),
            revalidator: Revalidator::new(ViewCache::new(Duration::from_secs(60))),
            public_url: Url::parse("https://x402.chat/").unwrap(),
            server_wallet: addr(0x55),
            mint_token: CHAT::arbitrum(),
        };
        Harness {
            router: routes().with_state(Arc::new(state)),
            ledger,
            facilitator,
            engine,
        }
    }

    fn payment_header(network: &str) -> String {
        Base64Bytes::encode_json(&json!({
            "x402Version": 1,
            "scheme": "exact",
            "network": network,
            "payload": {"signature": "0xdeadbeef", "authorization": {"from": PAYER}},
        }))
        .unwrap()
        .to_string()
    }

    async fn mock_facilitator_accepts(server: &MockServer, network: &str, amount: &str) {
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_partial_json(json!({
                "paymentRequirements": {"maxAmountRequired": amount, "network": network}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"isValid": true, "payer": PAYER})),
            )
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "payer": PAYER,
                "transaction": "0xabc",
                "network": network,
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mock_facilitator_untouched(server: &MockServer) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(server)
            .await;
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
        payment: Option<String>,
    ) -> (StatusCode, HeaderMap, serde_json::Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(payment) = payment {
            request = request.header("X-PAYMENT", payment);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, json)
    }

    fn comment_body(owner: ChecksummedAddress, text: &str) -> serde_json::Value {
        json!({
            "ownerAddress": owner.to_string(),
            "fromAddress": addr(0x22).to_string(),
            "text": text,
        })
    }

    #[tokio::test]
    async fn test_first_post_is_free() {
        let h = harness().await;
        mock_facilitator_untouched(&h.facilitator).await;
        let owner = addr(0x11);

        let (status, headers, body) = send(
            &h.router,
            "POST",
            "/api/comment",
            Some(comment_body(owner, "first!")),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["commentId"].is_string());
        assert!(headers.get("x-payment-response").is_none());
        assert_eq!(h.ledger.count_for_subject(owner).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_payment_is_402_and_writes_nothing() {
        let h = harness().await;
        mock_facilitator_untouched(&h.facilitator).await;
        let owner = addr(0x11);
        h.ledger
            .insert(owner, addr(0x22), "seed", None)
            .await
            .unwrap();

        let (status, _, body) = send(
            &h.router,
            "POST",
            "/api/comment",
            Some(comment_body(owner, "unpaid")),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["x402Version"], 1);
        assert_eq!(body["error"], "X-PAYMENT header is required");
        let accepts = &body["accepts"][0];
        assert_eq!(accepts["scheme"], "exact");
        assert_eq!(accepts["network"], "arbitrum");
        assert_eq!(accepts["maxAmountRequired"], ONE_CHAT);
        assert_eq!(accepts["payTo"], owner.to_string());
        assert_eq!(accepts["resource"], "https://x402.chat/api/comment");
        assert_eq!(accepts["asset"], CHAT::arbitrum().address.to_string());
        assert_eq!(accepts["extra"]["name"], "x402.chat");
        assert_eq!(accepts["outputSchema"]["input"]["method"], "POST");
        assert_eq!(
            accepts["outputSchema"]["input"]["bodyFields"]["text"]["maxLength"],
            1000
        );
        assert_eq!(h.ledger.count_for_subject(owner).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_paid_post_raises_next_quote() {
        let h = harness().await;
        let owner = addr(0x11);
        let mut seeded = Vec::new();
        for text in ["a", "b", "c"] {
            seeded.push(h.ledger.insert(owner, addr(0x22), text, None).await.unwrap());
        }
        let price_uri = format!("/api/pages/{owner}/price");

        let (status, _, body) = send(&h.router, "GET", &price_uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["commentCount"], 3);
        assert_eq!(body["quote"]["amount"], "3000000000000000000");

        mock_facilitator_accepts(&h.facilitator, "arbitrum", "3000000000000000000").await;
        let (status, headers, body) = send(
            &h.router,
            "POST",
            "/api/comment",
            Some(comment_body(owner, "paid")),
            Some(payment_header("arbitrum")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let receipt = headers.get("x-payment-response").unwrap().to_str().unwrap();
        let decoded = Base64Bytes::from(receipt.as_bytes()).decode().unwrap();
        let receipt: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(receipt["success"], true);
        assert_eq!(receipt["transaction"], "0xabc");

        assert_eq!(h.ledger.count_for_subject(owner).await.unwrap(), 4);
        for before in &seeded {
            assert_eq!(&h.ledger.get(before.id).await.unwrap(), before);
        }
        let (_, _, body) = send(&h.router, "GET", &price_uri, None, None).await;
        assert_eq!(body["quote"]["amount"], "4000000000000000000");
    }

    #[tokio::test]
    async fn test_facilitator_down_is_503_and_writes_nothing() {
        let h = harness().await;
        let owner = addr(0x11);
        h.ledger.insert(owner, addr(0x22), "seed", None).await.unwrap();
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&h.facilitator)
            .await;

        let (status, _, body) = send(
            &h.router,
            "POST",
            "/api/comment",
            Some(comment_body(owner, "paid?")),
            Some(payment_header("arbitrum")),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Settlement failed");
        assert_eq!(h.ledger.count_for_subject(owner).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_input_is_400_before_settlement() {
        let h = harness().await;
        mock_facilitator_untouched(&h.facilitator).await;

        let (status, _, body) = send(
            &h.router,
            "POST",
            "/api/comment",
            Some(json!({"ownerAddress": "not-an-address", "fromAddress": PAYER, "text": "hi"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("ownerAddress"));

        let (status, _, _) = send(
            &h.router,
            "POST",
            "/api/comment",
            Some(comment_body(addr(0x11), &"x".repeat(1001))),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            &h.router,
            "POST",
            "/api/comment",
            Some(json!({"text": "missing fields"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.ledger.count_for_subject(addr(0x11)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reply_joins_thread_in_order() {
        let h = harness().await;
        let owner = addr(0x11);
        let root = h.ledger.insert(owner, addr(0x22), "root", None).await.unwrap();
        let r1 = h
            .ledger
            .insert(owner, addr(0x33), "r1", Some(root.id))
            .await
            .unwrap();
        h.ledger
            .insert(owner, addr(0x44), "r2", Some(root.id))
            .await
            .unwrap();

        mock_facilitator_accepts(&h.facilitator, "arbitrum", "3000000000000000000").await;
        let (status, _, body) = send(
            &h.router,
            "POST",
            "/api/reply",
            Some(json!({
                "parentCommentId": root.id.to_string(),
                "fromAddress": PAYER,
                "text": "r3",
            })),
            Some(payment_header("arbitrum")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let r3_id = body["commentId"].as_str().unwrap().to_string();

        for id in [root.id.to_string(), r1.id.to_string(), r3_id] {
            let (status, _, thread) =
                send(&h.router, "GET", &format!("/api/comments/{id}/thread"), None, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(thread["id"], root.id.to_string());
            let texts: Vec<_> = thread["replies"]
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r["text"].as_str().unwrap().to_string())
                .collect();
            assert_eq!(texts, vec!["r1", "r2", "r3"]);
        }
    }

    #[tokio::test]
    async fn test_reply_to_reply_or_missing_parent() {
        let h = harness().await;
        mock_facilitator_untouched(&h.facilitator).await;
        let owner = addr(0x11);
        let root = h.ledger.insert(owner, addr(0x22), "root", None).await.unwrap();
        let reply = h
            .ledger
            .insert(owner, addr(0x33), "reply", Some(root.id))
            .await
            .unwrap();

        let body = |parent: String| {
            json!({"parentCommentId": parent, "fromAddress": PAYER, "text": "nested"})
        };
        let (status, _, _) = send(
            &h.router,
            "POST",
            "/api/reply",
            Some(body(reply.id.to_string())),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            &h.router,
            "POST",
            "/api/reply",
            Some(body(Uuid::new_v4().to_string())),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(h.ledger.count_for_subject(owner).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_mint_amount_rejected_before_settlement() {
        let h = harness().await;
        mock_facilitator_untouched(&h.facilitator).await;

        let (status, _, body) = send(
            &h.router,
            "POST",
            "/api/mint",
            Some(json!({"amount": 1001, "paymentChainId": 42161})),
            Some(payment_header("arbitrum")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Amount must be between 1 and 1000");

        let (status, _, body) = send(
            &h.router,
            "POST",
            "/api/mint",
            Some(json!({"amount": 10, "paymentChainId": 1})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid or unsupported payment chain");
    }

    #[tokio::test]
    async fn test_mint_unpaid_then_paid() {
        let h = harness().await;

        let (status, _, body) = send(
            &h.router,
            "POST",
            "/api/mint",
            Some(json!({"amount": 10, "paymentChainId": 8453})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["accepts"][0]["network"], "base");
        assert_eq!(body["accepts"][0]["maxAmountRequired"], "10000");
        assert_eq!(body["accepts"][0]["payTo"], addr(0x55).to_string());

        mock_facilitator_accepts(&h.facilitator, "base", "10000").await;
        Mock::given(method("POST"))
            .and(path("/v1/wallets/send"))
            .and(body_partial_json(json!({
                "from": addr(0x55).to_string(),
                "chainId": 42161,
                "recipients": [{"address": PAYER, "quantity": "10000000000000000000"}],
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"result": {"transactionIds": ["queue-1"]}})),
            )
            .expect(1)
            .mount(&h.engine)
            .await;

        let (status, _, body) = send(
            &h.router,
            "POST",
            "/api/mint",
            Some(json!({"amount": 10, "paymentChainId": 8453})),
            Some(payment_header("base")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transactionId"], "queue-1");
        assert_eq!(body["message"], "Successfully minted 10 CHAT tokens");
    }

    #[tokio::test]
    async fn test_transaction_status() {
        let h = harness().await;
        let (status, _, body) =
            send(&h.router, "GET", "/api/transaction-status", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing transactionId");

        Mock::given(method("GET"))
            .and(path("/v1/transactions/queue-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"result": {"status": "mined"}})),
            )
            .mount(&h.engine)
            .await;
        let (status, _, body) = send(
            &h.router,
            "GET",
            "/api/transaction-status?transactionId=queue-1",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "CONFIRMED", "transactionId": "queue-1"}));
    }

    #[tokio::test]
    async fn test_like_toggle_clamps_at_zero() {
        let h = harness().await;
        let comment = h
            .ledger
            .insert(addr(0x11), addr(0x22), "like me", None)
            .await
            .unwrap();
        let uri = format!("/api/comments/{}/like", comment.id);

        let (_, _, body) = send(&h.router, "POST", &uri, Some(json!({"increment": true})), None).await;
        assert_eq!(body["likesCount"], 1);
        let (_, _, body) =
            send(&h.router, "POST", &uri, Some(json!({"increment": false})), None).await;
        assert_eq!(body["likesCount"], 0);
        let (_, _, body) =
            send(&h.router, "POST", &uri, Some(json!({"increment": false})), None).await;
        assert_eq!(body["likesCount"], 0);

        let missing = format!("/api/comments/{}/like", Uuid::new_v4());
        let (status, _, _) =
            send(&h.router, "POST", &missing, Some(json!({"increment": true})), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wall_view_revalidated_after_post() {
        let h = harness().await;
        let owner = addr(0x11);
        let uri = format!("/api/comments?owner={owner}");

        let (_, _, body) = send(&h.router, "GET", &uri, None, None).await;
        assert_eq!(body["comments"], json!([]));

        let (status, _, _) = send(
            &h.router,
            "POST",
            "/api/comment",
            Some(comment_body(owner, "hello wall")),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, _, body) = send(&h.router, "GET", &uri, None, None).await;
        assert_eq!(body["comments"][0]["text"], "hello wall");
        assert_eq!(body["comments"][0]["replies"], json!([]));

        let (_, _, latest) = send(&h.router, "GET", "/api/comments/latest", None, None).await;
        assert_eq!(latest["comments"].as_array().unwrap().len(), 1);
        let (_, _, popular) = send(&h.router, "GET", "/api/pages/popular", None, None).await;
        assert_eq!(popular["pages"][0]["commentCount"], 1);
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness().await;
        let (status, _, body) = send(&h.router, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[test]
    fn test_mint_units() {
        assert_eq!(mint_units(&json!(5)), Some(5));
        assert_eq!(mint_units(&json!(5.0)), Some(5));
        assert_eq!(mint_units(&json!(5.5)), None);
        assert_eq!(mint_units(&json!("5")), None);
        assert_eq!(mint_units(&serde_json::Value::Null), None);
    }
}
